use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use replica_router::{
    assignment::{registry::PartitionAssignmentRegistry, NodeAssignments, NodeId},
    config::ClientConfig,
    error::{Error, Result},
    health::{StatusCode, Transport},
    metadata::{registry_backed::RegistryStoreMetadata, StaticAddressBook, StoreMetadata},
    stats::{in_memory::InMemoryStats, NoopStats, RoutingStats},
    telemetry::{initialize_fmt_subscriber, initialize_otlp_subscriber},
};
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::{event, Level};

#[derive(Debug, Parser)]
#[command(name = "replica-router")]
#[command(about = "Inspect partition assignments and replica routing decisions", long_about = None)]
struct Cli {
    /// Client config (see conf/client.json)
    #[arg(long)]
    config: PathBuf,
    /// Assignment snapshot (see conf/assignments.json)
    #[arg(long)]
    assignments: PathBuf,
    /// Export traces to this OTLP endpoint instead of logging to stdout
    #[arg(long)]
    tracing_otlp: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Picks the replicas a request for (version, partition) would be sent to
    Route {
        #[arg(long)]
        version: u32,
        #[arg(long)]
        partition: u32,
        #[arg(long, default_value = "1")]
        count: usize,
        #[arg(long, default_value = "0")]
        request_id: u64,
        /// Also open a TCP connection to every chosen replica and report the outcome
        #[arg(long)]
        probe: bool,
    },
    /// Prints every dataset and partition served by a node
    Dump {
        #[arg(long)]
        node: NodeId,
    },
}

#[derive(Debug, Deserialize)]
struct AssignmentFile {
    datasets: HashMap<String, NodeAssignments>,
    endpoints: HashMap<NodeId, String>,
}

/// Considers an instance healthy if a TCP connection can be established with it
struct TcpConnectTransport;

#[async_trait]
impl Transport for TcpConnectTransport {
    async fn send(&self, instance: &str) -> Result<StatusCode> {
        let addr = instance
            .split("://")
            .last()
            .unwrap_or(instance)
            .trim_end_matches('/');
        TcpStream::connect(addr).await.map_err(|err| Error::Io {
            reason: format!("unable to connect to {}: {}", addr, err),
        })?;

        Ok(StatusCode::OK)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.tracing_otlp.as_deref() {
        Some(endpoint) => initialize_otlp_subscriber(endpoint)?,
        None => initialize_fmt_subscriber(),
    }

    let config = ClientConfig::from_path(&args.config)
        .with_context(|| format!("loading config {:?}", args.config))?;
    let raw = tokio::fs::read_to_string(&args.assignments).await?;
    let snapshot: AssignmentFile = serde_json::from_str(&raw)?;

    let registry = Arc::new(PartitionAssignmentRegistry::new());
    for (dataset, assignment) in snapshot.datasets {
        registry.set_assignment(&dataset, assignment)?;
    }
    event!(
        Level::INFO,
        "loaded assignments for datasets {:?}",
        registry.datasets()?
    );

    match args.command {
        Command::Dump { node } => {
            let datasets = registry.get_dataset_assignments(node)?;
            let mut names: Vec<&String> = datasets.keys().collect();
            names.sort();
            for name in names {
                let mut partitions: Vec<u32> = datasets[name].iter().copied().collect();
                partitions.sort_unstable();
                println!("{}: {:?}", name, partitions);
            }
        }
        Command::Route {
            version,
            partition,
            count,
            request_id,
            probe,
        } => {
            let address_book: StaticAddressBook = snapshot.endpoints.into_iter().collect();
            // counters are only reported when probing
            let in_memory_stats = Arc::new(InMemoryStats::new());
            let stats: Arc<dyn RoutingStats> = if probe {
                in_memory_stats.clone()
            } else {
                Arc::new(NoopStats)
            };
            let metadata = RegistryStoreMetadata::new(
                config,
                registry,
                Arc::new(address_book),
                Arc::new(TcpConnectTransport),
                stats,
            )?;

            let replicas = metadata.get_replicas(request_id, version, partition, count)?;
            if replicas.is_empty() {
                return Err(anyhow!(
                    "no healthy replica for version {} partition {}",
                    version,
                    partition
                ));
            }

            for replica in replicas.iter() {
                println!("{}", replica);
            }

            if probe {
                for replica in replicas.iter() {
                    match metadata
                        .send_request_to_instance(replica, version, partition)
                        .await
                    {
                        Ok(status) => println!("{} -> {}", replica, status.0),
                        Err(err) => println!("{} -> {}", replica, err),
                    }
                }
                let health = metadata.get_instance_health_monitor().snapshot();
                println!("{}", serde_json::to_string_pretty(&health)?);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&in_memory_stats.instances())?
                );
            }
        }
    }

    Ok(())
}
