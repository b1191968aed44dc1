pub mod assignment;
pub mod config;
pub mod error;
pub mod health;
pub mod metadata;
pub mod routing;
pub mod stats;
pub mod telemetry;
pub mod test_utils;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
