//! Test doubles shared by unit and integration tests
pub mod fault;
pub mod health;
pub mod transport;
