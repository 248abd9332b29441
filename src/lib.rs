pub mod client;
pub mod cluster;
pub mod config;
pub mod endpoint;
pub mod health;
pub mod labels;
pub mod lease;
pub mod metrics;
pub mod probe;
pub mod quantity;
pub mod retry;
pub mod server;
pub mod shutdown;

// Re-export for main.rs and integration tests
pub use crate::health::{HealthAggregator, HealthSignal};
pub use crate::lease::LeaseManager;
