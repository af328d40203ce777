//! Shared building blocks for the session client workspace
//!
//! Token redaction (`Secret`), client configuration loading, and the tracing
//! bootstrap used by hosts embedding the session client.

mod config;
mod error;
mod secret;
pub mod telemetry;

pub use config::{ApiConfig, ClientConfig, StorageConfig};
pub use error::{Error, Result};
pub use secret::Secret;
