//! # chain-fallback
//!
//! Multi-network RPC access with health scoring, circuit breakers and
//! retrying fallback across providers, built on [alloy](https://alloy.rs/).
//!
//! ## Features
//!
//! - **Several Providers per Network**: each network carries its own ordered list of backends
//! - **Health Scoring**: providers are ranked by a 0–100 score, then by configured priority
//! - **Periodic Health Checks**: a background task probes every provider at a fixed interval
//! - **Circuit Breakers**: providers that keep failing are skipped until a cooldown passes
//! - **Retry then Fallback**: transient errors are retried with backoff before moving on
//! - **Graceful Degradation**: unconfigured providers are disabled, never fatal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chain_fallback::{FallbackConfig, FallbackManager, FallbackPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Alchemy/Infura backends for the major networks; credentials come
//!     // from ALCHEMY_API_KEY, ALCHEMY_SECONDARY_API_KEY and INFURA_API_KEY.
//!     let config = FallbackConfig::default_networks().with_policy(
//!         FallbackPolicy::default()
//!             .with_health_check_interval(Duration::from_secs(30))
//!             .with_request_timeout(Duration::from_secs(15)),
//!     );
//!
//!     let manager = FallbackManager::new(config)?;
//!     manager.start_health_check_task();
//!
//!     let gas_price = manager
//!         .execute_with_fallback(
//!             "polygon",
//!             |client| async move { client.get_gas_price().await },
//!             "get_gas_price",
//!         )
//!         .await?;
//!     println!("Gas price: {}", gas_price);
//!
//!     for report in manager.get_provider_health(Some("polygon")) {
//!         println!("{}: score {}", report.provider, report.health_score);
//!     }
//!
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
mod registry;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export main types at crate root
pub use circuit_breaker::CircuitState;
pub use client::{AlloyClient, ChainClient, Connector, ProviderEndpoint};
pub use config::{FallbackConfig, FallbackPolicy, NetworkConfig, ProviderSpec};
pub use error::{FallbackError, ProviderError, Result};
pub use events::{DiagnosticEvent, EventKind, Severity};
pub use health::{HealthRecord, ProviderHealthReport};
pub use manager::{FallbackManager, SelectedClient};

// Re-export commonly used alloy types for convenience
pub use alloy_primitives::{Address, TxHash, U256};
pub use alloy_rpc_types::Transaction;
