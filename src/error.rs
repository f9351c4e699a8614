use std::time::Duration;

use thiserror::Error;

/// Failure of a single call against a single provider.
///
/// These never reach callers of [`FallbackManager::execute_with_fallback`]
/// directly: they are retried, counted against the provider, and at most
/// surface as the last cause of [`FallbackError::AllProvidersFailed`].
///
/// [`FallbackManager::execute_with_fallback`]: crate::FallbackManager::execute_with_fallback
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure text, with any credential already masked.
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no providers available for network {network}")]
    NoProviders { network: String },

    #[error(
        "all providers failed for network {network} during {label} (attempted {attempted}): {}",
        describe_cause(.last_error)
    )]
    AllProvidersFailed {
        network: String,
        label: String,
        attempted: usize,
        #[source]
        last_error: Option<ProviderError>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize provider {provider} for {network}: {reason}")]
    InitializationFailed {
        network: String,
        provider: String,
        reason: String,
    },

    #[error("failed to parse provider table: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_cause(last_error: &Option<ProviderError>) -> String {
    match last_error {
        Some(e) => e.to_string(),
        None => "every provider was skipped by its circuit breaker".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FallbackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_error_names_network_and_label() {
        let err = FallbackError::AllProvidersFailed {
            network: "polygon".into(),
            label: "get_balance".into(),
            attempted: 2,
            last_error: Some(ProviderError::Timeout(Duration::from_secs(15))),
        };
        let msg = err.to_string();
        assert!(msg.contains("polygon"));
        assert!(msg.contains("get_balance"));
        assert!(msg.contains("timed out"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn aggregate_error_without_attempts() {
        let err = FallbackError::AllProvidersFailed {
            network: "base".into(),
            label: "get_gas_price".into(),
            attempted: 0,
            last_error: None,
        };
        assert!(err.to_string().contains("circuit breaker"));
        assert!(std::error::Error::source(&err).is_none());
    }
}
