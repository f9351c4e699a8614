//! The capability surface every provider connection exposes.
//!
//! Operations passed to [`FallbackManager::execute_with_fallback`] receive an
//! `Arc<dyn ChainClient>` and never see which backend sits behind it.
//!
//! [`FallbackManager::execute_with_fallback`]: crate::FallbackManager::execute_with_fallback

use std::sync::Arc;

use alloy_network::Ethereum;
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types::Transaction;
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{FallbackError, ProviderError};

#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn get_block_number(&self) -> Result<u64, ProviderError>;

    async fn get_chain_id(&self) -> Result<u64, ProviderError>;

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError>;

    async fn get_gas_price(&self) -> Result<u128, ProviderError>;

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, ProviderError>;
}

/// Everything a connector needs to build one provider's client.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub network: String,
    pub provider: String,
    pub url: Url,
    /// Credential rendered into `url`, if any. Must be masked in any text
    /// derived from the url.
    pub secret: Option<String>,
}

impl ProviderEndpoint {
    /// Replaces every occurrence of the credential in `text` with `***`.
    pub fn redact(&self, text: &str) -> String {
        match self.secret.as_deref() {
            Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
            _ => text.to_string(),
        }
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("network", &self.network)
            .field("provider", &self.provider)
            .field("url", &self.redact(self.url.as_str()))
            .finish_non_exhaustive()
    }
}

/// Builds a client for an endpoint. Errors disable that provider only.
pub type Connector =
    Arc<dyn Fn(&ProviderEndpoint) -> Result<Arc<dyn ChainClient>, FallbackError> + Send + Sync>;

/// [`ChainClient`] over an alloy HTTP provider.
#[derive(Clone)]
pub struct AlloyClient {
    inner: RootProvider<Ethereum>,
    endpoint: ProviderEndpoint,
}

impl AlloyClient {
    pub fn new(http: Client, endpoint: ProviderEndpoint) -> Self {
        let transport = Http::with_client(http, endpoint.url.clone());
        let client = RpcClient::new(transport, false);
        Self {
            inner: RootProvider::new(client),
            endpoint,
        }
    }

    pub fn provider(&self) -> &RootProvider<Ethereum> {
        &self.inner
    }

    /// A connector that shares one `reqwest` client across every provider.
    pub fn connector() -> Connector {
        let http = Client::new();
        Arc::new(move |endpoint: &ProviderEndpoint| -> Result<Arc<dyn ChainClient>, FallbackError> {
            let client: Arc<dyn ChainClient> =
                Arc::new(AlloyClient::new(http.clone(), endpoint.clone()));
            Ok(client)
        })
    }

    /// reqwest puts the full request url, credential included, in its errors.
    fn rpc_error(&self, err: TransportError) -> ProviderError {
        ProviderError::Rpc(self.endpoint.redact(&err.to_string()))
    }
}

#[async_trait]
impl ChainClient for AlloyClient {
    async fn get_block_number(&self) -> Result<u64, ProviderError> {
        self.inner
            .get_block_number()
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn get_chain_id(&self) -> Result<u64, ProviderError> {
        self.inner
            .get_chain_id()
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ProviderError> {
        self.inner
            .get_balance(address)
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn get_gas_price(&self) -> Result<u128, ProviderError> {
        self.inner
            .get_gas_price()
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, ProviderError> {
        self.inner
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| self.rpc_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(secret: Option<&str>) -> ProviderEndpoint {
        let key = secret.unwrap_or_default();
        ProviderEndpoint {
            network: "ethereum".into(),
            provider: "primary".into(),
            url: format!("https://eth.example/v2/{key}").parse().unwrap(),
            secret: secret.map(str::to_string),
        }
    }

    #[test]
    fn redact_masks_credential() {
        let endpoint = endpoint(Some("s3cr3t"));
        let text = "error sending request for url (https://eth.example/v2/s3cr3t)";
        assert_eq!(
            endpoint.redact(text),
            "error sending request for url (https://eth.example/v2/***)"
        );
        assert!(!format!("{endpoint:?}").contains("s3cr3t"));
    }

    #[test]
    fn redact_without_credential_is_identity() {
        let endpoint = endpoint(None);
        assert_eq!(endpoint.redact("connection refused"), "connection refused");
    }

    #[tokio::test]
    async fn transport_errors_never_carry_the_credential() {
        let endpoint = ProviderEndpoint {
            network: "ethereum".into(),
            provider: "primary".into(),
            url: "http://127.0.0.1:1/v2/s3cr3t".parse().unwrap(),
            secret: Some("s3cr3t".into()),
        };
        let client = AlloyClient::new(Client::new(), endpoint);

        let err = client.get_block_number().await.unwrap_err();
        assert!(matches!(err, ProviderError::Rpc(_)));
        let msg = err.to_string();
        assert!(!msg.contains("s3cr3t"), "credential leaked: {msg}");
    }
}
