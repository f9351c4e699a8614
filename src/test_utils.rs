use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use alloy_rpc_types::Transaction;
use async_trait::async_trait;

use crate::client::{ChainClient, Connector, ProviderEndpoint};
use crate::error::{FallbackError, ProviderError};

/// In-memory client whose failures and latency are switched at runtime.
#[derive(Debug)]
pub(crate) struct MockClient {
    failing: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
    block_number: u64,
}

impl MockClient {
    pub(crate) fn healthy() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: None,
            block_number: 1_000,
        }
    }

    pub(crate) fn failing() -> Self {
        let client = Self::healthy();
        client.set_failing(true);
        client
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T>(&self, value: T) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mock failure".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ChainClient for MockClient {
    async fn get_block_number(&self) -> Result<u64, ProviderError> {
        self.respond(self.block_number).await
    }

    async fn get_chain_id(&self) -> Result<u64, ProviderError> {
        self.respond(1).await
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, ProviderError> {
        self.respond(U256::from(self.block_number)).await
    }

    async fn get_gas_price(&self) -> Result<u128, ProviderError> {
        self.respond(20_000_000_000).await
    }

    async fn get_transaction(&self, _hash: TxHash) -> Result<Option<Transaction>, ProviderError> {
        self.respond(None).await
    }
}

/// Every endpoint gets a fresh client from `make`.
pub(crate) fn mock_connector(make: fn() -> MockClient) -> Connector {
    Arc::new(move |_endpoint: &ProviderEndpoint| -> Result<Arc<dyn ChainClient>, FallbackError> {
        let client: Arc<dyn ChainClient> = Arc::new(make());
        Ok(client)
    })
}

/// Hands out the given clients by provider name; unknown names fail to connect.
pub(crate) fn scripted_connector(clients: &[(&str, Arc<MockClient>)]) -> Connector {
    let clients: HashMap<String, Arc<MockClient>> = clients
        .iter()
        .map(|(name, client)| (name.to_string(), Arc::clone(client)))
        .collect();

    Arc::new(move |endpoint: &ProviderEndpoint| -> Result<Arc<dyn ChainClient>, FallbackError> {
        let client = clients.get(&endpoint.provider).cloned().ok_or_else(|| {
            FallbackError::InitializationFailed {
                network: endpoint.network.clone(),
                provider: endpoint.provider.clone(),
                reason: "no scripted client".into(),
            }
        })?;
        let client: Arc<dyn ChainClient> = client;
        Ok(client)
    })
}
