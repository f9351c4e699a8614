use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::circuit_breaker::CircuitBreaker;
use crate::client::{ChainClient, Connector, ProviderEndpoint};
use crate::config::{FallbackConfig, ProviderSpec};
use crate::error::{FallbackError, Result};
use crate::health::{ProviderHealthReport, ProviderState};

/// One backend of one network together with its live state.
pub(crate) struct ProviderSlot {
    pub(crate) network: String,
    pub(crate) name: String,
    pub(crate) priority: u32,
    pub(crate) endpoint: String,
    client: Option<Arc<dyn ChainClient>>,
    disabled_reason: Option<String>,
    pub(crate) state: Mutex<ProviderState>,
    pub(crate) breaker: CircuitBreaker,
}

impl ProviderSlot {
    pub(crate) fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub(crate) fn client(&self) -> Option<Arc<dyn ChainClient>> {
        self.client.clone()
    }

    pub(crate) fn health_score(&self) -> u8 {
        self.state.lock().health_score
    }

    pub(crate) fn report(&self) -> ProviderHealthReport {
        let state = self.state.lock().clone();
        ProviderHealthReport {
            network: self.network.clone(),
            provider: self.name.clone(),
            priority: self.priority,
            enabled: self.is_enabled(),
            disabled_reason: self.disabled_reason.clone(),
            health_score: state.health_score,
            consecutive_failures: state.consecutive_failures,
            last_failure_at: state.last_failure_at,
            last_check: state.last_check,
            circuit: self.breaker.state(),
            circuit_failure_count: self.breaker.failure_count(),
        }
    }
}

/// Providers for every configured network. Fixed in shape after construction.
pub(crate) struct NetworkRegistry {
    networks: BTreeMap<String, Vec<Arc<ProviderSlot>>>,
}

impl NetworkRegistry {
    /// Builds every provider, disabling those without a credential or whose
    /// client could not be constructed. Only structural config errors fail.
    pub(crate) fn build(config: &FallbackConfig, connector: &Connector) -> Result<Self> {
        config.validate()?;

        let mut networks = BTreeMap::new();
        for network in &config.networks {
            let slots: Vec<Arc<ProviderSlot>> = network
                .providers
                .iter()
                .map(|spec| Arc::new(build_slot(&network.network, spec, config, connector)))
                .collect();

            let enabled = slots.iter().filter(|s| s.is_enabled()).count();
            if enabled == 0 {
                warn!(network = %network.network, "no providers enabled for network");
            } else {
                info!(
                    network = %network.network,
                    enabled,
                    total = slots.len(),
                    "initialized providers"
                );
            }

            networks.insert(network.network.clone(), slots);
        }

        Ok(Self { networks })
    }

    pub(crate) fn networks(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    pub(crate) fn providers(&self, network: &str) -> &[Arc<ProviderSlot>] {
        self.networks.get(network).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn all_providers(&self) -> impl Iterator<Item = &Arc<ProviderSlot>> {
        self.networks.values().flatten()
    }

    /// Enabled providers ordered by health score (desc), then priority (asc).
    ///
    /// Scores are read once per provider, so concurrent updates cannot make
    /// the comparison inconsistent mid-sort.
    pub(crate) fn candidates(&self, network: &str) -> Result<Vec<Arc<ProviderSlot>>> {
        let mut candidates: Vec<Arc<ProviderSlot>> = self
            .providers(network)
            .iter()
            .filter(|slot| slot.is_enabled())
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(FallbackError::NoProviders {
                network: network.to_string(),
            });
        }

        candidates.sort_by_cached_key(|slot| (Reverse(slot.health_score()), slot.priority));

        debug!(
            network,
            order = ?candidates
                .iter()
                .map(|s| (s.name.as_str(), s.health_score()))
                .collect::<Vec<_>>(),
            "ranked providers"
        );

        Ok(candidates)
    }
}

fn build_slot(
    network: &str,
    spec: &ProviderSpec,
    config: &FallbackConfig,
    connector: &Connector,
) -> ProviderSlot {
    let endpoint = spec.redacted_endpoint();
    let (client, disabled_reason) = match connect(network, spec, config, connector) {
        Ok(client) => (Some(client), None),
        Err(reason) => {
            warn!(network, provider = %spec.name, %endpoint, %reason, "provider disabled");
            (None, Some(reason))
        }
    };

    ProviderSlot {
        network: network.to_string(),
        name: spec.name.clone(),
        priority: spec.priority,
        endpoint,
        client,
        disabled_reason,
        state: Mutex::new(ProviderState::new(spec.initial_health_score)),
        breaker: CircuitBreaker::new(),
    }
}

fn connect(
    network: &str,
    spec: &ProviderSpec,
    config: &FallbackConfig,
    connector: &Connector,
) -> std::result::Result<Arc<dyn ChainClient>, String> {
    let credential = match &spec.credential_env_var {
        Some(var) => match config.credential(var) {
            Some(value) => Some(value),
            None => return Err(format!("credential {var} is not configured")),
        },
        None => None,
    };

    let rendered = spec.render_endpoint(credential.as_deref());
    let url: Url = rendered
        .parse()
        .map_err(|e: url::ParseError| format!("invalid endpoint url: {e}"))?;

    let endpoint = ProviderEndpoint {
        network: network.to_string(),
        provider: spec.name.clone(),
        url,
        secret: credential,
    };

    connector(&endpoint).map_err(|e| e.to_string())
}
