use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FallbackError, Result};

/// Placeholder replaced by the resolved credential in an endpoint template.
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";

pub const MAX_HEALTH_SCORE: u8 = 100;

/// Tuning knobs shared by every network.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub max_retry_attempts: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub health_check_interval: Duration,
    pub request_timeout: Duration,
    pub probe_bonus: u8,
    pub success_bonus: u8,
    pub failure_penalty: u8,
    pub start_health_check_on_init: bool,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(8),
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            probe_bonus: 5,
            success_bonus: 1,
            failure_penalty: 10,
            start_health_check_on_init: false,
        }
    }
}

impl FallbackPolicy {
    pub fn with_max_retry_attempts(mut self, attempts: usize) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_score_adjustments(
        mut self,
        probe_bonus: u8,
        success_bonus: u8,
        failure_penalty: u8,
    ) -> Self {
        self.probe_bonus = probe_bonus;
        self.success_bonus = success_bonus;
        self.failure_penalty = failure_penalty;
        self
    }

    pub fn with_start_health_check_on_init(mut self, start: bool) -> Self {
        self.start_health_check_on_init = start;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(FallbackError::InvalidConfig(
                "max_retry_attempts must be at least 1".into(),
            ));
        }

        if self.failure_threshold == 0 {
            return Err(FallbackError::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(FallbackError::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }

        if self.health_check_interval.is_zero() {
            return Err(FallbackError::InvalidConfig(
                "health_check_interval must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

fn default_health_score() -> u8 {
    MAX_HEALTH_SCORE
}

/// One backend for one network, as written in static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub priority: u32,
    pub endpoint_template: String,
    #[serde(default)]
    pub credential_env_var: Option<String>,
    #[serde(default = "default_health_score")]
    pub initial_health_score: u8,
}

impl ProviderSpec {
    /// A backend whose template carries `{api_key}`, filled from `credential_env_var`.
    pub fn keyed(
        name: impl Into<String>,
        priority: u32,
        endpoint_template: impl Into<String>,
        credential_env_var: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            endpoint_template: endpoint_template.into(),
            credential_env_var: Some(credential_env_var.into()),
            initial_health_score: MAX_HEALTH_SCORE,
        }
    }

    /// A backend that needs no credential.
    pub fn public(name: impl Into<String>, priority: u32, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            endpoint_template: endpoint.into(),
            credential_env_var: None,
            initial_health_score: MAX_HEALTH_SCORE,
        }
    }

    pub fn with_initial_health_score(mut self, score: u8) -> Self {
        self.initial_health_score = score.min(MAX_HEALTH_SCORE);
        self
    }

    /// Fills the template with `credential`, if the template asks for one.
    pub(crate) fn render_endpoint(&self, credential: Option<&str>) -> String {
        match credential {
            Some(key) => self.endpoint_template.replace(API_KEY_PLACEHOLDER, key),
            None => self.endpoint_template.clone(),
        }
    }

    /// The endpoint with the credential masked, safe to log.
    pub(crate) fn redacted_endpoint(&self) -> String {
        self.endpoint_template.replace(API_KEY_PLACEHOLDER, "***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    pub network: String,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

impl NetworkConfig {
    pub fn new(network: impl Into<String>, providers: Vec<ProviderSpec>) -> Self {
        Self {
            network: network.into(),
            providers,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FallbackConfig {
    pub policy: FallbackPolicy,
    pub networks: Vec<NetworkConfig>,
    /// Explicit credential values; consulted before the process environment.
    pub credentials: HashMap<String, String>,
}

impl FallbackConfig {
    pub fn new(networks: Vec<NetworkConfig>) -> Self {
        Self {
            networks,
            ..Default::default()
        }
    }

    /// The stock network table backed by Alchemy and Infura.
    pub fn default_networks() -> Self {
        const ALCHEMY: &str = "ALCHEMY_API_KEY";
        const ALCHEMY_SECONDARY: &str = "ALCHEMY_SECONDARY_API_KEY";
        const INFURA: &str = "INFURA_API_KEY";

        let table: [(&str, &str, Option<&str>); 5] = [
            ("ethereum", "eth-mainnet", Some("mainnet")),
            ("polygon", "polygon-mainnet", Some("polygon-mainnet")),
            ("arbitrum", "arb-mainnet", Some("arbitrum-mainnet")),
            ("optimism", "opt-mainnet", Some("optimism-mainnet")),
            ("base", "base-mainnet", None),
        ];

        let networks = table
            .iter()
            .map(|(network, alchemy_host, infura_host)| {
                let alchemy =
                    format!("https://{alchemy_host}.g.alchemy.com/v2/{API_KEY_PLACEHOLDER}");
                let mut providers = vec![
                    ProviderSpec::keyed("primary", 1, alchemy.clone(), ALCHEMY),
                    ProviderSpec::keyed("secondary", 2, alchemy, ALCHEMY_SECONDARY),
                ];
                if let Some(host) = infura_host {
                    providers.push(ProviderSpec::keyed(
                        "infura",
                        3,
                        format!("https://{host}.infura.io/v3/{API_KEY_PLACEHOLDER}"),
                        INFURA,
                    ));
                }
                NetworkConfig::new(*network, providers)
            })
            .collect();

        Self::new(networks)
    }

    /// Loads the networks table from JSON: `[{"network": .., "providers": [..]}]`.
    pub fn from_json(json: &str) -> Result<Self> {
        let networks: Vec<NetworkConfig> = serde_json::from_str(json)?;
        Ok(Self::new(networks))
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.networks.push(network);
        self
    }

    pub fn with_credential(mut self, env_var: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(env_var.into(), value.into());
        self
    }

    /// Looks up a credential, preferring explicit values over the environment.
    /// Empty values count as unset.
    pub(crate) fn credential(&self, env_var: &str) -> Option<String> {
        self.credentials
            .get(env_var)
            .cloned()
            .or_else(|| std::env::var(env_var).ok())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        let mut seen_networks = HashSet::new();
        for network in &self.networks {
            if !seen_networks.insert(network.network.as_str()) {
                return Err(FallbackError::InvalidConfig(format!(
                    "network {} is configured more than once",
                    network.network
                )));
            }

            let mut seen_names = HashSet::new();
            for provider in &network.providers {
                if !seen_names.insert(provider.name.as_str()) {
                    return Err(FallbackError::InvalidConfig(format!(
                        "provider name {} is used more than once for network {}",
                        provider.name, network.network
                    )));
                }
            }
        }

        Ok(())
    }
}
