use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::circuit_breaker::CircuitState;
use crate::config::MAX_HEALTH_SCORE;

/// Outcome of the most recent health observation for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub is_healthy: bool,
    /// Probe round-trip; `None` when the observation was a failure.
    pub latency_ms: Option<u64>,
    pub uptime_percent: f64,
    pub last_checked_at: SystemTime,
}

/// Mutable bookkeeping for one provider, guarded by the provider's lock.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub health_score: u8,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<SystemTime>,
    pub last_check: Option<HealthRecord>,
    pub total_probes: u64,
    pub successful_probes: u64,
}

impl ProviderState {
    pub fn new(initial_score: u8) -> Self {
        Self {
            health_score: initial_score.min(MAX_HEALTH_SCORE),
            consecutive_failures: 0,
            last_failure_at: None,
            last_check: None,
            total_probes: 0,
            successful_probes: 0,
        }
    }

    /// Share of successful probes, 100 before the first probe.
    pub fn uptime_percent(&self) -> f64 {
        if self.total_probes == 0 {
            return 100.0;
        }
        (self.successful_probes as f64 / self.total_probes as f64) * 100.0
    }

    fn raise_score(&mut self, bonus: u8) {
        self.health_score = self.health_score.saturating_add(bonus).min(MAX_HEALTH_SCORE);
    }

    /// A live request succeeded.
    pub fn record_success(&mut self, bonus: u8) {
        self.raise_score(bonus);
        self.consecutive_failures = 0;
    }

    /// A health probe succeeded.
    pub fn record_probe_success(&mut self, latency: Duration, bonus: u8) {
        self.total_probes += 1;
        self.successful_probes += 1;
        self.record_success(bonus);
        self.last_check = Some(HealthRecord {
            is_healthy: true,
            latency_ms: Some(latency.as_millis().try_into().unwrap_or(u64::MAX)),
            uptime_percent: self.uptime_percent(),
            last_checked_at: SystemTime::now(),
        });
    }

    /// A health probe failed. The caller follows up with [`record_failure`](Self::record_failure).
    pub fn record_probe_failure(&mut self) {
        self.total_probes += 1;
    }

    /// Failure accounting shared by live requests and probes.
    pub fn record_failure(&mut self, penalty: u8) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.health_score = self.health_score.saturating_sub(penalty);
        let now = SystemTime::now();
        self.last_failure_at = Some(now);
        self.last_check = Some(HealthRecord {
            is_healthy: false,
            latency_ms: None,
            uptime_percent: self.uptime_percent(),
            last_checked_at: now,
        });
    }
}

/// Diagnostic view of a single provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthReport {
    pub network: String,
    pub provider: String,
    pub priority: u32,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub health_score: u8,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<SystemTime>,
    pub last_check: Option<HealthRecord>,
    pub circuit: CircuitState,
    pub circuit_failure_count: u32,
}

impl ProviderHealthReport {
    pub fn is_circuit_open(&self) -> bool {
        self.circuit.is_open()
    }

    /// Enabled, breaker closed, and the latest observation (if any) healthy.
    pub fn is_healthy(&self) -> bool {
        self.enabled
            && !self.is_circuit_open()
            && self.last_check.as_ref().map_or(true, |c| c.is_healthy)
    }
}
