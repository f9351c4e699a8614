//! Fallback manager: provider selection, retries, health checks.
//!
//! This module provides [`FallbackManager`], the single owned entry point the
//! rest of an application uses to reach a chain. It replaces ad-hoc global
//! provider maps with one value constructed at startup and cloned into every
//! consumer.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::circuit_breaker::{Admission, BreakerTransition, TrialGuard};
use crate::client::{AlloyClient, ChainClient, Connector};
use crate::config::{FallbackConfig, FallbackPolicy};
use crate::error::{FallbackError, ProviderError, Result};
use crate::events::{DiagnosticEvent, EventHub, EventKind};
use crate::health::ProviderHealthReport;
use crate::registry::{NetworkRegistry, ProviderSlot};

/// A raw client handle picked by [`FallbackManager::get_client_with_fallback`].
#[derive(Clone)]
pub struct SelectedClient {
    pub provider: String,
    pub client: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for SelectedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedClient")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// A spawned health check loop and the signal that stops it.
struct HealthTask {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

struct ManagerInner {
    registry: NetworkRegistry,
    policy: FallbackPolicy,
    events: EventHub,
    health_task: Mutex<Option<HealthTask>>,
}

/// Routes chain reads across several providers per network.
///
/// Providers are tried in order of health score, then configured priority.
/// Each provider gets `max_retry_attempts` tries with exponential backoff;
/// a provider that exhausts them is penalised and the next one is tried.
/// Providers that keep failing are taken out of rotation by a circuit
/// breaker until `open_timeout` has passed.
///
/// # Example
///
/// ```rust,no_run
/// use chain_fallback::{FallbackConfig, FallbackManager};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = FallbackManager::new(FallbackConfig::default_networks())?;
/// manager.start_health_check_task();
///
/// let block = manager
///     .execute_with_fallback(
///         "ethereum",
///         |client| async move { client.get_block_number().await },
///         "get_block_number",
///     )
///     .await?;
/// println!("block: {block}");
///
/// manager.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FallbackManager {
    inner: Arc<ManagerInner>,
}

impl FallbackManager {
    /// Builds alloy HTTP clients for every provider with a credential.
    pub fn new(config: FallbackConfig) -> Result<Self> {
        Self::with_connector(config, AlloyClient::connector())
    }

    pub fn with_connector(config: FallbackConfig, connector: Connector) -> Result<Self> {
        let registry = NetworkRegistry::build(&config, &connector)?;

        let manager = Self {
            inner: Arc::new(ManagerInner {
                registry,
                policy: config.policy,
                events: EventHub::new(),
                health_task: Mutex::new(None),
            }),
        };

        if manager.inner.policy.start_health_check_on_init {
            if tokio::runtime::Handle::try_current().is_ok() {
                manager.start_health_check_task();
            } else {
                warn!("no tokio runtime available, health check task not started");
            }
        }

        Ok(manager)
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.inner.policy
    }

    /// Diagnostic events: breaker transitions and exhausted providers.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.inner.events.subscribe()
    }

    /// Runs `operation` against the best available provider for `network`.
    ///
    /// Fails immediately with [`FallbackError::NoProviders`] when the network
    /// has no enabled provider, and with [`FallbackError::AllProvidersFailed`]
    /// once every candidate was skipped or exhausted. Failures of individual
    /// providers are never surfaced otherwise.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        network: &str,
        operation: F,
        label: &str,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let candidates = self.inner.registry.candidates(network).inspect_err(|e| {
            warn!(network, label, error = %e, "rejecting request");
        })?;

        let mut attempted = 0;
        let mut last_error = None;

        for slot in candidates {
            let Some(client) = slot.client() else {
                continue;
            };

            let admission = slot.breaker.admit(self.inner.policy.open_timeout);
            if admission == Admission::Rejected {
                debug!(network, provider = %slot.name, label, "circuit open, skipping provider");
                continue;
            }
            if admission == Admission::Trial {
                warn!(
                    network,
                    provider = %slot.name,
                    label,
                    "circuit breaker half-open, sending trial request"
                );
            }
            let trial = TrialGuard::new(&slot.breaker, admission);

            attempted += 1;
            match self.call_with_retries(&slot, client, &operation, label).await {
                Ok(value) => {
                    trial.resolve();
                    self.record_success(&slot);
                    debug!(network, provider = %slot.name, label, "request served");
                    return Ok(value);
                }
                Err(e) => {
                    trial.resolve();
                    warn!(
                        network,
                        provider = %slot.name,
                        endpoint = %slot.endpoint,
                        label,
                        error = %e,
                        "provider exhausted its retries, falling back"
                    );
                    self.inner.events.emit(
                        network,
                        Some(&slot.name),
                        EventKind::ProviderExhausted {
                            label: label.to_string(),
                            error: e.to_string(),
                        },
                    );
                    self.record_failure(&slot);
                    last_error = Some(e);
                }
            }
        }

        let err = FallbackError::AllProvidersFailed {
            network: network.to_string(),
            label: label.to_string(),
            attempted,
            last_error,
        };
        self.inner.events.emit(
            network,
            None,
            EventKind::AllProvidersFailed {
                label: label.to_string(),
                error: err.to_string(),
            },
        );
        Err(err)
    }

    async fn call_with_retries<T, F, Fut>(
        &self,
        slot: &ProviderSlot,
        client: Arc<dyn ChainClient>,
        operation: &F,
        label: &str,
    ) -> std::result::Result<T, ProviderError>
    where
        F: Fn(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let policy = &self.inner.policy;
        let request_timeout = policy.request_timeout;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(policy.retry_base_delay)
            .with_max_delay(policy.retry_max_delay)
            .with_factor(2.0)
            .with_max_times(policy.max_retry_attempts.saturating_sub(1));

        (|| {
            let client = Arc::clone(&client);
            async move {
                match timeout(request_timeout, operation(client)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(request_timeout)),
                }
            }
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .notify(|err: &ProviderError, dur: Duration| {
            debug!(
                network = %slot.network,
                provider = %slot.name,
                label,
                error = %err,
                "request failed, retrying after {:?}",
                dur
            );
        })
        .await
    }

    fn record_success(&self, slot: &ProviderSlot) {
        slot.state.lock().record_success(self.inner.policy.success_bonus);
        if slot.breaker.on_success() {
            self.inner
                .events
                .emit(&slot.network, Some(&slot.name), EventKind::CircuitClosed);
        }
    }

    /// Failure accounting shared by live requests and health probes.
    fn record_failure(&self, slot: &ProviderSlot) {
        slot.state.lock().record_failure(self.inner.policy.failure_penalty);

        match slot.breaker.on_failure(self.inner.policy.failure_threshold) {
            BreakerTransition::Opened { failure_count } => self.inner.events.emit(
                &slot.network,
                Some(&slot.name),
                EventKind::CircuitOpened { failure_count },
            ),
            BreakerTransition::Reopened { failure_count } => self.inner.events.emit(
                &slot.network,
                Some(&slot.name),
                EventKind::CircuitReopened { failure_count },
            ),
            BreakerTransition::Unchanged => {}
        }
    }

    /// The first candidate whose breaker would let a request through.
    ///
    /// Does not claim a half-open trial, since no outcome will be reported.
    pub fn get_client_with_fallback(&self, network: &str) -> Option<SelectedClient> {
        let open_timeout = self.inner.policy.open_timeout;
        self.inner
            .registry
            .candidates(network)
            .ok()?
            .into_iter()
            .filter(|slot| slot.breaker.would_admit(open_timeout))
            .find_map(|slot| {
                Some(SelectedClient {
                    provider: slot.name.clone(),
                    client: slot.client()?,
                })
            })
    }

    /// Snapshot of every provider, optionally limited to one network.
    pub fn get_provider_health(&self, network: Option<&str>) -> Vec<ProviderHealthReport> {
        let registry = &self.inner.registry;
        match network {
            Some(network) => registry.providers(network).iter().map(|s| s.report()).collect(),
            None => registry.all_providers().map(|s| s.report()).collect(),
        }
    }

    pub fn networks(&self) -> Vec<String> {
        self.inner.registry.networks().map(str::to_string).collect()
    }

    pub fn provider_count(&self, network: &str) -> usize {
        self.inner.registry.providers(network).len()
    }

    pub fn healthy_provider_count(&self, network: &str) -> usize {
        self.get_provider_health(Some(network))
            .iter()
            .filter(|report| report.is_healthy())
            .count()
    }

    /// Probes every enabled provider once, concurrently.
    pub async fn run_health_check(&self) {
        let policy = &self.inner.policy;
        let request_timeout = policy.request_timeout;

        let targets: Vec<(Arc<ProviderSlot>, Arc<dyn ChainClient>)> = self
            .inner
            .registry
            .all_providers()
            .filter_map(|slot| slot.client().map(|client| (Arc::clone(slot), client)))
            .collect();

        info!("Running health check on {} providers", targets.len());

        let probes = targets.into_iter().map(|(slot, client)| async move {
            let start = Instant::now();
            let outcome = match timeout(request_timeout, client.get_block_number()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(request_timeout)),
            };
            (slot, outcome, start.elapsed())
        });

        for (slot, outcome, latency) in join_all(probes).await {
            match outcome {
                Ok(block_number) => {
                    slot.state.lock().record_probe_success(latency, policy.probe_bonus);
                    debug!(
                        network = %slot.network,
                        provider = %slot.name,
                        block_number,
                        ?latency,
                        "health check passed"
                    );
                    if slot.breaker.on_success() {
                        self.inner
                            .events
                            .emit(&slot.network, Some(&slot.name), EventKind::CircuitClosed);
                    }
                }
                Err(e) => {
                    warn!(
                        network = %slot.network,
                        provider = %slot.name,
                        endpoint = %slot.endpoint,
                        error = %e,
                        "health check failed"
                    );
                    slot.state.lock().record_probe_failure();
                    self.record_failure(&slot);
                }
            }
        }
    }

    /// Spawns the periodic health check. Calling it while a task is already
    /// running does nothing.
    ///
    /// The task ends on [`shutdown`](Self::shutdown) or once every handle to
    /// the manager has been dropped.
    pub fn start_health_check_task(&self) {
        let mut task = self.inner.health_task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let manager: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let stop = Arc::new(Notify::new());
        let period = self.inner.policy.health_check_interval;

        let handle = tokio::spawn({
            let stop = Arc::clone(&stop);
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = stop.notified() => {
                            info!("Health check task shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            let Some(inner) = manager.upgrade() else {
                                debug!("manager dropped, health check task exiting");
                                break;
                            };
                            FallbackManager { inner }.run_health_check().await;
                        }
                    }
                }
            }
        });

        *task = Some(HealthTask { handle, stop });
    }

    pub fn is_health_check_running(&self) -> bool {
        self.inner
            .health_task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Stops the health check task, if one is running.
    ///
    /// A check already in flight is allowed to finish; the task exits right
    /// after it.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.health_task.lock().take() {
            // notify_one keeps a permit if the task is mid-check
            task.stop.notify_one();
        }
    }
}
