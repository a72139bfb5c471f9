//! Lease keepalive controller.
//!
//! A supervisor task owns the registration lifecycle: it registers the
//! entity, spawns a renewal task that refreshes the lease every renewal
//! period, and re-registers (possibly against a newly discovered endpoint)
//! whenever the renewal task gives up. Shutdown deregisters the entity.

use crate::client::{CatalogClient, ClientFactory};
use crate::discovery::CatalogEndpoint;
use devcat_types::{CatalogError, CatalogResult, Entity};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Consecutive renewal failures tolerated before re-registration.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Retry delay when the entity has no renewal period.
const FALLBACK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Longest renewal period, so oversized TTLs still yield a valid timer.
const MAX_RENEWAL_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Tuning for [`KeepaliveController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Consecutive failures that end a renewal task.
    pub failure_threshold: u32,
    /// Renewal period override. Ignored unless strictly below the TTL.
    pub renew_interval: Option<Duration>,
    /// Delay between failed registration attempts. Defaults to the renewal
    /// period, or 5 s when the entity has no TTL.
    pub retry_delay: Option<Duration>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            renew_interval: None,
            retry_delay: None,
        }
    }
}

impl KeepaliveConfig {
    /// Renewal period for a lease of `ttl` seconds; `None` when `ttl <= 0`.
    pub fn renewal_period(&self, ttl: i64) -> Option<Duration> {
        if ttl <= 0 {
            return None;
        }
        let ttl = Duration::from_secs(ttl.unsigned_abs());
        let period = match self.renew_interval {
            Some(interval) if !interval.is_zero() && interval < ttl => interval,
            _ => ttl / 2,
        };
        Some(period.min(MAX_RENEWAL_PERIOD))
    }

    /// Delay between registration attempts for a lease of `ttl` seconds.
    pub fn recovery_delay(&self, ttl: i64) -> Duration {
        self.retry_delay
            .or_else(|| self.renewal_period(ttl))
            .unwrap_or(FALLBACK_RETRY_DELAY)
    }

    fn threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }
}

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeepaliveState {
    #[default]
    Unregistered,
    /// Registered; renewal not running (yet, or at all when `ttl <= 0`).
    Registered,
    Renewing,
    /// Renewal gave up or registration failed; re-registering.
    Failing,
    Terminated,
}

impl fmt::Display for KeepaliveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Renewing => "renewing",
            Self::Failing => "failing",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Snapshot published by a running controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepaliveStatus {
    pub state: KeepaliveState,
    /// Base URL of the catalog currently in use.
    pub endpoint: Option<String>,
    pub consecutive_failures: u32,
    /// Successful renewals since start.
    pub renewals: u64,
    /// Times a renewal task gave up.
    pub failure_events: u64,
}

/// Registers `entity`: updates it when the catalog already knows it,
/// adds it otherwise.
pub async fn register(client: &dyn CatalogClient, entity: &Entity) -> CatalogResult<Entity> {
    match client.get(&entity.id).await {
        Ok(_) => client.update(&entity.id, entity).await,
        Err(e) if e.is_not_found() => client.add(entity).await,
        Err(e) => Err(e),
    }
}

/// One renewal: update, falling back to add when the lease has lapsed.
async fn renew(client: &dyn CatalogClient, entity: &Entity) -> CatalogResult<()> {
    match client.update(&entity.id, entity).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!("lease of {} lapsed, registering again", entity.id);
            client.add(entity).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

struct RenewalTask {
    client: Arc<dyn CatalogClient>,
    entity: Arc<Entity>,
    period: Duration,
    threshold: u32,
    status: Arc<watch::Sender<KeepaliveStatus>>,
    failures: mpsc::Sender<CatalogError>,
    cancel: CancellationToken,
}

impl RenewalTask {
    async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match renew(self.client.as_ref(), &self.entity).await {
                Ok(()) => {
                    consecutive = 0;
                    self.status.send_modify(|s| {
                        s.consecutive_failures = 0;
                        s.renewals += 1;
                    });
                }
                Err(e) => {
                    consecutive += 1;
                    warn!(
                        "Renewal of {} failed ({consecutive}/{}): {e}",
                        self.entity.id, self.threshold
                    );
                    self.status
                        .send_modify(|s| s.consecutive_failures = consecutive);
                    if consecutive >= self.threshold {
                        let event = CatalogError::ProtocolExhausted {
                            attempts: consecutive,
                        };
                        if self.failures.send(event).await.is_err() {
                            debug!("supervisor gone, dropping failure event");
                        }
                        break;
                    }
                }
            }
        }
        debug!("renewal task for {} stopped", self.entity.id);
    }
}

struct Supervisor {
    entity: Arc<Entity>,
    endpoint: CatalogEndpoint,
    factory: Arc<dyn ClientFactory>,
    config: KeepaliveConfig,
    status: Arc<watch::Sender<KeepaliveStatus>>,
    shutdown: CancellationToken,
    active: Option<Arc<dyn CatalogClient>>,
}

impl Supervisor {
    async fn run(mut self) {
        let period = self.config.renewal_period(self.entity.ttl);
        let retry = self.config.recovery_delay(self.entity.ttl);

        loop {
            let Some(client) = self.establish(retry).await else {
                break;
            };
            let Some(period) = period else {
                debug!("{} has no TTL, not renewing", self.entity.id);
                self.shutdown.cancelled().await;
                break;
            };

            let (failures, mut events) = mpsc::channel(1);
            let cancel = self.shutdown.child_token();
            let task = RenewalTask {
                client,
                entity: self.entity.clone(),
                period,
                threshold: self.config.threshold(),
                status: self.status.clone(),
                failures,
                cancel: cancel.clone(),
            };
            self.status.send_modify(|s| s.state = KeepaliveState::Renewing);
            let renewal = tokio::spawn(task.run().in_current_span());

            let event = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                event = events.recv() => event,
            };
            cancel.cancel();
            if let Err(e) = renewal.await {
                warn!("Renewal task ended abnormally: {e}");
            }

            match event {
                Some(e) => warn!("Keepalive for {} escalated: {e}", self.entity.id),
                None if self.shutdown.is_cancelled() => break,
                None => warn!(
                    "Renewal task for {} exited without a failure event",
                    self.entity.id
                ),
            }
            self.status.send_modify(|s| {
                s.state = KeepaliveState::Failing;
                s.failure_events += 1;
            });
        }

        self.terminate().await;
    }

    /// Registers until it succeeds or shutdown is requested.
    async fn establish(&mut self, retry: Duration) -> Option<Arc<dyn CatalogClient>> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            match self.try_register().await {
                Ok(client) => {
                    self.status.send_modify(|s| {
                        s.state = KeepaliveState::Registered;
                        s.consecutive_failures = 0;
                    });
                    return Some(client);
                }
                Err(e) => {
                    warn!(
                        "Registration of {} failed, retrying in {retry:?}: {e}",
                        self.entity.id
                    );
                    self.status.send_modify(|s| s.state = KeepaliveState::Failing);
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return None,
                        _ = time::sleep(retry) => {}
                    }
                }
            }
        }
    }

    async fn try_register(&mut self) -> CatalogResult<Arc<dyn CatalogClient>> {
        let url = self.endpoint.resolve().await?;
        let client = self.factory.connect(&url)?;
        self.active = Some(client.clone());
        self.status.send_modify(|s| s.endpoint = Some(url.clone()));

        register(client.as_ref(), &self.entity).await?;
        info!("Registered {} at {url}", self.entity.id);
        Ok(client)
    }

    async fn terminate(self) {
        if let Some(client) = &self.active {
            match client.delete(&self.entity.id).await {
                Ok(_) => info!("Deregistered {}", self.entity.id),
                Err(e) => warn!("Failed to deregister {}: {e}", self.entity.id),
            }
        }
        self.status.send_modify(|s| s.state = KeepaliveState::Terminated);
    }
}

/// Keeps one entity registered in a remote catalog.
///
/// ```ignore
/// let handle = KeepaliveController::new(entity, endpoint, factory)
///     .with_config(config)
///     .spawn();
/// // ...
/// handle.shutdown().await;
/// ```
pub struct KeepaliveController {
    entity: Entity,
    endpoint: CatalogEndpoint,
    factory: Arc<dyn ClientFactory>,
    config: KeepaliveConfig,
    shutdown: CancellationToken,
    span: Span,
}

impl KeepaliveController {
    pub fn new(entity: Entity, endpoint: CatalogEndpoint, factory: Arc<dyn ClientFactory>) -> Self {
        let span = info_span!("keepalive", id = %entity.id);
        Self {
            entity,
            endpoint,
            factory,
            config: KeepaliveConfig::default(),
            shutdown: CancellationToken::new(),
            span,
        }
    }

    pub fn with_config(mut self, config: KeepaliveConfig) -> Self {
        self.config = config;
        self
    }

    /// Span the controller's tasks log under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Ties the controller to an upstream shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Starts the supervisor task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> KeepaliveHandle {
        let (status, _) = watch::channel(KeepaliveStatus::default());
        let status = Arc::new(status);
        let supervisor = Supervisor {
            entity: Arc::new(self.entity),
            endpoint: self.endpoint,
            factory: self.factory,
            config: self.config,
            status: status.clone(),
            shutdown: self.shutdown.clone(),
            active: None,
        };
        let task = tokio::spawn(supervisor.run().instrument(self.span));
        KeepaliveHandle {
            status,
            shutdown: self.shutdown,
            task,
        }
    }
}

/// Handle to a running [`KeepaliveController`].
pub struct KeepaliveHandle {
    status: Arc<watch::Sender<KeepaliveStatus>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl KeepaliveHandle {
    /// Current status snapshot.
    pub fn status(&self) -> KeepaliveStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<KeepaliveStatus> {
        self.status.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops renewal, deregisters and waits for the supervisor to exit.
    pub async fn shutdown(self) -> KeepaliveStatus {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("Keepalive supervisor ended abnormally: {e}");
        }
        self.status.borrow().clone()
    }
}
