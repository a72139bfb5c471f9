use async_trait::async_trait;
use devcat_keepalive::client::mock::{MockCatalogClient, MockClientFactory, MockOp};
use devcat_keepalive::{
    CatalogClient, CatalogEndpoint, ClientFactory, EndpointResolver, KeepaliveConfig,
    KeepaliveController, KeepaliveHandle, KeepaliveState, register,
};
use devcat_types::{CatalogError, CatalogResult, Entity};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const SELF_ID: &str = "0A6A0B61-5F87-4D5A-8F59-3C2B8B0D8F7E/DeviceCatalog";
const PRIMARY: &str = "http://primary:8411/dc";
const BACKUP: &str = "http://backup:8411/dc";

fn make_entity(ttl: i64) -> Entity {
    Entity::new(SELF_ID, "DeviceCatalog", ttl).with_attribute("kind", "catalog")
}

fn spawn_fixed(factory: &Arc<MockClientFactory>, ttl: i64, config: KeepaliveConfig) -> KeepaliveHandle {
    KeepaliveController::new(
        make_entity(ttl),
        CatalogEndpoint::Fixed(PRIMARY.to_string()),
        factory.clone(),
    )
    .with_config(config)
    .spawn()
}

/// Hands out endpoints in order, repeating the last one.
struct SequenceResolver {
    endpoints: Mutex<VecDeque<String>>,
}

impl SequenceResolver {
    fn new(endpoints: &[&str]) -> Self {
        Self {
            endpoints: Mutex::new(endpoints.iter().map(|e| e.to_string()).collect()),
        }
    }
}

#[async_trait]
impl EndpointResolver for SequenceResolver {
    async fn resolve(&self, service_type: &str) -> CatalogResult<String> {
        assert_eq!(service_type, "_devcat._tcp");
        let mut endpoints = self.endpoints.lock().unwrap();
        if endpoints.len() > 1 {
            Ok(endpoints.pop_front().unwrap())
        } else {
            endpoints
                .front()
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(service_type.to_string()))
        }
    }
}

/// Wraps a mock catalog; the first `update` panics.
struct CrashOnceClient {
    inner: MockCatalogClient,
    crashed: Arc<AtomicBool>,
}

#[async_trait]
impl CatalogClient for CrashOnceClient {
    async fn get(&self, id: &str) -> CatalogResult<Entity> {
        self.inner.get(id).await
    }

    async fn add(&self, entity: &Entity) -> CatalogResult<Entity> {
        self.inner.add(entity).await
    }

    async fn update(&self, id: &str, entity: &Entity) -> CatalogResult<Entity> {
        if !self.crashed.swap(true, Ordering::SeqCst) {
            panic!("renewal crashed");
        }
        self.inner.update(id, entity).await
    }

    async fn delete(&self, id: &str) -> CatalogResult<Entity> {
        self.inner.delete(id).await
    }

    async fn list(&self, page: i64, per_page: i64) -> CatalogResult<(Vec<Entity>, usize)> {
        self.inner.list(page, per_page).await
    }
}

struct CrashOnceFactory {
    inner: MockCatalogClient,
    crashed: Arc<AtomicBool>,
    connections: Mutex<usize>,
}

impl ClientFactory for CrashOnceFactory {
    fn connect(&self, _endpoint: &str) -> CatalogResult<Arc<dyn CatalogClient>> {
        *self.connections.lock().unwrap() += 1;
        Ok(Arc::new(CrashOnceClient {
            inner: self.inner.clone(),
            crashed: self.crashed.clone(),
        }))
    }
}

// ── register ─────────────────────────────────────────────────────

#[tokio::test]
async fn register_adds_unknown_entity() {
    let client = MockCatalogClient::new();
    let registered = register(&client, &make_entity(10)).await.unwrap();

    assert_eq!(registered, make_entity(10));
    assert!(client.contains(SELF_ID));
    assert_eq!(client.count(MockOp::Get), 1);
    assert_eq!(client.count(MockOp::Add), 1);
    assert_eq!(client.count(MockOp::Update), 0);
}

#[tokio::test]
async fn register_updates_known_entity() {
    let client = MockCatalogClient::new();
    client.seed(Entity::new(SELF_ID, "stale name", 10));

    let registered = register(&client, &make_entity(10)).await.unwrap();

    assert_eq!(registered.name, "DeviceCatalog");
    assert_eq!(client.count(MockOp::Add), 0);
    assert_eq!(client.count(MockOp::Update), 1);
}

#[tokio::test]
async fn register_propagates_transport_failure() {
    let client = MockCatalogClient::new();
    client.fail_next(CatalogError::TransportFailure("connection refused".into()));

    let err = register(&client, &make_entity(10)).await.unwrap_err();

    assert_eq!(err, CatalogError::TransportFailure("connection refused".into()));
    assert!(!client.contains(SELF_ID));
    assert_eq!(client.count(MockOp::Add), 0);
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn renewal_period_is_half_the_ttl() {
    let config = KeepaliveConfig::default();
    assert_eq!(config.renewal_period(120), Some(Duration::from_secs(60)));
    assert_eq!(config.renewal_period(1), Some(Duration::from_millis(500)));
    assert_eq!(config.renewal_period(0), None);
    assert_eq!(config.renewal_period(-3), None);
}

#[test]
fn renewal_override_must_stay_below_ttl() {
    let config = KeepaliveConfig {
        renew_interval: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    assert_eq!(config.renewal_period(120), Some(Duration::from_secs(30)));
    assert_eq!(config.renewal_period(30), Some(Duration::from_secs(15)));
    assert_eq!(config.renewal_period(20), Some(Duration::from_secs(10)));
}

#[test]
fn renewal_period_is_capped_for_huge_ttl() {
    let config = KeepaliveConfig::default();
    assert_eq!(
        config.renewal_period(i64::MAX),
        Some(Duration::from_secs(24 * 60 * 60))
    );
    assert_eq!(config.recovery_delay(i64::MAX), Duration::from_secs(24 * 60 * 60));
}

#[test]
fn recovery_delay_defaults() {
    let config = KeepaliveConfig::default();
    assert_eq!(config.recovery_delay(10), Duration::from_secs(5));
    assert_eq!(config.recovery_delay(0), Duration::from_secs(5));

    let config = KeepaliveConfig {
        retry_delay: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    assert_eq!(config.recovery_delay(120), Duration::from_secs(2));
}

// ── Renewal ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn success_path_renews_every_half_ttl() {
    let factory = Arc::new(MockClientFactory::new());
    let handle = spawn_fixed(&factory, 10, KeepaliveConfig::default());

    sleep(Duration::from_secs(26)).await;

    let remote = factory.client(PRIMARY);
    let status = handle.status();
    assert_eq!(status.state, KeepaliveState::Renewing);
    assert_eq!(status.endpoint.as_deref(), Some(PRIMARY));
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.renewals, 5);
    assert_eq!(status.failure_events, 0);
    assert_eq!(remote.count(MockOp::Add), 1);
    assert_eq!(remote.count(MockOp::Update), 5);
    assert_eq!(factory.connections(), vec![PRIMARY.to_string()]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lapsed_lease_is_added_again() {
    let factory = Arc::new(MockClientFactory::new());
    let handle = spawn_fixed(&factory, 10, KeepaliveConfig::default());
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(1)).await;
    assert!(remote.expire(SELF_ID));

    sleep(Duration::from_secs(5)).await;

    assert!(remote.contains(SELF_ID));
    assert_eq!(remote.count(MockOp::Add), 2);
    assert_eq!(handle.status().consecutive_failures, 0);
    assert_eq!(handle.status().renewals, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_resets_counter() {
    let factory = Arc::new(MockClientFactory::new());
    let handle = spawn_fixed(&factory, 10, KeepaliveConfig::default());
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(1)).await;
    remote.fail_next(CatalogError::TransportFailure("timeout".into()));
    remote.fail_next(CatalogError::TransportFailure("timeout".into()));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.status().consecutive_failures, 2);

    sleep(Duration::from_secs(5)).await;
    let status = handle.status();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.failure_events, 0);
    assert_eq!(status.state, KeepaliveState::Renewing);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn escalation_stops_renewal_after_threshold() {
    let factory = Arc::new(MockClientFactory::new());
    let config = KeepaliveConfig {
        failure_threshold: 3,
        retry_delay: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let handle = spawn_fixed(&factory, 10, config);
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(1)).await;
    remote.set_unreachable(true);

    sleep(Duration::from_secs(40)).await;

    let status = handle.status();
    assert_eq!(status.state, KeepaliveState::Failing);
    assert_eq!(status.failure_events, 1);
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(remote.count(MockOp::Update), 3);
    // one registration attempt right after escalation
    assert_eq!(remote.count(MockOp::Get), 2);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.count(MockOp::Update), 3);
    assert_eq!(handle.status().failure_events, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recovery_reregisters_after_escalation() {
    let factory = Arc::new(MockClientFactory::new());
    let config = KeepaliveConfig {
        failure_threshold: 2,
        retry_delay: Some(Duration::from_secs(20)),
        ..Default::default()
    };
    let handle = spawn_fixed(&factory, 10, config);
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(1)).await;
    remote.set_unreachable(true);
    sleep(Duration::from_secs(12)).await;
    assert_eq!(handle.status().state, KeepaliveState::Failing);

    remote.set_unreachable(false);
    sleep(Duration::from_secs(30)).await;

    let status = handle.status();
    assert_eq!(status.state, KeepaliveState::Renewing);
    assert_eq!(status.failure_events, 1);
    assert_eq!(status.consecutive_failures, 0);
    assert!(remote.contains(SELF_ID));
    assert_eq!(factory.connections().len(), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn escalation_rediscovers_endpoint() {
    let factory = Arc::new(MockClientFactory::new());
    let resolver = Arc::new(SequenceResolver::new(&[PRIMARY, BACKUP]));
    let config = KeepaliveConfig {
        failure_threshold: 2,
        ..Default::default()
    };
    let handle = KeepaliveController::new(
        make_entity(10),
        CatalogEndpoint::discovered("_devcat._tcp", resolver),
        factory.clone(),
    )
    .with_config(config)
    .spawn();
    let primary = factory.client(PRIMARY);

    sleep(Duration::from_secs(1)).await;
    primary.set_unreachable(true);
    sleep(Duration::from_secs(17)).await;

    let backup = factory.client(BACKUP);
    let status = handle.status();
    assert_eq!(status.endpoint.as_deref(), Some(BACKUP));
    assert_eq!(status.state, KeepaliveState::Renewing);
    assert_eq!(status.failure_events, 1);
    assert!(backup.contains(SELF_ID));
    assert_eq!(backup.count(MockOp::Add), 1);
    assert_eq!(
        factory.connections(),
        vec![PRIMARY.to_string(), BACKUP.to_string()]
    );

    let final_status = handle.shutdown().await;
    assert_eq!(final_status.state, KeepaliveState::Terminated);
    assert!(!backup.contains(SELF_ID));
    assert_eq!(backup.count(MockOp::Delete), 1);
    assert_eq!(primary.count(MockOp::Delete), 0);
}

#[tokio::test(start_paused = true)]
async fn initial_failure_retries_until_reachable() {
    let factory = Arc::new(MockClientFactory::new());
    let remote = factory.client(PRIMARY);
    remote.set_unreachable(true);
    let config = KeepaliveConfig {
        retry_delay: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let handle = spawn_fixed(&factory, 10, config);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.status().state, KeepaliveState::Failing);
    assert_eq!(handle.status().failure_events, 0);

    remote.set_unreachable(false);
    sleep(Duration::from_secs(12)).await;

    assert_eq!(handle.status().state, KeepaliveState::Renewing);
    assert!(remote.contains(SELF_ID));
    assert_eq!(remote.count(MockOp::Get), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_renewal_task_reregisters_instead_of_terminating() {
    let remote = MockCatalogClient::new();
    let factory = Arc::new(CrashOnceFactory {
        inner: remote.clone(),
        crashed: Arc::new(AtomicBool::new(false)),
        connections: Mutex::new(0),
    });
    let handle = KeepaliveController::new(
        make_entity(10),
        CatalogEndpoint::Fixed(PRIMARY.to_string()),
        factory.clone(),
    )
    .spawn();

    sleep(Duration::from_secs(7)).await;

    let status = handle.status();
    assert_eq!(status.state, KeepaliveState::Renewing);
    assert_eq!(status.failure_events, 1);
    assert_eq!(*factory.connections.lock().unwrap(), 2);
    assert_eq!(remote.count(MockOp::Delete), 0);
    assert!(remote.contains(SELF_ID));
    assert!(!handle.is_finished());

    sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.status().renewals, 1);

    let status = handle.shutdown().await;
    assert_eq!(status.state, KeepaliveState::Terminated);
    assert_eq!(remote.count(MockOp::Delete), 1);
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_deregisters_exactly_once() {
    let factory = Arc::new(MockClientFactory::new());
    let handle = spawn_fixed(&factory, 10, KeepaliveConfig::default());
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(12)).await;
    assert_eq!(remote.count(MockOp::Update), 2);

    let status = handle.shutdown().await;
    assert_eq!(status.state, KeepaliveState::Terminated);
    assert_eq!(remote.count(MockOp::Delete), 1);
    assert!(!remote.contains(SELF_ID));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.count(MockOp::Update), 2);
    assert_eq!(remote.count(MockOp::Delete), 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_token_shuts_controller_down() {
    let factory = Arc::new(MockClientFactory::new());
    let token = tokio_util::sync::CancellationToken::new();
    let handle = KeepaliveController::new(
        make_entity(10),
        CatalogEndpoint::Fixed(PRIMARY.to_string()),
        factory.clone(),
    )
    .with_shutdown(token.clone())
    .spawn();
    let mut updates = handle.subscribe();

    sleep(Duration::from_secs(1)).await;
    token.cancel();
    updates
        .wait_for(|s| s.state == KeepaliveState::Terminated)
        .await
        .unwrap();

    assert_eq!(factory.client(PRIMARY).count(MockOp::Delete), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_failing_skips_unbuilt_client() {
    let factory = Arc::new(MockClientFactory::new());
    let resolver = Arc::new(SequenceResolver::new(&[]));
    let handle = KeepaliveController::new(
        make_entity(10),
        CatalogEndpoint::discovered("_devcat._tcp", resolver),
        factory.clone(),
    )
    .spawn();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.status().state, KeepaliveState::Failing);

    let status = handle.shutdown().await;
    assert_eq!(status.state, KeepaliveState::Terminated);
    assert_eq!(status.endpoint, None);
    assert!(factory.connections().is_empty());
}

// ── Zero TTL ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn zero_ttl_registers_without_renewing() {
    let factory = Arc::new(MockClientFactory::new());
    let handle = spawn_fixed(&factory, 0, KeepaliveConfig::default());
    let remote = factory.client(PRIMARY);

    sleep(Duration::from_secs(3600)).await;

    assert_eq!(handle.status().state, KeepaliveState::Registered);
    assert_eq!(remote.count(MockOp::Add), 1);
    assert_eq!(remote.count(MockOp::Update), 0);

    let status = handle.shutdown().await;
    assert_eq!(status.state, KeepaliveState::Terminated);
    assert_eq!(remote.count(MockOp::Delete), 1);
}
