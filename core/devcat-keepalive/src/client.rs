//! Registration client abstraction.
//!
//! Defines the remote-call surface the keepalive protocol drives, so it can
//! run against the HTTP client or an in-memory mock.

use async_trait::async_trait;
use devcat_types::{CatalogResult, Entity};
use std::sync::Arc;

/// Typed access to a remote catalog. Entities go in and come out with
/// relative ids.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches a registration. `NotFound` if the catalog does not know it.
    async fn get(&self, id: &str) -> CatalogResult<Entity>;

    /// Creates a registration.
    async fn add(&self, entity: &Entity) -> CatalogResult<Entity>;

    /// Replaces a registration. `NotFound` if it lapsed or never existed.
    async fn update(&self, id: &str, entity: &Entity) -> CatalogResult<Entity>;

    /// Removes a registration and returns what was removed.
    async fn delete(&self, id: &str) -> CatalogResult<Entity>;

    /// Lists one page of registrations and the total count.
    async fn list(&self, page: i64, per_page: i64) -> CatalogResult<(Vec<Entity>, usize)>;
}

/// Builds a client bound to a catalog base URL.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> CatalogResult<Arc<dyn CatalogClient>>;
}

/// An in-memory catalog for testing.
pub mod mock {
    use super::*;
    use devcat_types::{CatalogError, DEFAULT_MAX_PER_PAGE, PageRequest};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Which client operation was called.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOp {
        Get,
        Add,
        Update,
        Delete,
        List,
    }

    /// One recorded call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockCall {
        pub op: MockOp,
        /// Registration id, empty for `List`.
        pub id: String,
    }

    #[derive(Debug, Default)]
    struct MockState {
        entities: Vec<Entity>,
        calls: Vec<MockCall>,
        unreachable: bool,
        queued_failures: VecDeque<CatalogError>,
    }

    /// A mock remote catalog. Clones share the same state.
    #[derive(Debug, Clone, Default)]
    pub struct MockCatalogClient {
        state: Arc<Mutex<MockState>>,
    }

    impl MockCatalogClient {
        /// Creates an empty, reachable mock catalog.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every following call fail with `TransportFailure`.
        pub fn set_unreachable(&self, unreachable: bool) {
            self.state.lock().unwrap().unreachable = unreachable;
        }

        /// Queues an error returned by the next call instead of its result.
        pub fn fail_next(&self, error: CatalogError) {
            self.state.lock().unwrap().queued_failures.push_back(error);
        }

        /// Drops a registration as if its lease had lapsed remotely.
        pub fn expire(&self, id: &str) -> bool {
            let mut state = self.state.lock().unwrap();
            let before = state.entities.len();
            state.entities.retain(|e| e.id != id);
            state.entities.len() != before
        }

        /// Whether a registration is currently held.
        pub fn contains(&self, id: &str) -> bool {
            self.state.lock().unwrap().entities.iter().any(|e| e.id == id)
        }

        /// Inserts a registration without recording a call.
        pub fn seed(&self, entity: Entity) {
            self.state.lock().unwrap().entities.push(entity);
        }

        /// All calls made so far, in order.
        pub fn calls(&self) -> Vec<MockCall> {
            self.state.lock().unwrap().calls.clone()
        }

        /// Number of calls of one kind.
        pub fn count(&self, op: MockOp) -> usize {
            self.state
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|c| c.op == op)
                .count()
        }

        /// Records the call and returns the scripted failure, if any.
        fn begin(&self, op: MockOp, id: &str) -> CatalogResult<()> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(MockCall {
                op,
                id: id.to_string(),
            });
            if state.unreachable {
                return Err(CatalogError::TransportFailure("catalog unreachable".into()));
            }
            match state.queued_failures.pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl CatalogClient for MockCatalogClient {
        async fn get(&self, id: &str) -> CatalogResult<Entity> {
            self.begin(MockOp::Get, id)?;
            let state = self.state.lock().unwrap();
            state
                .entities
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))
        }

        async fn add(&self, entity: &Entity) -> CatalogResult<Entity> {
            self.begin(MockOp::Add, &entity.id)?;
            let mut state = self.state.lock().unwrap();
            if state.entities.iter().any(|e| e.id == entity.id) {
                return Err(CatalogError::DuplicateId(entity.id.clone()));
            }
            state.entities.push(entity.clone());
            Ok(entity.clone())
        }

        async fn update(&self, id: &str, entity: &Entity) -> CatalogResult<Entity> {
            self.begin(MockOp::Update, id)?;
            let mut state = self.state.lock().unwrap();
            let slot = state
                .entities
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
            *slot = entity.clone();
            Ok(entity.clone())
        }

        async fn delete(&self, id: &str) -> CatalogResult<Entity> {
            self.begin(MockOp::Delete, id)?;
            let mut state = self.state.lock().unwrap();
            let pos = state
                .entities
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
            Ok(state.entities.remove(pos))
        }

        async fn list(&self, page: i64, per_page: i64) -> CatalogResult<(Vec<Entity>, usize)> {
            self.begin(MockOp::List, "")?;
            let state = self.state.lock().unwrap();
            let window = PageRequest::clamp(page, per_page, DEFAULT_MAX_PER_PAGE)
                .window(state.entities.len());
            Ok((state.entities[window].to_vec(), state.entities.len()))
        }
    }

    /// Hands out one shared [`MockCatalogClient`] per endpoint.
    #[derive(Debug, Default)]
    pub struct MockClientFactory {
        clients: Mutex<HashMap<String, MockCatalogClient>>,
        connections: Mutex<Vec<String>>,
    }

    impl MockClientFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// The mock catalog behind `endpoint`, created on first use.
        pub fn client(&self, endpoint: &str) -> MockCatalogClient {
            self.clients
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .clone()
        }

        /// Endpoints passed to `connect`, in order.
        pub fn connections(&self) -> Vec<String> {
            self.connections.lock().unwrap().clone()
        }
    }

    impl ClientFactory for MockClientFactory {
        fn connect(&self, endpoint: &str) -> CatalogResult<Arc<dyn CatalogClient>> {
            self.connections.lock().unwrap().push(endpoint.to_string());
            Ok(Arc::new(self.client(endpoint)))
        }
    }
}
