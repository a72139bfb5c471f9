//! The registry store: an insertion-ordered entity index behind one lock.

use crate::filter::{FilterMatch, FilterTarget, PathPredicate};
use devcat_types::{
    CatalogError, CatalogResult, DEFAULT_MAX_PER_PAGE, Entity, PageRequest, Resource,
};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span};

/// Configuration for the registry store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound applied to every `per_page` request.
    pub max_per_page: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_per_page: DEFAULT_MAX_PER_PAGE,
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    /// Entity ids in insertion order.
    order: Vec<String>,
    entities: HashMap<String, Entity>,
    /// Resource id → owning entity id.
    resources: HashMap<String, String>,
    /// Lease deadlines for entities with `ttl > 0`.
    leases: HashMap<String, Instant>,
}

impl Index {
    fn ordered(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Sets the lease deadline to now + ttl. A ttl too large to represent
    /// as a deadline never expires.
    fn renew_lease(&mut self, entity: &Entity) {
        let deadline = (entity.ttl > 0)
            .then(|| Instant::now().checked_add(Duration::from_secs(entity.ttl.unsigned_abs())))
            .flatten();
        match deadline {
            Some(deadline) => {
                self.leases.insert(entity.id.clone(), deadline);
            }
            None => {
                self.leases.remove(&entity.id);
            }
        }
    }

    /// Checks that none of `entity`'s resource ids is taken by another
    /// entity or repeated within `entity`.
    fn check_resource_ids(&self, entity: &Entity) -> CatalogResult<()> {
        let mut seen = HashSet::new();
        for resource in &entity.resources {
            let taken = self
                .resources
                .get(&resource.id)
                .is_some_and(|owner| owner != &entity.id);
            if taken || !seen.insert(resource.id.as_str()) {
                return Err(CatalogError::DuplicateId(resource.id.clone()));
            }
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<Entity> {
        let entity = self.entities.remove(id)?;
        if let Some(pos) = self.order.iter().position(|o| o == id) {
            self.order.remove(pos);
        }
        for resource in &entity.resources {
            self.resources.remove(&resource.id);
        }
        self.leases.remove(id);
        Some(entity)
    }
}

/// In-memory catalog of entities.
///
/// Mutations take the write lock and full scans the read lock, so no
/// operation ever observes half of another one.
pub struct RegistryStore {
    index: RwLock<Index>,
    config: StoreConfig,
    span: Span,
}

impl RegistryStore {
    /// Creates an empty store logging under a `registry` span.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_span(config, info_span!("registry"))
    }

    /// Creates an empty store logging under the given span.
    pub fn with_span(config: StoreConfig, span: Span) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            config,
            span,
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn read(&self) -> CatalogResult<RwLockReadGuard<'_, Index>> {
        self.index
            .read()
            .map_err(|_| CatalogError::StorageFailure("registry index lock poisoned".into()))
    }

    fn write(&self) -> CatalogResult<RwLockWriteGuard<'_, Index>> {
        self.index
            .write()
            .map_err(|_| CatalogError::StorageFailure("registry index lock poisoned".into()))
    }

    fn page(&self, page: i64, per_page: i64) -> PageRequest {
        PageRequest::clamp(page, per_page, self.config.max_per_page)
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Adds a new entity. Fails with `DuplicateId` if the entity id or one
    /// of its resource ids is already registered.
    pub fn add(&self, mut entity: Entity) -> CatalogResult<Entity> {
        let _enter = self.span.enter();
        entity.normalize()?;

        let mut index = self.write()?;
        if index.entities.contains_key(&entity.id) {
            return Err(CatalogError::DuplicateId(entity.id));
        }
        index.check_resource_ids(&entity)?;

        for resource in &entity.resources {
            index.resources.insert(resource.id.clone(), entity.id.clone());
        }
        index.renew_lease(&entity);
        index.order.push(entity.id.clone());
        index.entities.insert(entity.id.clone(), entity.clone());

        info!("Added registration {}", entity.id);
        Ok(entity)
    }

    /// Replaces an existing entity in place, keeping its list position.
    ///
    /// An empty `entity.id` is taken to mean `id`; any other mismatch is
    /// rejected.
    pub fn update(&self, id: &str, mut entity: Entity) -> CatalogResult<Entity> {
        let _enter = self.span.enter();
        if entity.id.is_empty() {
            entity.id = id.to_string();
        } else if entity.id != id {
            return Err(CatalogError::InvalidInput(format!(
                "body id {} does not match {id}",
                entity.id
            )));
        }
        entity.normalize()?;

        let mut index = self.write()?;
        let previous = index
            .entities
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        let stale: Vec<String> = previous.resources.iter().map(|r| r.id.clone()).collect();
        index.check_resource_ids(&entity)?;

        for resource_id in stale {
            index.resources.remove(&resource_id);
        }
        for resource in &entity.resources {
            index.resources.insert(resource.id.clone(), entity.id.clone());
        }
        index.renew_lease(&entity);
        index.entities.insert(entity.id.clone(), entity.clone());

        debug!("Updated registration {}", entity.id);
        Ok(entity)
    }

    /// Removes an entity and returns it. A repeated delete yields `NotFound`.
    pub fn delete(&self, id: &str) -> CatalogResult<Entity> {
        let _enter = self.span.enter();
        let removed = self
            .write()?
            .remove(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        info!("Deleted registration {}", id);
        Ok(removed)
    }

    /// Removes every entity whose lease ran out at or before `now`.
    /// Returns the purged ids.
    pub fn purge_expired(&self, now: Instant) -> CatalogResult<Vec<String>> {
        let _enter = self.span.enter();
        let mut index = self.write()?;
        let expired: Vec<String> = index
            .order
            .iter()
            .filter(|id| index.leases.get(*id).is_some_and(|deadline| *deadline <= now))
            .cloned()
            .collect();
        for id in &expired {
            index.remove(id);
            info!("Registration {} expired", id);
        }
        Ok(expired)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Returns the entity with the given id.
    pub fn get(&self, id: &str) -> CatalogResult<Entity> {
        self.read()?
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Returns the resource with the given id.
    pub fn get_resource(&self, id: &str) -> CatalogResult<Resource> {
        let index = self.read()?;
        index
            .resources
            .get(id)
            .and_then(|owner| index.entities.get(owner))
            .and_then(|entity| entity.resource(id))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Returns one page of entities in insertion order and the total count.
    pub fn get_many(&self, page: i64, per_page: i64) -> CatalogResult<(Vec<Entity>, usize)> {
        let request = self.page(page, per_page);
        let index = self.read()?;
        let total = index.order.len();
        let window = request.window(total);
        let entities = index
            .ordered()
            .skip(window.start)
            .take(window.len())
            .cloned()
            .collect();
        Ok((entities, total))
    }

    /// Number of registered entities.
    pub fn len(&self) -> CatalogResult<usize> {
        Ok(self.read()?.order.len())
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> CatalogResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of resources across all entities.
    pub fn resource_count(&self) -> CatalogResult<usize> {
        Ok(self.read()?.resources.len())
    }

    /// Evaluates `op` against the value found at `path` in every entity or
    /// resource.
    ///
    /// Single-item targets return the first match in insertion order and
    /// fail with `NotFound` when nothing matches. `Resources` pages over the
    /// matching resources and returns their owners, each owner once.
    pub fn path_filter(
        &self,
        target: FilterTarget,
        path: &str,
        op: &str,
        value: &str,
        page: i64,
        per_page: i64,
    ) -> CatalogResult<FilterMatch> {
        let predicate = PathPredicate::new(path, op, value)?;
        let request = self.page(page, per_page);
        let index = self.read()?;

        let result = match target {
            FilterTarget::Entity => {
                let found = matching_entities(&index, &predicate)?.into_iter().next();
                FilterMatch::Entity(found.cloned().ok_or_else(|| no_match(path, op, value))?)
            }
            FilterTarget::Entities => {
                let matches = matching_entities(&index, &predicate)?;
                let total = matches.len();
                let entities = matches[request.window(total)]
                    .iter()
                    .map(|e| (*e).clone())
                    .collect();
                FilterMatch::Entities { entities, total }
            }
            FilterTarget::Resource => {
                let found = matching_resources(&index, &predicate)?.into_iter().next();
                FilterMatch::Resource(found.cloned().ok_or_else(|| no_match(path, op, value))?)
            }
            FilterTarget::Resources => {
                let matches = matching_resources(&index, &predicate)?;
                let total = matches.len();
                let mut seen = HashSet::new();
                let entities = matches[request.window(total)]
                    .iter()
                    .filter(|r| seen.insert(r.owner.as_str()))
                    .filter_map(|r| index.entities.get(&r.owner).cloned())
                    .collect();
                FilterMatch::Entities { entities, total }
            }
        };
        Ok(result)
    }
}

fn no_match(path: &str, op: &str, value: &str) -> CatalogError {
    CatalogError::NotFound(format!("no match for {path} {op} {value}"))
}

fn to_document<T: serde::Serialize>(item: &T) -> CatalogResult<serde_json::Value> {
    serde_json::to_value(item).map_err(|e| CatalogError::StorageFailure(e.to_string()))
}

fn matching_entities<'i>(
    index: &'i Index,
    predicate: &PathPredicate<'_>,
) -> CatalogResult<Vec<&'i Entity>> {
    let mut out = Vec::new();
    for entity in index.ordered() {
        if predicate.matches(&to_document(entity)?) {
            out.push(entity);
        }
    }
    Ok(out)
}

fn matching_resources<'i>(
    index: &'i Index,
    predicate: &PathPredicate<'_>,
) -> CatalogResult<Vec<&'i Resource>> {
    let mut out = Vec::new();
    for resource in index.ordered().flat_map(|e| e.resources.iter()) {
        if predicate.matches(&to_document(resource)?) {
            out.push(resource);
        }
    }
    Ok(out)
}
