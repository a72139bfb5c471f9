//! Response documents built from store results.
//!
//! Every view is assembled fresh per request from relative-id entities and
//! carries absolute ids only.

use devcat_types::{CatalogKind, Entity, LinkedDataFormatter, PageRequest, Resource};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An entity without its resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl From<&Entity> for EntitySummary {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            ttl: entity.ttl,
            attributes: entity.attributes.clone(),
        }
    }
}

impl EntitySummary {
    /// Rebuilds a full entity around the given resources.
    pub fn into_entity(self, resources: Vec<Resource>) -> Entity {
        Entity {
            id: self.id,
            name: self.name,
            ttl: self.ttl,
            resources,
            attributes: self.attributes,
        }
    }
}

/// An entity with one page of its own resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedEntity {
    #[serde(flatten)]
    pub entity: EntitySummary,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub per_page: usize,
    /// Number of resources the entity has in total.
    #[serde(default)]
    pub total: usize,
}

impl PaginatedEntity {
    /// The entity with only the resources of this page.
    pub fn into_entity(self) -> Entity {
        self.entity.into_entity(self.resources)
    }
}

/// A page of the catalog.
///
/// Entities are keyed by their relative id and carry no resources; the
/// resources of every listed entity are flattened into `resources`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CollectionWire")]
pub struct Collection {
    pub context: Option<String>,
    pub id: String,
    pub kind: CatalogKind,
    pub entities: BTreeMap<String, EntitySummary>,
    pub resources: Vec<Resource>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl Collection {
    /// Reattaches resources to their owners. Ids stay as they are on the wire.
    pub fn into_entities(self) -> Vec<Entity> {
        let mut resources = self.resources;
        self.entities
            .into_values()
            .map(|summary| {
                let (own, rest): (Vec<_>, Vec<_>) =
                    resources.drain(..).partition(|r| r.owner == summary.id);
                resources = rest;
                summary.into_entity(own)
            })
            .collect()
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(context) = &self.context {
            map.serialize_entry("@context", context)?;
        }
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", self.kind.collection_type())?;
        map.serialize_entry(self.kind.collection_key(), &self.entities)?;
        map.serialize_entry("resources", &self.resources)?;
        map.serialize_entry("page", &self.page)?;
        map.serialize_entry("per_page", &self.per_page)?;
        map.serialize_entry("total", &self.total)?;
        map.end()
    }
}

#[derive(Deserialize)]
struct CollectionWire {
    #[serde(rename = "@context", default)]
    context: Option<String>,
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    collection_type: String,
    #[serde(default, alias = "services")]
    devices: BTreeMap<String, EntitySummary>,
    #[serde(default)]
    resources: Vec<Resource>,
    #[serde(default)]
    page: usize,
    #[serde(default)]
    per_page: usize,
    #[serde(default)]
    total: usize,
}

impl From<CollectionWire> for Collection {
    fn from(wire: CollectionWire) -> Self {
        let kind = if wire.collection_type == CatalogKind::Service.collection_type() {
            CatalogKind::Service
        } else {
            CatalogKind::Device
        };
        Self {
            context: wire.context,
            id: wire.id,
            kind,
            entities: wire.devices,
            resources: wire.resources,
            page: wire.page,
            per_page: wire.per_page,
            total: wire.total,
        }
    }
}

/// Builds response documents for one catalog.
#[derive(Debug, Clone)]
pub struct ViewBuilder {
    formatter: LinkedDataFormatter,
    kind: CatalogKind,
    context: Option<String>,
    max_per_page: usize,
}

impl ViewBuilder {
    pub fn new(formatter: LinkedDataFormatter, kind: CatalogKind, max_per_page: usize) -> Self {
        Self {
            formatter,
            kind,
            context: None,
            max_per_page,
        }
    }

    /// Sets the linked-data context URL advertised by collections.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn formatter(&self) -> &LinkedDataFormatter {
        &self.formatter
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    /// Clamps raw paging parameters against this catalog's maximum.
    pub fn page(&self, page: i64, per_page: i64) -> PageRequest {
        PageRequest::clamp(page, per_page, self.max_per_page)
    }

    /// Assembles a collection page from entities already windowed by the store.
    pub fn collection(&self, entities: &[Entity], page: PageRequest, total: usize) -> Collection {
        let mut map = BTreeMap::new();
        let mut resources = Vec::with_capacity(entities.iter().map(|e| e.resources.len()).sum());

        for entity in entities {
            let mut absolute = self.formatter.to_absolute(entity);
            resources.append(&mut absolute.resources);
            map.insert(entity.id.clone(), EntitySummary::from(&absolute));
        }

        Collection {
            context: self.context.clone(),
            id: self.formatter.base().to_string(),
            kind: self.kind,
            entities: map,
            resources,
            page: page.page,
            per_page: page.per_page,
            total,
        }
    }

    /// The entity with one window of its own resources, paged independently
    /// of any collection paging.
    pub fn paginated_entity(&self, entity: &Entity, page: PageRequest) -> PaginatedEntity {
        let ids: Vec<&str> = entity.resources.iter().map(|r| r.id.as_str()).collect();
        let resources = ids[page.window(ids.len())]
            .iter()
            .filter_map(|id| entity.resource(id))
            .map(|r| self.formatter.resource_to_absolute(r))
            .collect();

        let mut summary = EntitySummary::from(entity);
        summary.id = self.formatter.absolute_id(&entity.id);

        PaginatedEntity {
            entity: summary,
            resources,
            page: page.page,
            per_page: page.per_page,
            total: entity.resources.len(),
        }
    }

    /// Absolute copy of a single resource.
    pub fn resource(&self, resource: &Resource) -> Resource {
        self.formatter.resource_to_absolute(resource)
    }

    /// Absolute copy of a full entity, used for write responses.
    pub fn entity(&self, entity: &Entity) -> Entity {
        self.formatter.to_absolute(entity)
    }
}
