//! Registered entities and their resources.

use crate::error::{CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which flavour of catalog an entity set belongs to.
///
/// The kind only changes naming on the wire: the collection type
/// (`DeviceCatalog`), the collection key (`devices`) and the filter words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    #[default]
    Device,
    Service,
}

impl CatalogKind {
    /// Singular entity word (`device`, `service`).
    pub fn entity_word(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Service => "service",
        }
    }

    /// Key of the id→entity map in a collection (`devices`, `services`).
    pub fn collection_key(self) -> &'static str {
        match self {
            Self::Device => "devices",
            Self::Service => "services",
        }
    }

    /// The `type` of a collection document.
    pub fn collection_type(self) -> &'static str {
        match self {
            Self::Device => "DeviceCatalog",
            Self::Service => "ServiceCatalog",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_word())
    }
}

/// A registrable device or service.
///
/// `id` is `root/leaf`: the root names the owning peer, the leaf the
/// registration. Every key on the wire besides the named fields lands in
/// `attributes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Lease length in seconds; `<= 0` means the registration never expires.
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A sub-capability of an entity, addressed as `<entity-id>/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    /// Back-reference to the owning entity's id.
    #[serde(default, rename = "device", alias = "owner")]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Attribute keys taken by paginated entity documents.
pub const RESERVED_ATTRIBUTES: [&str; 3] = ["page", "per_page", "total"];

/// Splits an entity id into its `(root, leaf)` segments.
///
/// Control characters are rejected so an id can always be used in a path
/// or header.
pub fn split_entity_id(id: &str) -> CatalogResult<(&str, &str)> {
    if id.chars().any(char::is_control) {
        return Err(CatalogError::InvalidInput(format!(
            "id contains control characters: {id:?}"
        )));
    }
    match id.split_once('/') {
        Some((root, leaf)) if !root.is_empty() && !leaf.is_empty() && !leaf.contains('/') => {
            Ok((root, leaf))
        }
        _ => Err(CatalogError::InvalidInput(format!(
            "id must have the form <root>/<name>, got {id:?}"
        ))),
    }
}

impl Entity {
    /// Creates an entity with no attributes or resources.
    pub fn new(id: impl Into<String>, name: impl Into<String>, ttl: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ttl,
            ..Default::default()
        }
    }

    /// Sets a descriptive attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Appends a resource named `name`, deriving its id and back-reference.
    pub fn with_resource(mut self, name: impl Into<String>) -> Self {
        let resource = Resource::new(&self.id, name);
        self.resources.push(resource);
        self
    }

    /// Appends a fully built resource.
    pub fn push_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// The id a resource called `name` gets under this entity.
    pub fn resource_id(&self, name: &str) -> String {
        format!("{}/{}", self.id, name)
    }

    /// Looks up one of this entity's resources by id.
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Copy of this entity without its resources.
    pub fn without_resources(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            ttl: self.ttl,
            resources: Vec::new(),
            attributes: self.attributes.clone(),
        }
    }

    /// Checks the id rules and binds every resource to this entity.
    ///
    /// Empty back-references are filled in; a back-reference naming another
    /// entity, a resource id outside `<entity-id>/` or one of the
    /// [`RESERVED_ATTRIBUTES`] is rejected.
    pub fn normalize(&mut self) -> CatalogResult<()> {
        split_entity_id(&self.id)?;
        if let Some(key) = RESERVED_ATTRIBUTES
            .iter()
            .find(|key| self.attributes.contains_key(**key))
        {
            return Err(CatalogError::InvalidInput(format!(
                "attribute {key:?} is reserved"
            )));
        }
        let prefix = format!("{}/", self.id);
        for resource in &mut self.resources {
            if resource.owner.is_empty() {
                resource.owner = self.id.clone();
            } else if resource.owner != self.id {
                return Err(CatalogError::InvalidInput(format!(
                    "resource {} belongs to {}, not {}",
                    resource.id, resource.owner, self.id
                )));
            }
            match resource.id.strip_prefix(&prefix) {
                Some(name) if !name.is_empty() => {}
                _ => {
                    return Err(CatalogError::InvalidInput(format!(
                        "resource id {:?} must start with {prefix:?}",
                        resource.id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Resource {
    /// Creates a resource called `name` owned by `entity_id`.
    pub fn new(entity_id: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("{entity_id}/{name}"),
            owner: entity_id.to_string(),
            name,
            attributes: Map::new(),
        }
    }

    /// Sets a descriptive attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
