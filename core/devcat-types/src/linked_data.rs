//! Linked-data id rewriting.
//!
//! Stored ids are relative (`root/leaf`, `root/leaf/resource`). On the wire
//! they are absolute: prefixed with the catalog's base location, so every id
//! doubles as the path of the document it names.

use crate::entity::{Entity, Resource};

/// Rewrites entity and resource ids between relative and absolute form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedDataFormatter {
    base: String,
}

impl LinkedDataFormatter {
    /// Creates a formatter for `base` (e.g. `/dc`). A trailing `/` is dropped.
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    /// The base location ids are prefixed with.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Absolute form of a single id.
    pub fn absolute_id(&self, id: &str) -> String {
        format!("{}/{}", self.base, id)
    }

    /// Relative form of a single id; ids without the prefix pass through.
    pub fn relative_id<'a>(&self, id: &'a str) -> &'a str {
        id.strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(id)
    }

    /// Deep copy of `entity` with every id and back-reference made absolute.
    pub fn to_absolute(&self, entity: &Entity) -> Entity {
        let mut out = entity.clone();
        out.id = self.absolute_id(&entity.id);
        for resource in &mut out.resources {
            *resource = self.resource_to_absolute(resource);
        }
        out
    }

    /// Inverse of [`to_absolute`](Self::to_absolute).
    pub fn to_relative(&self, entity: &Entity) -> Entity {
        let mut out = entity.clone();
        out.id = self.relative_id(&entity.id).to_string();
        for resource in &mut out.resources {
            *resource = self.resource_to_relative(resource);
        }
        out
    }

    /// Absolute copy of a single resource.
    pub fn resource_to_absolute(&self, resource: &Resource) -> Resource {
        Resource {
            id: self.absolute_id(&resource.id),
            owner: self.absolute_id(&resource.owner),
            ..resource.clone()
        }
    }

    /// Relative copy of a single resource.
    pub fn resource_to_relative(&self, resource: &Resource) -> Resource {
        Resource {
            id: self.relative_id(&resource.id).to_string(),
            owner: self.relative_id(&resource.owner).to_string(),
            ..resource.clone()
        }
    }
}
