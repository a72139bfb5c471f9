//! Attribute-path filters.
//!
//! A filter walks a dot-separated path (`meta.serial`, `resources.0.name`)
//! into the JSON form of each entity or resource and compares the scalar it
//! finds with the requested value.

use devcat_types::{CatalogError, CatalogKind, CatalogResult, Entity, Resource};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What a filter runs over and what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    /// First matching entity.
    Entity,
    /// A page of matching entities.
    Entities,
    /// First matching resource.
    Resource,
    /// A page of matching resources, returned as their owning entities.
    Resources,
}

impl FilterTarget {
    /// Parses the `type` segment of a filter request.
    ///
    /// The entity words follow the catalog kind (`device`/`devices` or
    /// `service`/`services`); `entity`/`entities` are accepted for both.
    pub fn parse(word: &str, kind: CatalogKind) -> CatalogResult<Self> {
        match word {
            "resource" => Ok(Self::Resource),
            "resources" => Ok(Self::Resources),
            "entity" => Ok(Self::Entity),
            "entities" => Ok(Self::Entities),
            w if w == kind.entity_word() => Ok(Self::Entity),
            w if w == kind.collection_key() => Ok(Self::Entities),
            other => Err(CatalogError::InvalidInput(format!(
                "unsupported filter type: {other}"
            ))),
        }
    }
}

/// Comparison applied to the path-resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    Prefix,
    Suffix,
    Contains,
}

impl FilterOp {
    /// Whether `candidate` satisfies this operator against `value`.
    pub fn matches(self, candidate: &str, value: &str) -> bool {
        match self {
            Self::Equals => candidate == value,
            Self::Prefix => candidate.starts_with(value),
            Self::Suffix => candidate.ends_with(value),
            Self::Contains => candidate.contains(value),
        }
    }
}

impl FromStr for FilterOp {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(Self::Equals),
            "prefix" => Ok(Self::Prefix),
            "suffix" => Ok(Self::Suffix),
            "contains" => Ok(Self::Contains),
            other => Err(CatalogError::InvalidInput(format!(
                "unsupported filter operator: {other}"
            ))),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "equals",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Contains => "contains",
        })
    }
}

/// Result of a path filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterMatch {
    Entity(Entity),
    /// One page of entities plus the total number of matches.
    Entities { entities: Vec<Entity>, total: usize },
    Resource(Resource),
}

/// A parsed, ready-to-evaluate path predicate.
#[derive(Debug, Clone)]
pub(crate) struct PathPredicate<'a> {
    segments: Vec<&'a str>,
    op: FilterOp,
    value: &'a str,
}

impl<'a> PathPredicate<'a> {
    pub(crate) fn new(path: &'a str, op: &str, value: &'a str) -> CatalogResult<Self> {
        let segments: Vec<&str> = path.split('.').collect();
        if path.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(CatalogError::InvalidInput(format!(
                "invalid filter path: {path:?}"
            )));
        }
        Ok(Self {
            segments,
            op: op.parse()?,
            value,
        })
    }

    /// Evaluates the predicate against a JSON document.
    pub(crate) fn matches(&self, doc: &Value) -> bool {
        lookup(doc, &self.segments)
            .and_then(scalar_text)
            .is_some_and(|text| self.op.matches(&text, self.value))
    }
}

fn lookup<'v>(doc: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    segments.iter().try_fold(doc, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
