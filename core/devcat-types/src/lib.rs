//! Core type definitions for the devcat catalog.
//!
//! This crate defines the value types shared by the store, the HTTP API and
//! the keepalive client:
//! - [`Entity`] and [`Resource`]: a registered device/service and its
//!   sub-capabilities, with the identifier rules that bind them
//! - [`PageRequest`]: the clamped page window used by every paginated read
//! - [`LinkedDataFormatter`]: rewrites relative ids to absolute form and back
//! - [`CatalogError`]: the error taxonomy used across the workspace

mod entity;
mod error;
mod linked_data;
mod page;

pub use entity::{CatalogKind, Entity, RESERVED_ATTRIBUTES, Resource, split_entity_id};
pub use error::{CatalogError, CatalogResult};
pub use linked_data::LinkedDataFormatter;
pub use page::{DEFAULT_MAX_PER_PAGE, PageRequest, page_of_slice};

/// API version advertised in response content types.
pub const API_VERSION: &str = "0.2.1";
