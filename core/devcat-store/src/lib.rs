//! In-memory registry for the devcat catalog.
//!
//! # Components
//!
//! - **Store**: [`RegistryStore`] holds the entity set in insertion order
//!   behind a single lock, with lease deadlines for entities that carry a TTL
//! - **Filter**: [`FilterTarget`] and [`FilterOp`] describe attribute-path
//!   queries evaluated by [`RegistryStore::path_filter`]
//! - **Views**: [`ViewBuilder`] turns store results into the wire documents
//!   served by the API (collections, paginated entities, single resources)

pub mod filter;
mod store;
pub mod views;

pub use filter::{FilterMatch, FilterOp, FilterTarget};
pub use store::{RegistryStore, StoreConfig};
pub use views::{Collection, EntitySummary, PaginatedEntity, ViewBuilder};
