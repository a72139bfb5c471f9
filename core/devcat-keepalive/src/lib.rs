//! Registration client and lease keepalive for the devcat catalog.
//!
//! # Components
//!
//! - **Client**: [`CatalogClient`] is the typed remote surface
//!   (get/add/update/delete/list); [`HttpCatalogClient`] speaks the catalog's
//!   HTTP API and [`client::mock`] provides an in-memory stand-in for tests
//! - **Discovery**: [`EndpointResolver`] turns a service type into a base URL
//! - **Keepalive**: [`KeepaliveController`] registers an entity, renews it
//!   before its TTL runs out, recovers from failures and deregisters on
//!   shutdown
//!
//! # Lifecycle
//!
//! ```text
//! UNREGISTERED → REGISTERED → RENEWING ⇄ FAILING → TERMINATED
//! ```
//!
//! A renewal task ticks at half the TTL. After `failure_threshold`
//! consecutive failures it stops and notifies the supervisor, which
//! re-resolves the endpoint, registers again and restarts renewal.

pub mod client;
pub mod discovery;
mod http;
mod keepalive;

pub use client::{CatalogClient, ClientFactory};
pub use discovery::{CatalogEndpoint, DEFAULT_SERVICE_TYPE, EndpointResolver, StaticResolver};
pub use http::{HttpCatalogClient, HttpClientFactory};
pub use keepalive::{
    DEFAULT_FAILURE_THRESHOLD, KeepaliveConfig, KeepaliveController, KeepaliveHandle,
    KeepaliveState, KeepaliveStatus, register,
};
