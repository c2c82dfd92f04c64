//! Hangar Client - typed resource clients over the sync engine
//!
//! [`ResourceClient`] binds an entity to a [`ResourceTransport`] and a
//! [`SyncEngine`](hangar_sync::SyncEngine), giving every entity the same
//! list / get / create / update / delete / restore surface.
//! [`RestTransport`] is the HTTP/JSON transport.

pub mod resource;
pub mod rest;
pub mod transport;

pub use resource::{Lookup, ResourceClient};
pub use rest::{build_http_client, decode_page, error_from_status, ClientCredentials, RestTransport};
pub use transport::{ListParams, Page, ResourceTransport};
