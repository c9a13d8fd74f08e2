//! GridIron Stats API
//!
//! REST service exposing NFL statistics backed by Postgres, with data
//! populated on demand from upstream providers. When a query comes back
//! empty the read path consults an eligibility policy and, if allowed,
//! triggers a deduplicated background sync before re-querying. Redis (or an
//! in-process fallback) fronts the canonical store with TTL'd cache-aside
//! reads, invalidated per resource class after every successful sync.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod policy;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod upstream;
