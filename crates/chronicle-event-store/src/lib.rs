//! Chronicle Event Store: gateway, manifest and snapshot implementations.
//!
//! In-memory implementations for tests and single-process use, and
//! `PostgreSQL` implementations built on `sqlx`.

pub mod config;
pub mod in_memory;
pub mod pg_event_store;
pub mod pg_manifest;
pub mod schema;
