//! Chronicle Domain: aggregate repositories and the domain context.
//!
//! Wires the abstractions from `chronicle-core` into working persistence:
//! the event-sourced and snapshot repositories, the read-model fan-out bus,
//! the type-keyed registry of snapshot repositories and read-model builders,
//! and a command executor with conflict retries.

pub mod context;
pub mod event_sourced;
pub mod executor;
pub mod read_model;
pub mod snapshot;
