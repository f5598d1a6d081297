//! Chronicle Core: shared aggregate and persistence abstractions.
//!
//! This crate defines the traits and types that repositories, stores and
//! bounded contexts depend on. It contains no infrastructure code.

pub mod aggregate;
pub mod bus;
pub mod command;
pub mod error;
pub mod event;
pub mod manifest;
pub mod read_model;
pub mod repository;
pub mod serializer;
pub mod snapshot;
pub mod store;
pub mod unit_of_work;
