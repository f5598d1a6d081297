//! Chronicle: Orders bounded context.
//!
//! A sample aggregate persisted through the Chronicle repositories, with an
//! order-summary read model kept up to date from committed events.

pub mod application;
pub mod domain;
