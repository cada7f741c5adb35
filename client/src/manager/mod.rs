//! # Entity Client Module
//!
//! The entity-client layer: [`BusClient`] connects to a namespace and
//! creates producers and consumers bound to named entities, plus the
//! entity naming types and the error taxonomy shared across the crate.
//!
//! ## Core Components
//!
//! - [`BusClient`] - Main entry point; creates producers/consumers, peeks
//! - [`EntityInfo`] / [`EntityKind`] - Entity naming, dead-letter derivation
//! - [`BusError`] / [`BusResult`] - Error handling

pub mod errors;
pub mod manager;
pub mod types;

pub use errors::{BusError, BusResult};
pub use manager::BusClient;
pub use types::{DEAD_LETTER_SUFFIX, EntityInfo, EntityKind};
