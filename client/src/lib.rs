//! # Busline Client Library
//!
//! Core library for broker-backed message production, consumption and
//! settlement. It provides senders and receivers bound to named entities,
//! peek-lock and receive-and-delete receive modes, disposition handling
//! (complete/abandon/defer/dead-letter) and session-scoped consumption.
//!
//! ## Modules
//!
//! - [`broker`] - The transport seam ([`broker::Broker`]) and the in-process broker
//! - [`config`] - Connection string parsing and validation
//! - [`consumer`] - Batch and streaming message consumption
//! - [`producer`] - Message production
//! - [`model`] - Data models for outgoing, received and peeked messages
//! - [`manager`] - Entity client, entity naming and error types
//! - [`settlement`] - Receive-mode settlement gate

pub mod broker;
pub mod config;
pub mod consumer;
pub mod manager;
pub mod model;
pub mod producer;
pub mod settlement;
