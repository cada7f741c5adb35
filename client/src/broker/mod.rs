//! The transport seam between the client types and a broker.
//!
//! Producers and consumers only ever talk to a [`Broker`]. The in-process
//! [`MemoryBroker`] implements the full delivery and settlement semantics
//! and backs the library's own tests and local development; a network
//! transport plugs in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::manager::{BusResult, EntityInfo};
use crate::model::{OutgoingMessage, PeekedMessage, ReceiveMode, ReceivedMessage};
use crate::settlement::Disposition;

pub mod memory;

pub use memory::MemoryBroker;

/// Message transport a client is connected to.
///
/// Implementations own the entity stores and the lock bookkeeping; the
/// client side is responsible only for the receive-mode settlement gate.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueues a message on `entity`.
    async fn send(&self, entity: &EntityInfo, message: OutgoingMessage) -> BusResult<()>;

    /// Delivers up to `max_count` currently available messages.
    ///
    /// Under [`ReceiveMode::ReceiveAndDelete`] delivery removes the
    /// messages; under [`ReceiveMode::PeekLock`] it locks them. A session
    /// filter restricts delivery to messages carrying that session id.
    /// Returns immediately with whatever is available, possibly nothing.
    async fn receive(
        &self,
        entity: &EntityInfo,
        mode: ReceiveMode,
        session: Option<&str>,
        max_count: usize,
    ) -> BusResult<Vec<ReceivedMessage>>;

    /// Read-only enumeration of active (unlocked, non-deferred) messages.
    async fn peek(
        &self,
        entity: &EntityInfo,
        max_count: usize,
        from_sequence: Option<i64>,
        session: Option<&str>,
    ) -> BusResult<Vec<PeekedMessage>>;

    /// Applies a disposition to the message locked under `lock_token`.
    async fn settle(
        &self,
        entity: &EntityInfo,
        lock_token: Uuid,
        disposition: Disposition,
    ) -> BusResult<()>;

    /// Extends the lock held under `lock_token`, returning the new expiry.
    async fn renew_lock(&self, entity: &EntityInfo, lock_token: Uuid)
    -> BusResult<DateTime<Utc>>;

    /// Retrieves previously deferred messages by sequence number.
    async fn receive_deferred(
        &self,
        entity: &EntityInfo,
        mode: ReceiveMode,
        sequences: &[i64],
    ) -> BusResult<Vec<ReceivedMessage>>;

    /// Number of active messages on `entity` (observability helper).
    async fn active_count(&self, entity: &EntityInfo) -> BusResult<usize>;
}
