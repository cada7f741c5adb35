//! Receive-mode settlement gate.
//!
//! Every disposition and lock-renewal request passes through
//! [`ensure_settleable`] before any broker call. The gate is a pure
//! function of (receive mode, requested operation): `PeekLock` forwards
//! everything to the broker, `ReceiveAndDelete` rejects everything locally
//! because the broker already removed the message at delivery time and no
//! lock exists to operate on.

use crate::manager::{BusError, BusResult};
use crate::model::ReceiveMode;

/// Settlement outcome applied to a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message permanently
    Complete,
    /// Return the message to the entity for redelivery
    Abandon,
    /// Set the message aside; it must be retrieved by sequence number
    Defer,
    /// Move the message to the dead-letter sub-entity
    DeadLetter {
        reason: Option<String>,
        description: Option<String>,
    },
}

impl Disposition {
    pub fn kind(&self) -> SettlementOperation {
        match self {
            Disposition::Complete => SettlementOperation::Complete,
            Disposition::Abandon => SettlementOperation::Abandon,
            Disposition::Defer => SettlementOperation::Defer,
            Disposition::DeadLetter { .. } => SettlementOperation::DeadLetter,
        }
    }
}

/// Operations subject to the settlement gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOperation {
    Complete,
    Abandon,
    Defer,
    DeadLetter,
    RenewLock,
}

/// Decides whether `operation` is legal under `mode`.
///
/// # Errors
///
/// Returns [`BusError::ModeViolation`] under
/// [`ReceiveMode::ReceiveAndDelete`] for every operation. The rejection is
/// local; no broker round-trip happens.
pub fn ensure_settleable(mode: ReceiveMode, operation: SettlementOperation) -> BusResult<()> {
    match mode {
        ReceiveMode::PeekLock => Ok(()),
        ReceiveMode::ReceiveAndDelete => {
            log::debug!("Rejecting {operation:?} locally: receiver is in ReceiveAndDelete mode");
            Err(BusError::ModeViolation)
        }
    }
}
