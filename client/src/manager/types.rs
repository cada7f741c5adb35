use serde::{Deserialize, Serialize};

/// Suffix appended to an entity name to address its dead-letter sub-entity.
pub const DEAD_LETTER_SUFFIX: &str = "/$deadletterqueue";

/// Kind of entity a client is bound to.
///
/// Distinguishes between main entities (normal message flow) and their
/// dead-letter sub-entities (messages that could not be processed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Main entity for normal message flow
    Main,
    /// Dead-letter sub-entity for failed messages
    DeadLetter,
}

/// A named entity (queue, or topic/subscription path) plus its kind.
///
/// The name is the full addressable path; dead-letter sub-entities carry
/// the `/$deadletterqueue` suffix.
///
/// # Examples
///
/// ```no_run
/// use client::manager::{EntityInfo, EntityKind};
///
/// let orders = EntityInfo::main("orders");
/// assert_eq!(orders.kind, EntityKind::Main);
///
/// let dlq = orders.to_dlq();
/// assert_eq!(dlq.name, "orders/$deadletterqueue");
/// assert_eq!(dlq.kind, EntityKind::DeadLetter);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityInfo {
    /// Full addressable name of the entity
    pub name: String,
    /// Kind classification of the entity
    pub kind: EntityKind,
}

impl EntityInfo {
    /// Classifies an entity by its full name.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = if name.ends_with(DEAD_LETTER_SUFFIX) {
            EntityKind::DeadLetter
        } else {
            EntityKind::Main
        };
        Self { name, kind }
    }

    /// Creates an [`EntityInfo`] for a main entity.
    pub fn main(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::Main,
        }
    }

    /// Creates an [`EntityInfo`] for the dead-letter sub-entity of `base_name`.
    pub fn dead_letter(base_name: &str) -> Self {
        Self {
            name: format!("{base_name}{DEAD_LETTER_SUFFIX}"),
            kind: EntityKind::DeadLetter,
        }
    }

    /// The entity name without the dead-letter suffix.
    pub fn base_name(&self) -> &str {
        self.name.strip_suffix(DEAD_LETTER_SUFFIX).unwrap_or(&self.name)
    }

    /// The dead-letter sub-entity corresponding to this entity.
    pub fn to_dlq(&self) -> Self {
        Self::dead_letter(self.base_name())
    }

    /// The main entity corresponding to this entity.
    pub fn to_main(&self) -> Self {
        Self::main(self.base_name())
    }
}
