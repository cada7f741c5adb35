//! In-process broker with full delivery and settlement semantics.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Broker;
use crate::manager::{BusError, BusResult, EntityInfo};
use crate::model::{
    BodyData, MessageState, OutgoingMessage, PeekedMessage, ReceiveMode, ReceivedMessage,
};
use crate::settlement::Disposition;

use async_trait::async_trait;

/// Property key recording why a message was dead-lettered.
pub const DEAD_LETTER_REASON_PROPERTY: &str = "DeadLetterReason";
/// Property key recording the dead-letter error description.
pub const DEAD_LETTER_DESCRIPTION_PROPERTY: &str = "DeadLetterErrorDescription";

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// An in-process [`Broker`] implementation.
///
/// Entities are created on first use. Each entity keeps an active FIFO
/// ordered by sequence number, a lock table (lock token to message plus
/// expiry), a deferred map keyed by sequence number and a dead-letter
/// sub-entity addressed as `<name>/$deadletterqueue`.
///
/// Expired locks are reaped lazily: before any operation touches an entity
/// store, messages whose lock expired are returned to the active queue with
/// their delivery count incremented.
pub struct MemoryBroker {
    entities: Mutex<HashMap<String, EntityStore>>,
    lock_duration: ChronoDuration,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: i64,
    id: String,
    body: Vec<u8>,
    session_id: Option<String>,
    delivery_count: u32,
    enqueued_at: DateTime<Utc>,
    properties: HashMap<String, String>,
}

#[derive(Debug)]
struct LockedEntry {
    message: StoredMessage,
    locked_until: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EntityStore {
    /// Active messages, kept in ascending sequence order
    active: VecDeque<StoredMessage>,
    locked: HashMap<Uuid, LockedEntry>,
    deferred: HashMap<i64, StoredMessage>,
    next_sequence: i64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_lock_duration(DEFAULT_LOCK_DURATION)
    }

    /// Creates a broker whose peek-lock deliveries expire after `lock_duration`.
    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        let lock_duration = ChronoDuration::from_std(lock_duration)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));
        Self {
            entities: Mutex::new(HashMap::new()),
            lock_duration,
        }
    }

    /// Returns expired locked messages to the active queue.
    fn reap_expired(entity_name: &str, store: &mut EntityStore, now: DateTime<Utc>) {
        let expired: Vec<Uuid> = store
            .locked
            .iter()
            .filter(|(_, entry)| entry.locked_until <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(entry) = store.locked.remove(&token) {
                let mut message = entry.message;
                message.delivery_count += 1;
                log::debug!(
                    "Lock {token} on message {} expired, returning to entity {entity_name} (delivery count now {})",
                    message.id,
                    message.delivery_count
                );
                Self::requeue(store, message);
            }
        }
    }

    /// Inserts a message into the active queue preserving sequence order.
    fn requeue(store: &mut EntityStore, message: StoredMessage) {
        let pos = store
            .active
            .partition_point(|m| m.sequence < message.sequence);
        store.active.insert(pos, message);
    }

    fn matches_session(message: &StoredMessage, session: Option<&str>) -> bool {
        match session {
            Some(wanted) => message.session_id.as_deref() == Some(wanted),
            None => true,
        }
    }

    /// Turns a stored message into a delivery, locking it when `mode` is
    /// PeekLock.
    fn deliver(
        store: &mut EntityStore,
        message: StoredMessage,
        mode: ReceiveMode,
        now: DateTime<Utc>,
        lock_duration: ChronoDuration,
    ) -> ReceivedMessage {
        let (lock_token, locked_until) = match mode {
            ReceiveMode::ReceiveAndDelete => (None, None),
            ReceiveMode::PeekLock => {
                let token = Uuid::new_v4();
                let until = now + lock_duration;
                store.locked.insert(
                    token,
                    LockedEntry {
                        message: message.clone(),
                        locked_until: until,
                    },
                );
                (Some(token), Some(until))
            }
        };

        ReceivedMessage {
            sequence: message.sequence,
            id: message.id,
            body: message.body,
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at,
            session_id: message.session_id,
            receive_mode: mode,
            lock_token,
            locked_until,
            properties: message.properties,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, entity: &EntityInfo, message: OutgoingMessage) -> BusResult<()> {
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();

        store.next_sequence += 1;
        let stored = StoredMessage {
            sequence: store.next_sequence,
            id: message
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            body: message.body,
            session_id: message.session_id,
            delivery_count: 0,
            enqueued_at: Utc::now(),
            properties: message.properties.unwrap_or_default(),
        };
        log::debug!(
            "Enqueued message {} (sequence {}) on entity {}",
            stored.id,
            stored.sequence,
            entity.name
        );
        store.active.push_back(stored);
        Ok(())
    }

    async fn receive(
        &self,
        entity: &EntityInfo,
        mode: ReceiveMode,
        session: Option<&str>,
        max_count: usize,
    ) -> BusResult<Vec<ReceivedMessage>> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();
        Self::reap_expired(&entity.name, store, now);

        let mut taken = Vec::new();
        let mut idx = 0;
        while idx < store.active.len() && taken.len() < max_count {
            if Self::matches_session(&store.active[idx], session) {
                if let Some(message) = store.active.remove(idx) {
                    taken.push(message);
                }
            } else {
                idx += 1;
            }
        }

        let mut delivered = Vec::with_capacity(taken.len());
        for message in taken {
            delivered.push(Self::deliver(store, message, mode, now, self.lock_duration));
        }
        Ok(delivered)
    }

    async fn peek(
        &self,
        entity: &EntityInfo,
        max_count: usize,
        from_sequence: Option<i64>,
        session: Option<&str>,
    ) -> BusResult<Vec<PeekedMessage>> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();
        Self::reap_expired(&entity.name, store, now);

        let from = from_sequence.unwrap_or(i64::MIN);
        let peeked = store
            .active
            .iter()
            .filter(|m| m.sequence >= from && Self::matches_session(m, session))
            .take(max_count)
            .map(|m| PeekedMessage {
                sequence: m.sequence,
                id: m.id.clone(),
                body: BodyData::parse(&m.body),
                delivery_count: m.delivery_count,
                enqueued_at: m.enqueued_at,
                session_id: m.session_id.clone(),
                state: MessageState::Active,
            })
            .collect();
        Ok(peeked)
    }

    async fn settle(
        &self,
        entity: &EntityInfo,
        lock_token: Uuid,
        disposition: Disposition,
    ) -> BusResult<()> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;

        let message = {
            let store = entities.entry(entity.name.clone()).or_default();
            Self::reap_expired(&entity.name, store, now);
            store
                .locked
                .remove(&lock_token)
                .ok_or_else(|| {
                    BusError::LockLost(format!(
                        "lock token {lock_token} is not held (already settled or expired)"
                    ))
                })?
                .message
        };

        match disposition {
            Disposition::Complete => {
                log::debug!(
                    "Completed message {} (sequence {}) on entity {}",
                    message.id,
                    message.sequence,
                    entity.name
                );
            }
            Disposition::Abandon => {
                let mut message = message;
                message.delivery_count += 1;
                log::debug!(
                    "Abandoned message {} on entity {} (delivery count now {})",
                    message.id,
                    entity.name,
                    message.delivery_count
                );
                if let Some(store) = entities.get_mut(&entity.name) {
                    Self::requeue(store, message);
                }
            }
            Disposition::Defer => {
                log::debug!(
                    "Deferred message {} (sequence {}) on entity {}",
                    message.id,
                    message.sequence,
                    entity.name
                );
                if let Some(store) = entities.get_mut(&entity.name) {
                    store.deferred.insert(message.sequence, message);
                }
            }
            Disposition::DeadLetter {
                reason,
                description,
            } => {
                let mut message = message;
                if let Some(reason) = reason {
                    message
                        .properties
                        .insert(DEAD_LETTER_REASON_PROPERTY.to_string(), reason);
                }
                if let Some(description) = description {
                    message
                        .properties
                        .insert(DEAD_LETTER_DESCRIPTION_PROPERTY.to_string(), description);
                }
                let dlq = entity.to_dlq();
                log::info!(
                    "Dead-lettered message {} from entity {} to {}",
                    message.id,
                    entity.name,
                    dlq.name
                );
                let dlq_store = entities.entry(dlq.name).or_default();
                // Keep the dead-letter sequence counter ahead of moved-in
                // sequence numbers so direct sends to the DLQ never collide.
                dlq_store.next_sequence = dlq_store.next_sequence.max(message.sequence);
                Self::requeue(dlq_store, message);
            }
        }
        Ok(())
    }

    async fn renew_lock(
        &self,
        entity: &EntityInfo,
        lock_token: Uuid,
    ) -> BusResult<DateTime<Utc>> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();
        Self::reap_expired(&entity.name, store, now);

        let entry = store.locked.get_mut(&lock_token).ok_or_else(|| {
            BusError::LockLost(format!(
                "lock token {lock_token} is not held (already settled or expired)"
            ))
        })?;
        entry.locked_until = now + self.lock_duration;
        Ok(entry.locked_until)
    }

    async fn receive_deferred(
        &self,
        entity: &EntityInfo,
        mode: ReceiveMode,
        sequences: &[i64],
    ) -> BusResult<Vec<ReceivedMessage>> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();
        Self::reap_expired(&entity.name, store, now);

        // Validate the whole batch before removing anything.
        if let Some(missing) = sequences.iter().find(|s| !store.deferred.contains_key(s)) {
            return Err(BusError::MessageReceiveFailed(format!(
                "no deferred message with sequence {missing} on entity {}",
                entity.name
            )));
        }

        let mut delivered = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(message) = store.deferred.remove(sequence) {
                delivered.push(Self::deliver(store, message, mode, now, self.lock_duration));
            }
        }
        Ok(delivered)
    }

    async fn active_count(&self, entity: &EntityInfo) -> BusResult<usize> {
        let now = Utc::now();
        let mut entities = self.entities.lock().await;
        let store = entities.entry(entity.name.clone()).or_default();
        Self::reap_expired(&entity.name, store, now);
        Ok(store.active.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutgoingMessage;

    fn entity() -> EntityInfo {
        EntityInfo::main("unit-test-entity")
    }

    #[tokio::test]
    async fn sequences_are_monotonic_and_fifo_order_is_preserved() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker
                .send(&entity(), OutgoingMessage::text(format!("m{i}")))
                .await
                .unwrap();
        }

        let received = broker
            .receive(&entity(), ReceiveMode::ReceiveAndDelete, None, 5)
            .await
            .unwrap();
        assert_eq!(received.len(), 5);
        for (i, msg) in received.iter().enumerate() {
            assert_eq!(msg.body_str(), format!("m{i}"));
        }
        let sequences: Vec<i64> = received.iter().map(|m| m.sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sequences, sorted);
    }

    #[tokio::test]
    async fn expired_locks_are_reaped_with_incremented_delivery_count() {
        let broker = MemoryBroker::with_lock_duration(Duration::from_millis(10));
        broker
            .send(&entity(), OutgoingMessage::text("locked"))
            .await
            .unwrap();

        let first = broker
            .receive(&entity(), ReceiveMode::PeekLock, None, 1)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].delivery_count, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = broker
            .receive(&entity(), ReceiveMode::PeekLock, None, 1)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_count, 1);
        assert_eq!(second[0].id, first[0].id);
    }

    #[tokio::test]
    async fn settling_twice_fails_with_lock_lost() {
        let broker = MemoryBroker::new();
        broker
            .send(&entity(), OutgoingMessage::text("one"))
            .await
            .unwrap();
        let received = broker
            .receive(&entity(), ReceiveMode::PeekLock, None, 1)
            .await
            .unwrap();
        let token = received[0].lock_token.unwrap();

        broker
            .settle(&entity(), token, Disposition::Complete)
            .await
            .unwrap();
        let err = broker
            .settle(&entity(), token, Disposition::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::LockLost(_)));
    }

    #[tokio::test]
    async fn session_filter_leaves_other_sessions_untouched() {
        let broker = MemoryBroker::new();
        broker
            .send(
                &entity(),
                OutgoingMessage::text("a").with_session_id("s-a"),
            )
            .await
            .unwrap();
        broker
            .send(
                &entity(),
                OutgoingMessage::text("b").with_session_id("s-b"),
            )
            .await
            .unwrap();

        let received = broker
            .receive(&entity(), ReceiveMode::ReceiveAndDelete, Some("s-b"), 10)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].session_id.as_deref(), Some("s-b"));

        assert_eq!(broker.active_count(&entity()).await.unwrap(), 1);
    }
}
