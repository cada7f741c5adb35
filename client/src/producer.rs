use std::sync::Arc;
use tokio::sync::Mutex;

use crate::broker::Broker;
use crate::manager::{BusError, BusResult, EntityInfo};
use crate::model::OutgoingMessage;

/// A sender bound to one entity.
///
/// The Producer is a thin pass-through: it builds a message envelope and
/// submits it to the broker. No retry or backoff happens at this layer.
///
/// # Thread Safety
///
/// The Producer is thread-safe and can be shared across async tasks. The
/// underlying binding is protected by a mutex so disposal is safe under
/// concurrent use.
///
/// # Examples
///
/// ```no_run
/// use client::model::OutgoingMessage;
/// use client::producer::Producer;
///
/// async fn example(producer: &Producer) -> Result<(), Box<dyn std::error::Error>> {
///     producer
///         .send_message(OutgoingMessage::text("Hello, world!"))
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Producer {
    inner: Arc<Mutex<Option<ProducerInner>>>,
}

struct ProducerInner {
    broker: Arc<dyn Broker>,
    entity: EntityInfo,
}

impl Producer {
    pub(crate) fn new(broker: Arc<dyn Broker>, entity: EntityInfo) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(ProducerInner { broker, entity }))),
        }
    }

    /// The entity this producer is bound to.
    pub async fn entity(&self) -> BusResult<EntityInfo> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|inner| inner.entity.clone())
            .ok_or(BusError::ProducerDisposed)
    }

    /// Sends a single message to the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer has been disposed or the broker
    /// rejects the message.
    pub async fn send_message(&self, message: OutgoingMessage) -> BusResult<()> {
        let guard = self.inner.lock().await;
        let inner = guard.as_ref().ok_or(BusError::ProducerDisposed)?;
        inner
            .broker
            .send(&inner.entity, message)
            .await
            .map_err(|e| match e {
                BusError::TransportFailure(_) => e,
                other => BusError::MessageSendFailed(other.to_string()),
            })
    }

    /// Sends multiple messages to the entity.
    ///
    /// Messages are submitted in order; the first failure aborts the batch.
    pub async fn send_messages(&self, messages: Vec<OutgoingMessage>) -> BusResult<()> {
        let guard = self.inner.lock().await;
        let inner = guard.as_ref().ok_or(BusError::ProducerDisposed)?;
        let total = messages.len();
        for (sent, message) in messages.into_iter().enumerate() {
            inner.broker.send(&inner.entity, message).await.map_err(|e| {
                BusError::MessageSendFailed(format!(
                    "batch send failed after {sent} of {total} messages: {e}"
                ))
            })?;
        }
        log::debug!("Sent batch of {total} messages to {}", inner.entity.name);
        Ok(())
    }

    /// Releases the producer. All later operations fail.
    pub async fn dispose(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            log::debug!("Disposed producer for entity {}", inner.entity.name);
        }
    }
}
