use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::manager::{BusError, BusResult, EntityInfo};
use crate::model::{ReceiveMode, ReceivedMessage};
use crate::settlement::{self, Disposition, SettlementOperation};

/// Poll interval used while waiting for messages to become available.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default short internal wait for [`Consumer::receive_batch`].
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Options for creating a [`Consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Receive mode; fixed for the lifetime of the consumer
    pub receive_mode: ReceiveMode,
    /// Bind the consumer to one session; all receives are scoped to it
    pub session_id: Option<String>,
    /// Short internal wait for batch receives before returning empty
    pub max_wait: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            receive_mode: ReceiveMode::PeekLock,
            session_id: None,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ConsumerOptions {
    pub fn with_receive_mode(mut self, receive_mode: ReceiveMode) -> Self {
        self.receive_mode = receive_mode;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Options for [`Consumer::stream`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Under PeekLock, complete a message after the handler succeeds and
    /// abandon it after the handler fails. Ignored under ReceiveAndDelete,
    /// where the broker removed the message at delivery time.
    pub auto_complete: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
        }
    }
}

/// Handle to a running streaming receive.
///
/// Stopping (or dropping) the handle halts further deliveries. Messages
/// already dispatched to the handler stay dispatched.
pub struct StreamHandle {
    cancel_token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Requests the streaming loop to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Stops the streaming loop and waits for it to finish.
    pub async fn stopped(mut self) {
        self.cancel_token.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// A receiver bound to one entity, with a fixed receive mode and an
/// optional session scope.
///
/// Supports pull-mode consumption via [`Consumer::receive_batch`] and
/// push-mode consumption via [`Consumer::stream`]. All dispositions and
/// lock renewals pass through the settlement gate first: under
/// [`ReceiveMode::ReceiveAndDelete`] they fail locally, without a broker
/// round-trip, because no lock exists to operate on.
pub struct Consumer {
    inner: Arc<Mutex<Option<ConsumerInner>>>,
}

#[derive(Clone)]
struct ConsumerInner {
    broker: Arc<dyn Broker>,
    entity: EntityInfo,
    mode: ReceiveMode,
    session: Option<String>,
    max_wait: Duration,
}

impl Consumer {
    pub(crate) fn new(broker: Arc<dyn Broker>, entity: EntityInfo, options: ConsumerOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(ConsumerInner {
                broker,
                entity,
                mode: options.receive_mode,
                session: options.session_id,
                max_wait: options.max_wait,
            }))),
        }
    }

    /// The receive mode this consumer was created with.
    pub async fn receive_mode(&self) -> BusResult<ReceiveMode> {
        Ok(self.snapshot().await?.mode)
    }

    /// The session this consumer is bound to, if any.
    pub async fn session_id(&self) -> BusResult<Option<String>> {
        Ok(self.snapshot().await?.session)
    }

    /// Receives up to `max_count` messages.
    ///
    /// Returns as soon as at least one message is available, or an empty
    /// vector once the consumer's short internal wait elapses. Never blocks
    /// indefinitely; an empty entity is not an error.
    pub async fn receive_batch(&self, max_count: usize) -> BusResult<Vec<ReceivedMessage>> {
        let inner = self.snapshot().await?;
        let deadline = Instant::now() + inner.max_wait;

        loop {
            let messages = inner
                .broker
                .receive(&inner.entity, inner.mode, inner.session.as_deref(), max_count)
                .await?;
            if !messages.is_empty() {
                return Ok(messages);
            }
            if Instant::now() >= deadline {
                log::debug!(
                    "receive_batch timed out after {:?} on entity {}, returning empty result",
                    inner.max_wait,
                    inner.entity.name
                );
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Completes a received message, removing it permanently.
    pub async fn complete_message(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.settle_message(message, Disposition::Complete).await
    }

    /// Abandons a received message, returning it for redelivery.
    pub async fn abandon_message(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.settle_message(message, Disposition::Abandon).await
    }

    /// Defers a received message. Deferred messages are retrieved by
    /// sequence number via [`Consumer::receive_deferred_messages`].
    pub async fn defer_message(&self, message: &ReceivedMessage) -> BusResult<()> {
        self.settle_message(message, Disposition::Defer).await
    }

    /// Moves a received message to the dead-letter sub-entity.
    pub async fn dead_letter_message(
        &self,
        message: &ReceivedMessage,
        reason: Option<String>,
        error_description: Option<String>,
    ) -> BusResult<()> {
        self.settle_message(
            message,
            Disposition::DeadLetter {
                reason,
                description: error_description,
            },
        )
        .await
    }

    /// Extends the lock on a received message, updating its lock expiry.
    pub async fn renew_message_lock(&self, message: &mut ReceivedMessage) -> BusResult<()> {
        let inner = self.snapshot().await?;
        settlement::ensure_settleable(inner.mode, SettlementOperation::RenewLock)?;

        let lock_token = message
            .lock_token
            .ok_or_else(|| BusError::LockLost("message carries no lock token".to_string()))?;
        let locked_until = inner.broker.renew_lock(&inner.entity, lock_token).await?;
        message.locked_until = Some(locked_until);
        Ok(())
    }

    /// Retrieves previously deferred messages by sequence number so they
    /// can be settled without re-activating them first.
    pub async fn receive_deferred_messages(
        &self,
        sequences: &[i64],
    ) -> BusResult<Vec<ReceivedMessage>> {
        let inner = self.snapshot().await?;
        inner
            .broker
            .receive_deferred(&inner.entity, inner.mode, sequences)
            .await
    }

    /// Registers a continuous push-mode receive loop on a spawned task.
    ///
    /// Each delivered message is passed to `handler`. Handler and transport
    /// errors are surfaced through `on_error` rather than panicking the
    /// task. With [`StreamOptions::auto_complete`] under PeekLock, a
    /// successful handler completes the message and a failed handler
    /// abandons it.
    ///
    /// The returned [`StreamHandle`] stops the loop; messages already
    /// dispatched to the handler are not un-delivered. No ordering
    /// guarantee is made across in-flight handler invocations.
    pub async fn stream<H, HF, E>(
        &self,
        handler: H,
        on_error: E,
        options: StreamOptions,
    ) -> BusResult<StreamHandle>
    where
        H: Fn(ReceivedMessage) -> HF + Send + Sync + 'static,
        HF: Future<Output = Result<(), BusError>> + Send + 'static,
        E: Fn(BusError) + Send + Sync + 'static,
    {
        let inner = self.snapshot().await?;
        let cancel_token = CancellationToken::new();
        let loop_token = cancel_token.clone();

        let join = tokio::spawn(async move {
            log::debug!("Streaming receive started for entity {}", inner.entity.name);
            loop {
                let received = tokio::select! {
                    () = loop_token.cancelled() => break,
                    res = inner.broker.receive(
                        &inner.entity,
                        inner.mode,
                        inner.session.as_deref(),
                        1,
                    ) => res,
                };

                match received {
                    Ok(messages) if messages.is_empty() => {
                        tokio::select! {
                            () = loop_token.cancelled() => break,
                            () = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                    Ok(messages) => {
                        for message in messages {
                            let lock_token = message.lock_token;
                            let outcome = handler(message).await;
                            if !options.auto_complete || inner.mode != ReceiveMode::PeekLock {
                                if let Err(e) = outcome {
                                    on_error(e);
                                }
                                continue;
                            }

                            let disposition = match outcome {
                                Ok(()) => Disposition::Complete,
                                Err(e) => {
                                    on_error(e);
                                    Disposition::Abandon
                                }
                            };
                            if let Some(token) = lock_token {
                                if let Err(e) = inner
                                    .broker
                                    .settle(&inner.entity, token, disposition)
                                    .await
                                {
                                    on_error(e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        on_error(e);
                        tokio::select! {
                            () = loop_token.cancelled() => break,
                            () = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                }
            }
            log::debug!("Streaming receive stopped for entity {}", inner.entity.name);
        });

        Ok(StreamHandle {
            cancel_token,
            join: Some(join),
        })
    }

    /// Releases the consumer. All later operations fail.
    pub async fn dispose(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            log::debug!("Disposed consumer for entity {}", inner.entity.name);
        }
    }

    async fn settle_message(
        &self,
        message: &ReceivedMessage,
        disposition: Disposition,
    ) -> BusResult<()> {
        let inner = self.snapshot().await?;
        // Gate before any broker call: ReceiveAndDelete rejects locally.
        settlement::ensure_settleable(inner.mode, disposition.kind())?;

        let lock_token = message
            .lock_token
            .ok_or_else(|| BusError::LockLost("message carries no lock token".to_string()))?;
        inner
            .broker
            .settle(&inner.entity, lock_token, disposition)
            .await
    }

    async fn snapshot(&self) -> BusResult<ConsumerInner> {
        let guard = self.inner.lock().await;
        guard.as_ref().cloned().ok_or(BusError::ConsumerDisposed)
    }
}
