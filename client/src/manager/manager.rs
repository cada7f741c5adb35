use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use super::errors::{BusError, BusResult};
use super::types::EntityInfo;
use crate::broker::{Broker, MemoryBroker};
use crate::config::ConnectionConfig;
use crate::consumer::{Consumer, ConsumerOptions};
use crate::model::PeekedMessage;
use crate::producer::Producer;

/// Process-global registry of in-process brokers, keyed by namespace.
/// Clients built from connection strings naming the same namespace share
/// one broker, so a producer and a consumer built from separate clients
/// see the same entities.
static NAMESPACES: Lazy<StdMutex<HashMap<String, Arc<MemoryBroker>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

/// Entry point of the client library.
///
/// A `BusClient` represents a connection to one namespace. It creates
/// [`Producer`]s and [`Consumer`]s bound to named entities and offers
/// read-only peeking for observability.
///
/// # Examples
///
/// ```no_run
/// use client::consumer::ConsumerOptions;
/// use client::manager::BusClient;
/// use client::model::{OutgoingMessage, ReceiveMode};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = BusClient::from_connection_string(
///         "Endpoint=sb://dev.servicebus.example.net/;SharedAccessKeyName=Root;SharedAccessKey=secret",
///     )?;
///
///     let producer = bus.create_producer("orders");
///     producer.send_message(OutgoingMessage::text("order #1")).await?;
///
///     let consumer = bus.create_consumer(
///         "orders",
///         ConsumerOptions::default().with_receive_mode(ReceiveMode::PeekLock),
///     );
///     for message in consumer.receive_batch(10).await? {
///         consumer.complete_message(&message).await?;
///     }
///     Ok(())
/// }
/// ```
pub struct BusClient {
    namespace: String,
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl BusClient {
    /// Connects to the namespace named by a connection string.
    ///
    /// Validation is strict and happens before any broker activity: a
    /// missing endpoint, key name or key fails fast with
    /// [`BusError::ConfigurationError`].
    pub fn from_connection_string(connection_string: &str) -> BusResult<Self> {
        let config = ConnectionConfig::parse(connection_string)?;
        let broker = {
            let mut namespaces = NAMESPACES
                .lock()
                .map_err(|_| BusError::InternalError("namespace registry poisoned".to_string()))?;
            namespaces
                .entry(config.namespace.clone())
                .or_insert_with(|| Arc::new(MemoryBroker::new()))
                .clone()
        };
        log::info!("Connected client to namespace {}", config.namespace);
        Ok(Self {
            namespace: config.namespace,
            broker,
        })
    }

    /// Creates a client on an explicit broker (test seam and custom
    /// transports).
    pub fn with_broker(namespace: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            namespace: namespace.into(),
            broker,
        }
    }

    /// The namespace this client is connected to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Creates a producer bound to `entity_name`.
    pub fn create_producer(&self, entity_name: &str) -> Producer {
        Producer::new(self.broker.clone(), EntityInfo::from_name(entity_name))
    }

    /// Creates a consumer bound to `entity_name`.
    ///
    /// The receive mode and optional session binding in `options` are fixed
    /// for the lifetime of the consumer.
    pub fn create_consumer(&self, entity_name: &str, options: ConsumerOptions) -> Consumer {
        Consumer::new(self.broker.clone(), EntityInfo::from_name(entity_name), options)
    }

    /// Read-only enumeration of currently active messages on an entity.
    ///
    /// Peeking neither consumes nor locks messages.
    pub async fn peek_messages(
        &self,
        entity_name: &str,
        max_count: usize,
        from_sequence: Option<i64>,
    ) -> BusResult<Vec<PeekedMessage>> {
        self.broker
            .peek(
                &EntityInfo::from_name(entity_name),
                max_count,
                from_sequence,
                None,
            )
            .await
    }

    /// Like [`BusClient::peek_messages`], restricted to one session.
    pub async fn peek_session_messages(
        &self,
        entity_name: &str,
        session_id: &str,
        max_count: usize,
    ) -> BusResult<Vec<PeekedMessage>> {
        self.broker
            .peek(
                &EntityInfo::from_name(entity_name),
                max_count,
                None,
                Some(session_id),
            )
            .await
    }

    /// Number of active messages on an entity.
    pub async fn active_message_count(&self, entity_name: &str) -> BusResult<usize> {
        self.broker
            .active_count(&EntityInfo::from_name(entity_name))
            .await
    }
}
