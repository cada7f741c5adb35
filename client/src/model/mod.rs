use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::ser::Serializer;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Receive mode a consumer is created with.
///
/// The mode is fixed at consumer creation time and cannot change for the
/// lifetime of the consumer. It decides what happens to a message at the
/// moment of delivery and which settlement operations are legal afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReceiveMode {
    /// The message stays on the broker, exclusively locked to the receiving
    /// consumer until it is settled or the lock expires.
    PeekLock,
    /// The broker removes the message at delivery time. No settlement is
    /// possible afterwards.
    ReceiveAndDelete,
}

/// A message to be sent to an entity.
///
/// Immutable after send except for broker-assigned metadata (sequence
/// number, delivery count, lock token).
///
/// # Examples
///
/// ```no_run
/// use client::model::OutgoingMessage;
///
/// let msg = OutgoingMessage::text("Hello, world!")
///     .with_message_id("order-12345")
///     .with_session_id("session-1");
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    /// The message body as raw bytes
    pub body: Vec<u8>,
    /// Caller-supplied message id; a v4 UUID is assigned on send when absent
    pub message_id: Option<String>,
    /// Optional session identifier scoping the message to a session
    pub session_id: Option<String>,
    /// Optional custom properties carried with the message
    pub properties: Option<HashMap<String, String>>,
}

impl OutgoingMessage {
    /// Creates a message with the given byte body and no metadata.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            message_id: None,
            session_id: None,
            properties: None,
        }
    }

    /// Creates a message with a UTF-8 text body.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into().into_bytes())
    }

    /// Creates a message with a JSON-serialized body.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be serialized to JSON.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(data)?))
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A message delivered to a consumer.
///
/// Carries the broker-assigned metadata alongside the body. Under
/// [`ReceiveMode::PeekLock`] the message also carries the lock token and
/// lock expiry needed for settlement; under
/// [`ReceiveMode::ReceiveAndDelete`] both are absent because no lock exists.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The sequence number assigned by the broker
    pub sequence: i64,
    /// Unique identifier for the message
    pub id: String,
    /// The message body as raw bytes
    pub body: Vec<u8>,
    /// Number of times the message has been delivered before this delivery
    pub delivery_count: u32,
    /// When the message was enqueued on the broker
    pub enqueued_at: DateTime<Utc>,
    /// Session identifier, if the message belongs to a session
    pub session_id: Option<String>,
    /// The receive mode the message was delivered under
    pub receive_mode: ReceiveMode,
    /// Lock token for settlement; present only under PeekLock
    pub lock_token: Option<Uuid>,
    /// Lock expiry; present only under PeekLock
    pub locked_until: Option<DateTime<Utc>>,
    /// Custom properties carried with the message
    pub properties: HashMap<String, String>,
}

impl ReceivedMessage {
    /// The message body interpreted as UTF-8 text (lossy).
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON, falling back to a raw string view.
    pub fn body_data(&self) -> BodyData {
        BodyData::parse(&self.body)
    }
}

/// Read-only projection of an enqueued message returned by peek.
///
/// Peeking never consumes or locks a message, so a peeked message carries
/// no lock token and cannot be settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeekedMessage {
    /// The sequence number assigned by the broker
    pub sequence: i64,
    /// Unique identifier for the message
    pub id: String,
    /// The message body content
    pub body: BodyData,
    /// Number of times the message has been delivered
    pub delivery_count: u32,
    /// When the message was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Session identifier, if any
    pub session_id: Option<String>,
    /// Current state of the message
    pub state: MessageState,
}

/// Represents the possible states of an enqueued message.
#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MessageState {
    /// Message is active and available for delivery
    #[default]
    Active,
    /// Message has been deferred and must be retrieved by sequence number
    Deferred,
    /// Message has been moved to the dead-letter sub-entity
    DeadLettered,
}

/// Represents the body content of a message.
///
/// Message bodies can be either valid JSON that can be parsed and displayed
/// in a structured format, or raw string content that should be used as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyData {
    /// Message body contains valid JSON data
    ValidJson(Value),
    /// Message body contains raw string data (including invalid JSON)
    RawString(String),
}

impl BodyData {
    /// Attempts to parse bytes as JSON, treating anything else as raw text.
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(val) => BodyData::ValidJson(val),
            Err(_) => BodyData::RawString(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl Serialize for BodyData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BodyData::ValidJson(val) => val.serialize(serializer),
            BodyData::RawString(s) => serializer.serialize_str(s),
        }
    }
}
