//! Connection string parsing and validation.
//!
//! Connection strings follow the
//! `Endpoint=sb://<namespace>...;SharedAccessKeyName=<name>;SharedAccessKey=<key>`
//! shape. Parsing is strict: every component must be present and non-empty,
//! and validation happens before any broker activity so that
//! misconfiguration fails fast at client construction.

use thiserror::Error;

/// Errors that can occur while parsing a connection string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    /// The connection string is empty or whitespace-only
    #[error("Connection string cannot be empty")]
    Empty,

    /// No `Endpoint=` component was found
    #[error("Missing Endpoint in connection string")]
    MissingEndpoint,

    /// The endpoint did not contain a parseable namespace
    #[error("Malformed endpoint in connection string: {0}")]
    MalformedEndpoint(String),

    /// No `SharedAccessKeyName=` component was found
    #[error("Missing SharedAccessKeyName in connection string")]
    MissingKeyName,

    /// No `SharedAccessKey=` component was found
    #[error("Missing SharedAccessKey in connection string")]
    MissingKey,
}

/// Validated connection parameters extracted from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Namespace the client connects to (host label of the endpoint)
    pub namespace: String,
    /// Name of the shared access key
    pub key_name: String,
    /// The shared access key itself
    pub key: String,
}

impl ConnectionConfig {
    /// Parses a connection string into its components.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionStringError`] when the string is empty or any
    /// required component is missing or malformed.
    pub fn parse(connection_string: &str) -> Result<Self, ConnectionStringError> {
        if connection_string.trim().is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some(ep) = part.strip_prefix("Endpoint=") {
                endpoint = Some(ep.to_string());
            } else if let Some(kn) = part.strip_prefix("SharedAccessKeyName=") {
                key_name = Some(kn.to_string());
            } else if let Some(k) = part.strip_prefix("SharedAccessKey=") {
                key = Some(k.to_string());
            }
        }

        let endpoint = endpoint.ok_or(ConnectionStringError::MissingEndpoint)?;
        let namespace = Self::namespace_from_endpoint(&endpoint)
            .ok_or_else(|| ConnectionStringError::MalformedEndpoint(endpoint.clone()))?;

        let key_name = key_name
            .filter(|kn| !kn.is_empty())
            .ok_or(ConnectionStringError::MissingKeyName)?;
        let key = key
            .filter(|k| !k.is_empty())
            .ok_or(ConnectionStringError::MissingKey)?;

        Ok(Self {
            namespace,
            key_name,
            key,
        })
    }

    /// Extracts the namespace from an endpoint like
    /// `sb://namespace.servicebus.example.net/`.
    fn namespace_from_endpoint(endpoint: &str) -> Option<String> {
        let ns_start = endpoint.find("://")?;
        let host = &endpoint[ns_start + 3..];
        let host = host.trim_end_matches('/');
        if host.is_empty() {
            return None;
        }
        match host.find('.') {
            Some(0) => None,
            Some(dot_pos) => Some(host[..dot_pos].to_string()),
            // Bare namespace without a domain suffix is accepted
            None => Some(host.to_string()),
        }
    }
}
