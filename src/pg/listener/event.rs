use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// One server-side `NOTIFY`, as delivered to a handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Channel the notification was sent on
    pub channel: String,
    /// Opaque payload (empty when none was given)
    pub payload: String,
    /// Backend process that sent it
    pub process_id: i32,
}

impl Notification {
    /// Deserialize the payload as JSON
    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }
}

impl From<tokio_postgres::Notification> for Notification {
    fn from(n: tokio_postgres::Notification) -> Self {
        Self {
            channel: n.channel().to_string(),
            payload: n.payload().to_string(),
            process_id: n.process_id(),
        }
    }
}

/// Connection lifecycle event of a notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The first connection was established
    Connected,
    /// The connection was lost; a reconnect follows
    Disconnected(String),
    /// A connection was re-established after a loss
    Reconnected,
    /// A connection attempt failed
    ConnectionAttemptFailed(String),
}

impl ChannelEvent {
    pub fn is_attempt_failure(&self) -> bool {
        matches!(self, ChannelEvent::ConnectionAttemptFailed(_))
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelEvent::Connected => write!(f, "connected"),
            ChannelEvent::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ChannelEvent::Reconnected => write!(f, "reconnected"),
            ChannelEvent::ConnectionAttemptFailed(reason) => {
                write!(f, "connection attempt failed: {}", reason)
            }
        }
    }
}

/// Observable state of a notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}
