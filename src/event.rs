//! # Controller Events
//!
//! Notifications delivered to the embedding front end: attribute-changed
//! events and log events. Every event is also mirrored to `tracing`, so an
//! attached UI and the process log see the same stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::AttrKey;

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// A single log record produced by any component
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Connection state of an endpoint or of the controller session
///
/// The session is `Connected` while at least one active path survives;
/// `Error` is entered only when every active path has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// A notification delivered to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// A configuration attribute changed; `value` is the canonical form
    /// (resolved address, normalized device path) or `None` when the path
    /// was disabled
    AttrChanged {
        key: AttrKey,
        value: Option<String>,
    },

    /// A log record
    Log { record: LogEvent },
}

impl ControllerEvent {
    /// Serialize for delivery across an RPC bridge to a UI
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event":"log","error":"serialization failed: {}"}}"#, e)
        })
    }
}

/// Cloneable event emitter shared by every component of a session
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl EventSender {
    /// Create an emitter and the receiver the caller drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an info log event
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(ControllerEvent::Log {
            record: LogEvent {
                level: LogLevel::Info,
                message,
                detail: None,
                timestamp: Utc::now(),
            },
        });
    }

    /// Emit an error log event with optional detail
    pub fn error(&self, message: impl Into<String>, detail: Option<String>) {
        let message = message.into();
        match &detail {
            Some(detail) => error!("{}: {}", message, detail),
            None => error!("{}", message),
        }
        self.send(ControllerEvent::Log {
            record: LogEvent {
                level: LogLevel::Error,
                message,
                detail,
                timestamp: Utc::now(),
            },
        });
    }

    /// Emit an attribute-changed notification
    pub fn attr_changed(&self, key: AttrKey, value: Option<&str>) {
        info!("{} is now {}", key, value.unwrap_or("null"));
        self.send(ControllerEvent::AttrChanged {
            key,
            value: value.map(str::to_string),
        });
    }

    fn send(&self, event: ControllerEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}
