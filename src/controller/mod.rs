//! # Relay Controller
//!
//! The operation surface a front end consumes: `connect`, `disconnect`,
//! `sync_location`, `set_attribute`, `list_serial_devices`, plus the
//! event stream carrying attribute-changed and log notifications.
//!
//! The controller itself is thin: it validates requests, starts the
//! session's readers and forwarders, and hands the running session to the
//! coordinator task. All public operations are safe to call while readers
//! and forwarders are running; they talk to the session over a command
//! channel.

pub mod coordinator;
pub mod fusion;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{AttrKey, ControllerConfig, RelayConfig};
use crate::endpoint::{self, EndpointKind};
use crate::error::{ConnectError, RelayError, Result, SyncError};
use crate::event::{ConnectionState, ControllerEvent, EventSender};
use crate::fix::FixSource;
use crate::reader::{self, SourceEvent};
use crate::serial;

use coordinator::{Command, Coordinator};

/// Bound on joining a stopping session
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Depth of the fix ingestion channel
const SOURCE_QUEUE_DEPTH: usize = 64;

/// Depth of the command channel
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Maximum age of the newest GPS fix for `sync_location` to proceed
    pub stale_fix_threshold: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            stale_fix_threshold: Duration::from_secs(5),
        }
    }
}

impl From<&RelayConfig> for ControllerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            stale_fix_threshold: Duration::from_millis(config.stale_fix_threshold_ms),
        }
    }
}

/// A live session: the coordinator task plus the channels into it
struct SessionHandle {
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

/// The relay controller
pub struct RelayController {
    settings: ControllerSettings,
    events: EventSender,
    config: ControllerConfig,
    session: Option<SessionHandle>,
}

impl RelayController {
    /// Create a controller and the event stream the caller drains
    pub fn new(
        settings: ControllerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, events_rx) = EventSender::new();
        (
            Self {
                settings,
                events,
                config: ControllerConfig::default(),
                session: None,
            },
            events_rx,
        )
    }

    /// The configuration the controller currently holds
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Session connection state
    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| *session.state.borrow())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// List available serial devices
    pub async fn list_serial_devices(&self) -> Vec<String> {
        serial::list_serial_devices().await
    }

    /// Start a session from the given configuration
    ///
    /// Every configured path is started; a path that fails to start is
    /// logged and skipped, and the first such error is returned while the
    /// surviving paths keep running (degraded session). Only when no path
    /// at all could be started is the session torn down again. A live
    /// session is replaced wholesale, matching the endpoint lifecycle.
    ///
    /// # Errors
    ///
    /// * `InvalidConfig` - no source, no destination, or a bad baud rate
    /// * `Source`/`Endpoint` - the first path start failure
    pub async fn connect(&mut self, config: ControllerConfig) -> std::result::Result<(), ConnectError> {
        if self.session.is_some() {
            self.disconnect().await;
        }

        config.validate()?;
        self.events.info("connecting");

        let (source_tx, source_rx) = mpsc::channel::<SourceEvent>(SOURCE_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let mut first_error: Option<ConnectError> = None;

        let mut endpoints = HashMap::new();
        let destinations = [
            (EndpointKind::Gcs, config.gcs_addr()),
            (EndpointKind::Rov, config.rov_addr()),
        ];
        for (kind, address) in destinations {
            let Some(address) = address else { continue };
            match endpoint::connect(kind, &address, self.events.clone()).await {
                Ok(handle) => {
                    self.events
                        .info(format!("{} endpoint connected to {}", kind, handle.peer()));
                    endpoints.insert(kind, handle);
                }
                Err(e) => {
                    self.events.error(
                        format!("failed to connect {} endpoint at {}", kind, address),
                        Some(e.to_string()),
                    );
                    first_error.get_or_insert(e.into());
                }
            }
        }

        let mut readers = HashMap::new();
        let sources = [
            (FixSource::Gps, config.gps_port.clone()),
            (FixSource::Usbl, config.rovl_port.clone()),
        ];
        for (source, path) in sources {
            let Some(path) = path else { continue };
            match reader::start(source, &path, config.gps_baud, source_tx.clone()).await {
                Ok(handle) => {
                    readers.insert(source, handle);
                }
                Err(e) => {
                    self.events.error(
                        format!("failed to start {} reader on {}", source, path),
                        Some(e.to_string()),
                    );
                    first_error.get_or_insert(e.into());
                }
            }
        }

        if readers.is_empty() && endpoints.is_empty() {
            self.events
                .error("no data paths could be started", None);
            return Err(first_error.unwrap_or_else(|| {
                ConnectError::InvalidConfig("no data paths could be started".to_string())
            }));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let coordinator = Coordinator::new(
            config.clone(),
            self.settings.stale_fix_threshold,
            self.events.clone(),
            readers,
            endpoints,
            source_tx,
            state_tx.clone(),
        );

        let _ = state_tx.send(ConnectionState::Connected);
        let task = tokio::spawn(coordinator.run(source_rx, command_rx, shutdown_rx));

        self.session = Some(SessionHandle {
            commands: command_tx,
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        });
        self.config = config;
        self.events.info("connected");

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Stop the session
    ///
    /// Idempotent and infallible: a second call is a no-op, and teardown
    /// problems are logged rather than propagated.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("disconnect called while already disconnected");
            return;
        };

        let _ = session.shutdown.send(true);
        let mut task = session.task;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!("session did not shut down in time, aborting");
            task.abort();
        }

        self.events.info("disconnected");
    }

    /// Re-synchronize the acoustic reference frame against the GPS origin
    ///
    /// # Errors
    ///
    /// * `NotConnected` - no session, or no valid GPS fix received yet
    /// * `StaleFix` - the newest GPS fix is older than the threshold
    pub async fn sync_location(&self) -> std::result::Result<(), SyncError> {
        let Some(session) = &self.session else {
            return Err(SyncError::NotConnected);
        };

        let (reply, response) = oneshot::channel();
        session
            .commands
            .send(Command::SyncLocation { reply })
            .await
            .map_err(|_| SyncError::NotConnected)?;
        response.await.map_err(|_| SyncError::NotConnected)?
    }

    /// Change one configuration attribute, live or not
    ///
    /// An empty value counts as `None` and disables the path without
    /// touching the others. On success the canonical value (resolved
    /// address, device path) is returned and an attribute-changed event is
    /// emitted.
    pub async fn set_attribute(
        &mut self,
        key: AttrKey,
        value: Option<String>,
    ) -> Result<Option<String>> {
        let value = value.filter(|v| !v.is_empty());

        let canonical = match &self.session {
            Some(session) => {
                let (reply, response) = oneshot::channel();
                session
                    .commands
                    .send(Command::SetAttr {
                        key,
                        value: value.clone(),
                        reply,
                    })
                    .await
                    .map_err(|_| RelayError::Closed)?;
                response.await.map_err(|_| RelayError::Closed)??
            }
            None => {
                let canonical = normalize_attr(key, value.as_deref())?;
                self.events.attr_changed(key, canonical.as_deref());
                canonical
            }
        };

        apply_attr(&mut self.config, key, value);
        Ok(canonical)
    }
}

/// Canonical form of an attribute value while no session is live
fn normalize_attr(key: AttrKey, value: Option<&str>) -> Result<Option<String>> {
    match (key, value) {
        (_, None) => Ok(None),
        (AttrKey::DevGps | AttrKey::DevUsbl, Some(path)) => Ok(Some(path.to_string())),
        (AttrKey::AddrMav | AttrKey::AddrEcho, Some(address)) => {
            let (host, port) = endpoint::parse_address(address)?;
            Ok(Some(format!("{}:{}", host, port)))
        }
    }
}

/// Mirror an attribute change into the stored configuration
fn apply_attr(config: &mut ControllerConfig, key: AttrKey, value: Option<String>) {
    match key {
        AttrKey::DevGps => config.gps_port = value,
        AttrKey::DevUsbl => config.rovl_port = value,
        AttrKey::AddrEcho => match value.as_deref().and_then(|v| endpoint::parse_address(v).ok()) {
            Some((host, port)) => {
                config.gcs_host = Some(host);
                config.gcs_port = port;
            }
            None => config.gcs_host = None,
        },
        AttrKey::AddrMav => match value.as_deref().and_then(|v| endpoint::parse_address(v).ok()) {
            Some((host, port)) => {
                config.rov_host = Some(host);
                config.rov_port = port;
            }
            None => config.rov_host = None,
        },
    }
}
