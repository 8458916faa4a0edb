//! # Session Coordinator
//!
//! The single task that owns a running session's shared state: the latest
//! GPS fix, the pre-origin USBL buffer, and the live reader/endpoint sets.
//! Readers and forwarders talk to it over channels only, which is what
//! serializes every mutation of that state.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::{AttrKey, ControllerConfig};
use crate::endpoint::{self, EndpointHandle, EndpointKind};
use crate::error::{RelayError, SyncError};
use crate::event::{ConnectionState, EventSender};
use crate::fix::{FixSource, GpsFix, PositionFix, UsblFix};
use crate::nmea::encoder::encode_rmc;
use crate::nmea::protocol::NMEA_TERMINATOR;
use crate::reader::{self, ReaderHandle, SourceEvent};

use super::fusion;

/// ROVL zero-reference command written on `sync_location`
const ROVL_SYNC_COMMAND: &[u8] = b"D0\r\n";

/// Fused positions between forward-count log lines
const LOG_INTERVAL_FORWARDS: u64 = 100;

/// Requests from the controller's public operations
#[derive(Debug)]
pub(crate) enum Command {
    SetAttr {
        key: AttrKey,
        value: Option<String>,
        reply: oneshot::Sender<Result<Option<String>, RelayError>>,
    },
    SyncLocation {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// Per-session coordinator state
pub(crate) struct Coordinator {
    config: ControllerConfig,
    stale_fix_threshold: Duration,
    events: EventSender,
    readers: HashMap<FixSource, ReaderHandle>,
    endpoints: HashMap<EndpointKind, EndpointHandle>,
    /// Sender handed to restarted readers; kept here so the source channel
    /// stays open for hot reconfiguration
    source_tx: mpsc::Sender<SourceEvent>,
    state: watch::Sender<ConnectionState>,
    last_gps: Option<GpsFix>,
    /// Most recent USBL fix received before any GPS origin
    pending_usbl: Option<UsblFix>,
    forwarded: u64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ControllerConfig,
        stale_fix_threshold: Duration,
        events: EventSender,
        readers: HashMap<FixSource, ReaderHandle>,
        endpoints: HashMap<EndpointKind, EndpointHandle>,
        source_tx: mpsc::Sender<SourceEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            stale_fix_threshold,
            events,
            readers,
            endpoints,
            source_tx,
            state,
            last_gps: None,
            pending_usbl: None,
            forwarded: 0,
        }
    }

    /// Run until shutdown is signaled or every path has failed
    pub(crate) async fn run(
        mut self,
        mut sources: mpsc::Receiver<SourceEvent>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }

                Some(event) = sources.recv() => {
                    if self.handle_source_event(event).await.is_break() {
                        break;
                    }
                }

                else => break,
            }
        }

        self.teardown().await;
    }

    async fn handle_source_event(&mut self, event: SourceEvent) -> ControlFlow<()> {
        match event {
            SourceEvent::Line {
                source: FixSource::Gps,
                line,
            } => {
                self.forward_raw(&line).await;
            }
            SourceEvent::Line { .. } => {}

            SourceEvent::Fix(PositionFix::Gps(fix)) => {
                let first = self.last_gps.is_none();
                self.last_gps = Some(fix);
                if first {
                    self.events.info("GPS origin acquired");
                }
                if let Some(pending) = self.pending_usbl.take() {
                    self.fuse_and_forward(&pending).await;
                }
            }

            SourceEvent::Fix(PositionFix::Usbl(fix)) => {
                if self.last_gps.is_some() {
                    self.fuse_and_forward(&fix).await;
                } else {
                    // Redesign of the original drop-until-origin behavior:
                    // keep the newest relative fix until it can be projected
                    info!("buffering USBL fix until a GPS origin is available");
                    self.pending_usbl = Some(fix);
                }
            }

            SourceEvent::Fault { source, error } => {
                self.events
                    .error(format!("{} reader failed", source), Some(error.to_string()));
                if let Some(handle) = self.readers.remove(&source) {
                    handle.stop().await;
                }
                if source == FixSource::Usbl {
                    self.pending_usbl = None;
                }
                return self.check_paths();
            }
        }

        ControlFlow::Continue(())
    }

    /// Pass a raw GPS line through to the GCS
    async fn forward_raw(&mut self, line: &str) {
        let Some(gcs) = self.endpoints.get(&EndpointKind::Gcs) else {
            return;
        };

        let datagram = Bytes::from(format!("{}{}", line, NMEA_TERMINATOR));
        if gcs.send(datagram).is_err() {
            self.drop_endpoint(EndpointKind::Gcs).await;
        }
    }

    /// Project a USBL fix against the current origin and forward the fused
    /// sentence to every active endpoint
    async fn fuse_and_forward(&mut self, fix: &UsblFix) {
        let Some(origin) = &self.last_gps else {
            return;
        };

        let fused = fusion::fuse_rmc_rth(&origin.data, &fix.data);
        let datagram = Bytes::from(format!("{}{}", encode_rmc(&fused), NMEA_TERMINATOR));

        let mut dead = Vec::new();
        for (kind, handle) in &self.endpoints {
            if handle.send(datagram.clone()).is_err() {
                dead.push(*kind);
            }
        }
        for kind in dead {
            self.drop_endpoint(kind).await;
        }

        self.forwarded += 1;
        if self.forwarded % LOG_INTERVAL_FORWARDS == 0 {
            info!("forwarded {} fused positions", self.forwarded);
        }
        debug!(
            "fused position {:.6},{:.6} (depth {:.1} m)",
            fused.latitude,
            fused.longitude,
            fix.data.depth()
        );
    }

    async fn drop_endpoint(&mut self, kind: EndpointKind) {
        if let Some(handle) = self.endpoints.remove(&kind) {
            self.events
                .error(format!("{} endpoint dropped", kind), None);
            handle.disconnect().await;
        }
    }

    /// Session failure policy: a partial failure keeps the session running
    /// degraded; the session errors out only once every path is gone
    fn check_paths(&mut self) -> ControlFlow<()> {
        if self.readers.is_empty() && self.endpoints.is_empty() {
            let _ = self.state.send(ConnectionState::Error);
            self.events
                .error("all data paths have failed, shutting down session", None);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SyncLocation { reply } => {
                let _ = reply.send(self.sync_location());
            }
            Command::SetAttr { key, value, reply } => {
                let result = self.apply_attr(key, value).await;
                if let Ok(canonical) = &result {
                    self.events.attr_changed(key, canonical.as_deref());
                }
                let _ = reply.send(result);
            }
        }
    }

    /// Reset the acoustic reference frame to the current GPS fix
    ///
    /// The origin itself is always the latest valid fix; what this does is
    /// verify that fix is fresh and tell the ROVL to zero its reference.
    fn sync_location(&mut self) -> Result<(), SyncError> {
        let fix = self.last_gps.as_ref().ok_or(SyncError::NotConnected)?;

        let age = fix.age();
        if age > self.stale_fix_threshold {
            return Err(SyncError::StaleFix {
                age_ms: age.as_millis() as u64,
                threshold_ms: self.stale_fix_threshold.as_millis() as u64,
            });
        }

        if let Some(usbl) = self.readers.get(&FixSource::Usbl) {
            usbl.send_command(ROVL_SYNC_COMMAND.to_vec());
        }
        self.events.info("location sync requested, reference frame reset");
        Ok(())
    }

    /// Apply one configuration attribute to the live session
    ///
    /// Stops the old path first, then starts the replacement if a value was
    /// given. Returns the canonical value for the change notification.
    async fn apply_attr(
        &mut self,
        key: AttrKey,
        value: Option<String>,
    ) -> Result<Option<String>, RelayError> {
        match key {
            AttrKey::DevGps => {
                self.restart_reader(FixSource::Gps, value, |config, path| {
                    config.gps_port = path;
                })
                .await
            }
            AttrKey::DevUsbl => {
                let result = self
                    .restart_reader(FixSource::Usbl, value, |config, path| {
                        config.rovl_port = path;
                    })
                    .await;
                if self.readers.get(&FixSource::Usbl).is_none() {
                    self.pending_usbl = None;
                }
                result
            }
            AttrKey::AddrEcho => {
                self.reconnect_endpoint(EndpointKind::Gcs, value, |config, host, port| {
                    config.gcs_host = host;
                    if let Some(port) = port {
                        config.gcs_port = port;
                    }
                })
                .await
            }
            AttrKey::AddrMav => {
                self.reconnect_endpoint(EndpointKind::Rov, value, |config, host, port| {
                    config.rov_host = host;
                    if let Some(port) = port {
                        config.rov_port = port;
                    }
                })
                .await
            }
        }
    }

    async fn restart_reader(
        &mut self,
        source: FixSource,
        path: Option<String>,
        store: impl FnOnce(&mut ControllerConfig, Option<String>),
    ) -> Result<Option<String>, RelayError> {
        if let Some(handle) = self.readers.remove(&source) {
            handle.stop().await;
        }

        let Some(path) = path else {
            store(&mut self.config, None);
            return Ok(None);
        };

        match reader::start(source, &path, self.config.gps_baud, self.source_tx.clone()).await {
            Ok(handle) => {
                self.readers.insert(source, handle);
                store(&mut self.config, Some(path.clone()));
                Ok(Some(path))
            }
            Err(e) => {
                store(&mut self.config, None);
                self.events.error(
                    format!("failed to start {} reader on {}", source, path),
                    Some(e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    async fn reconnect_endpoint(
        &mut self,
        kind: EndpointKind,
        address: Option<String>,
        store: impl FnOnce(&mut ControllerConfig, Option<String>, Option<u16>),
    ) -> Result<Option<String>, RelayError> {
        if let Some(handle) = self.endpoints.remove(&kind) {
            handle.disconnect().await;
        }

        let Some(address) = address else {
            store(&mut self.config, None, None);
            return Ok(None);
        };

        let (host, port) = endpoint::parse_address(&address)?;
        match endpoint::connect(kind, &address, self.events.clone()).await {
            Ok(handle) => {
                let canonical = handle.peer().to_string();
                self.endpoints.insert(kind, handle);
                store(&mut self.config, Some(host), Some(port));
                Ok(Some(canonical))
            }
            Err(e) => {
                store(&mut self.config, None, None);
                self.events.error(
                    format!("failed to connect {} endpoint at {}", kind, address),
                    Some(e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    async fn teardown(mut self) {
        for (_, handle) in self.readers.drain() {
            handle.stop().await;
        }
        for (_, handle) in self.endpoints.drain() {
            handle.disconnect().await;
        }
        let _ = self.state.send(ConnectionState::Disconnected);
        debug!("session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ControllerEvent;
    use crate::nmea::decoder::{parse_rmc, parse_rth, parse_sentence};
    use std::time::Instant;
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;

    const ORIGIN_LINE: &str = "$GPRMC,120000,A,0000.000,N,00000.000,E,,,010120,,*1C";
    const RTH_EAST_LINE: &str =
        "$USRTH,90.0,90.0,0.0,111319.4908,90.0,90.0,0.0,0.0,0.0,0.0,90.0,10.0*4F";

    fn gps_fix(line: &str) -> GpsFix {
        GpsFix::new(
            parse_rmc(&parse_sentence(line).unwrap()).unwrap(),
            line.to_string(),
        )
    }

    fn usbl_fix(line: &str) -> UsblFix {
        UsblFix::new(parse_rth(&parse_sentence(line).unwrap()).unwrap())
    }

    struct TestSession {
        sources: mpsc::Sender<SourceEvent>,
        commands: mpsc::Sender<Command>,
        shutdown: watch::Sender<bool>,
        state: watch::Receiver<ConnectionState>,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        task: JoinHandle<()>,
    }

    /// Spawn a coordinator wired to the given endpoints, with no readers
    async fn spawn_session(
        endpoints: HashMap<EndpointKind, EndpointHandle>,
        stale_fix_threshold: Duration,
    ) -> TestSession {
        let (events, events_rx) = EventSender::new();
        let (source_tx, source_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);

        let coordinator = Coordinator::new(
            ControllerConfig::default(),
            stale_fix_threshold,
            events,
            HashMap::new(),
            endpoints,
            source_tx.clone(),
            state_tx,
        );

        let task = tokio::spawn(coordinator.run(source_rx, command_rx, shutdown_rx));

        TestSession {
            sources: source_tx,
            commands: command_tx,
            shutdown: shutdown_tx,
            state: state_rx,
            events: events_rx,
            task,
        }
    }

    async fn udp_receiver() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    async fn both_endpoints(
        gcs_addr: &str,
        rov_addr: &str,
    ) -> HashMap<EndpointKind, EndpointHandle> {
        let (events, _rx) = EventSender::new();
        let mut endpoints = HashMap::new();
        endpoints.insert(
            EndpointKind::Gcs,
            endpoint::connect(EndpointKind::Gcs, gcs_addr, events.clone())
                .await
                .unwrap(),
        );
        endpoints.insert(
            EndpointKind::Rov,
            endpoint::connect(EndpointKind::Rov, rov_addr, events)
                .await
                .unwrap(),
        );
        endpoints
    }

    async fn recv_datagram(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 256];
        let (n, _from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("no datagram before timeout")
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    async fn assert_no_datagram(socket: &UdpSocket) {
        let mut buf = [0u8; 256];
        let result =
            tokio::time::timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await;
        assert!(result.is_err(), "unexpected datagram received");
    }

    async fn sync_location(session: &TestSession) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        session
            .commands
            .send(Command::SyncLocation { reply: tx })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_usbl_before_origin_is_buffered_then_forwarded_once() {
        let (gcs_socket, gcs_addr) = udp_receiver().await;
        let (rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let session = spawn_session(endpoints, Duration::from_secs(5)).await;

        // A relative fix with no origin yet: buffered, nothing on the wire
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Usbl(usbl_fix(RTH_EAST_LINE))))
            .await
            .unwrap();
        assert_no_datagram(&rov_socket).await;

        // Origin arrives: the buffered fix is projected and forwarded to
        // both endpoints exactly once
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Gps(gps_fix(ORIGIN_LINE))))
            .await
            .unwrap();

        let to_rov = recv_datagram(&rov_socket).await;
        let to_gcs = recv_datagram(&gcs_socket).await;
        assert!(to_rov.starts_with("$GNRMC,120000,A,"));
        assert_eq!(to_rov, to_gcs);

        // One degree due east of the equator origin
        let fused = parse_rmc(&parse_sentence(to_rov.trim_end()).unwrap()).unwrap();
        assert!(fused.latitude.abs() < 1e-4);
        assert!((fused.longitude - 1.0).abs() < 1e-4);

        // Exactly once: no second datagram follows
        assert_no_datagram(&rov_socket).await;

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_gps_lines_echo_to_gcs_only() {
        let (gcs_socket, gcs_addr) = udp_receiver().await;
        let (rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let session = spawn_session(endpoints, Duration::from_secs(5)).await;

        session
            .sources
            .send(SourceEvent::Line {
                source: FixSource::Gps,
                line: ORIGIN_LINE.to_string(),
            })
            .await
            .unwrap();

        let echoed = recv_datagram(&gcs_socket).await;
        assert_eq!(echoed, format!("{}\r\n", ORIGIN_LINE));
        assert_no_datagram(&rov_socket).await;

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_sync_location_requires_a_fix() {
        let (_gcs_socket, gcs_addr) = udp_receiver().await;
        let (_rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let session = spawn_session(endpoints, Duration::from_secs(5)).await;

        assert!(matches!(
            sync_location(&session).await,
            Err(SyncError::NotConnected)
        ));

        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Gps(gps_fix(ORIGIN_LINE))))
            .await
            .unwrap();
        assert!(sync_location(&session).await.is_ok());

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_sync_location_rejects_stale_fix() {
        let (_gcs_socket, gcs_addr) = udp_receiver().await;
        let (_rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let session = spawn_session(endpoints, Duration::from_millis(50)).await;

        let mut stale = gps_fix(ORIGIN_LINE);
        stale.received_at = Instant::now() - Duration::from_millis(500);
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Gps(stale)))
            .await
            .unwrap();

        match sync_location(&session).await {
            Err(SyncError::StaleFix { age_ms, threshold_ms }) => {
                assert!(age_ms >= 500);
                assert_eq!(threshold_ms, 50);
            }
            other => panic!("expected StaleFix, got {:?}", other),
        }

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_usbl_forwards_immediately_once_origin_exists() {
        let (_gcs_socket, gcs_addr) = udp_receiver().await;
        let (rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let session = spawn_session(endpoints, Duration::from_secs(5)).await;

        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Gps(gps_fix(ORIGIN_LINE))))
            .await
            .unwrap();
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Usbl(usbl_fix(RTH_EAST_LINE))))
            .await
            .unwrap();

        let fused = recv_datagram(&rov_socket).await;
        assert!(fused.starts_with("$GNRMC,"));

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_reader_fault_keeps_session_degraded() {
        let (_gcs_socket, gcs_addr) = udp_receiver().await;
        let (rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let mut session = spawn_session(endpoints, Duration::from_secs(5)).await;

        session
            .sources
            .send(SourceEvent::Fault {
                source: FixSource::Gps,
                error: crate::error::SourceError::SourceUnavailable("unplugged".to_string()),
            })
            .await
            .unwrap();

        // Endpoints survive: a USBL fix with an origin still forwards
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Gps(gps_fix(ORIGIN_LINE))))
            .await
            .unwrap();
        session
            .sources
            .send(SourceEvent::Fix(PositionFix::Usbl(usbl_fix(RTH_EAST_LINE))))
            .await
            .unwrap();
        let _ = recv_datagram(&rov_socket).await;
        assert_eq!(*session.state.borrow_and_update(), ConnectionState::Connected);

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
    }

    #[tokio::test]
    async fn test_shutdown_reports_disconnected_state() {
        let (_gcs_socket, gcs_addr) = udp_receiver().await;
        let (_rov_socket, rov_addr) = udp_receiver().await;
        let endpoints = both_endpoints(&gcs_addr, &rov_addr).await;
        let mut session = spawn_session(endpoints, Duration::from_secs(5)).await;

        let _ = session.shutdown.send(true);
        let _ = session.task.await;
        assert_eq!(
            *session.state.borrow_and_update(),
            ConnectionState::Disconnected
        );

        // The event stream saw no errors during a clean shutdown
        while let Ok(event) = session.events.try_recv() {
            if let ControllerEvent::Log { record } = event {
                assert_ne!(record.level, crate::event::LogLevel::Error);
            }
        }
    }
}
