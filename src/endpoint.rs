//! # Endpoint Forwarder
//!
//! One forwarder per outbound destination (GCS, ROV). A forwarder owns a
//! connected UDP socket and a bounded outbound queue; sends retry a few
//! times with exponential backoff and are then dropped with a log event,
//! so a dead peer can never stall fix ingestion.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EndpointError;
use crate::event::{ConnectionState, EventSender};

/// Bound on address resolution
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries before a failed send is dropped
pub const MAX_SEND_RETRIES: u32 = 3;

/// First retry backoff; doubles per attempt
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Depth of the outbound queue
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Bound on joining a disconnecting forwarder
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Which destination a forwarder serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Gcs,
    Rov,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Gcs => write!(f, "GCS"),
            EndpointKind::Rov => write!(f, "ROV"),
        }
    }
}

/// Handle to a running forwarder
#[derive(Debug)]
pub struct EndpointHandle {
    kind: EndpointKind,
    peer: SocketAddr,
    queue: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

/// Split a "host:port" string
pub fn parse_address(address: &str) -> Result<(String, u16), EndpointError> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        EndpointError::AddressInvalid(format!("expected host:port, got {:?}", address))
    })?;

    if host.is_empty() {
        return Err(EndpointError::AddressInvalid(format!(
            "empty host in {:?}",
            address
        )));
    }

    let port = port.parse().map_err(|_| {
        EndpointError::AddressInvalid(format!("bad port in {:?}", address))
    })?;

    Ok((host.to_string(), port))
}

/// Connect an outbound endpoint
///
/// Parses and resolves the address, binds an ephemeral UDP socket,
/// connects it to the peer and spawns the forwarder task.
///
/// # Errors
///
/// * `AddressInvalid` - unparseable or unresolvable address
/// * `Timeout` - resolution exceeded [`CONNECT_TIMEOUT`]
/// * `ConnectionRefused` - socket setup failed
pub async fn connect(
    kind: EndpointKind,
    address: &str,
    events: EventSender,
) -> Result<EndpointHandle, EndpointError> {
    let (host, port) = parse_address(address)?;

    let resolved = tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio::net::lookup_host((host.as_str(), port)),
    )
    .await
    .map_err(|_| EndpointError::Timeout(format!("resolving {}", address)))?
    .map_err(|e| EndpointError::AddressInvalid(format!("cannot resolve {}: {}", address, e)))?;

    let peer = resolved.into_iter().next().ok_or_else(|| {
        EndpointError::AddressInvalid(format!("no addresses for {}", address))
    })?;

    let local: SocketAddr = if peer.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await.map_err(io_error)?;
    socket.connect(peer).await.map_err(io_error)?;

    let (queue, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (state_tx, state) = watch::channel(ConnectionState::Connected);

    info!("{} endpoint connected to {}", kind, peer);

    let task = tokio::spawn(run_forwarder(
        kind,
        socket,
        queue_rx,
        shutdown_rx,
        state_tx,
        events,
    ));

    Ok(EndpointHandle {
        kind,
        peer,
        queue,
        shutdown,
        state,
        task,
    })
}

fn io_error(e: std::io::Error) -> EndpointError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => EndpointError::Timeout(e.to_string()),
        _ => EndpointError::ConnectionRefused(e.to_string()),
    }
}

impl EndpointHandle {
    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue a datagram without blocking
    ///
    /// A full queue drops the message with a warning (the wire carries a
    /// continuous stream of fixes, so a fresher one is always coming); a
    /// dead forwarder task reports `NotConnected`.
    pub fn send(&self, payload: Bytes) -> Result<(), EndpointError> {
        match self.queue.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} outbound queue full, dropping message", self.kind);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EndpointError::NotConnected),
        }
    }

    /// Release the connection unconditionally
    pub async fn disconnect(self) {
        let EndpointHandle {
            kind,
            shutdown,
            mut task,
            ..
        } = self;

        let _ = shutdown.send(true);
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }

        info!("{} endpoint disconnected", kind);
    }
}

async fn run_forwarder(
    kind: EndpointKind,
    socket: UdpSocket,
    mut queue: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    events: EventSender,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            message = queue.recv() => match message {
                None => break,
                Some(payload) => match send_with_retry(&socket, &payload, kind).await {
                    Ok(()) => {
                        if *state.borrow() == ConnectionState::Error {
                            let _ = state.send(ConnectionState::Connected);
                        }
                    }
                    Err(e) => {
                        let _ = state.send(ConnectionState::Error);
                        events.error(
                            format!(
                                "dropping message to {} after {} retries",
                                kind, MAX_SEND_RETRIES
                            ),
                            Some(e.to_string()),
                        );
                    }
                },
            }
        }
    }

    let _ = state.send(ConnectionState::Disconnected);
}

async fn send_with_retry(
    socket: &UdpSocket,
    payload: &[u8],
    kind: EndpointKind,
) -> std::io::Result<()> {
    let mut backoff = RETRY_BACKOFF_BASE;

    for attempt in 0..=MAX_SEND_RETRIES {
        match socket.send(payload).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt == MAX_SEND_RETRIES => return Err(e),
            Err(e) => {
                debug!(
                    "send to {} failed (attempt {}): {}",
                    kind,
                    attempt + 1,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }

    unreachable!("retry loop always returns");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn local_receiver() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("localhost:27000").unwrap(),
            ("localhost".to_string(), 27000)
        );
        assert_eq!(
            parse_address("192.168.2.2:25100").unwrap(),
            ("192.168.2.2".to_string(), 25100)
        );
        assert!(parse_address("no-port-here").is_err());
        assert!(parse_address(":27000").is_err());
        assert!(parse_address("host:not-a-port").is_err());
        assert!(parse_address("host:99999").is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_address() {
        let (events, _rx) = EventSender::new();
        let result = connect(EndpointKind::Gcs, "nonsense", events).await;
        assert!(matches!(result, Err(EndpointError::AddressInvalid(_))));
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (receiver, addr) = local_receiver().await;
        let (events, _rx) = EventSender::new();
        let handle = connect(EndpointKind::Rov, &addr, events).await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle.send(Bytes::from_static(b"$GNRMC,test*00\r\n")).unwrap();

        let mut buf = [0u8; 128];
        let (n, _from) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("no datagram received")
            .unwrap();
        assert_eq!(&buf[..n], b"$GNRMC,test*00\r\n");

        handle.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_prompt() {
        let (_receiver, addr) = local_receiver().await;
        let (events, _rx) = EventSender::new();
        let handle = connect(EndpointKind::Gcs, &addr, events).await.unwrap();

        let started = std::time::Instant::now();
        handle.disconnect().await;
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_resolved_peer_is_reported() {
        let (_receiver, addr) = local_receiver().await;
        let (events, _rx) = EventSender::new();
        let handle = connect(EndpointKind::Gcs, &addr, events).await.unwrap();
        assert_eq!(handle.peer().to_string(), addr);
        handle.disconnect().await;
    }
}
