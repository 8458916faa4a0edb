//! # Serial Sources Module
//!
//! Everything that touches a local device:
//! - Enumerating serial ports (bounded, never fatal)
//! - Watching the port list for hot-plug changes
//! - Opening a position source: a serial device at 8N1, or a replay file
//!   (a text file of NMEA lines cycled at a fixed pace, standing in for a
//!   receiver during bench testing)

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::SourceError;

/// Fixed baud rate of the ROVL receiver
pub const USBL_BAUD_RATE: u32 = 115_200;

/// Upper bound on a single enumeration scan
pub const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Pace at which a replay source emits lines
const REPLAY_LINE_INTERVAL: Duration = Duration::from_millis(100);

/// List available serial devices
///
/// Never fails: an enumeration error or timeout is logged as a warning and
/// reported as an empty list, since a machine with no serial ports is an
/// ordinary situation, not a fault.
pub async fn list_serial_devices() -> Vec<String> {
    let scan = tokio::task::spawn_blocking(tokio_serial::available_ports);

    match tokio::time::timeout(ENUMERATION_TIMEOUT, scan).await {
        Ok(Ok(Ok(ports))) => ports.into_iter().map(|p| p.port_name).collect(),
        Ok(Ok(Err(e))) => {
            warn!("serial enumeration failed: {}", e);
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!("serial enumeration task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("serial enumeration timed out");
            Vec::new()
        }
    }
}

/// Push-style serial device watcher
///
/// Polls the port list on one shared task and publishes it over a `watch`
/// channel whenever it changes, so any number of consumers can subscribe
/// without each running their own poll loop.
#[derive(Debug)]
pub struct DeviceWatcher {
    changes: watch::Receiver<Vec<String>>,
    task: JoinHandle<()>,
}

/// Start watching the serial device list at the given period
pub fn watch_serial_devices(period: Duration) -> DeviceWatcher {
    let (tx, rx) = watch::channel(Vec::new());

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let devices = list_serial_devices().await;
            let changed = *tx.borrow() != devices;
            if changed && tx.send(devices).is_err() {
                break;
            }
            if tx.is_closed() {
                break;
            }
        }
    });

    DeviceWatcher { changes: rx, task }
}

impl DeviceWatcher {
    /// The most recently published device list
    pub fn current(&self) -> Vec<String> {
        self.changes.borrow().clone()
    }

    /// Wait for the next change and return the new list
    pub async fn changed(&mut self) -> Vec<String> {
        if self.changes.changed().await.is_err() {
            return Vec::new();
        }
        self.changes.borrow_and_update().clone()
    }

    /// Stop the watcher task
    pub fn stop(self) {
        self.task.abort();
    }
}

/// The readable half of an opened position source
pub enum SourceLines {
    Serial {
        reader: BufReader<ReadHalf<SerialStream>>,
        path: String,
    },
    Replay(ReplayStream),
}

/// The writable half of an opened position source
///
/// Used for device commands (the ROVL `D0` sync). Replay sources accept
/// writes and log them, like the bench-test serial stub they replace.
pub enum CommandSink {
    Serial { writer: WriteHalf<SerialStream>, path: String },
    Replay { path: String },
}

/// Replays a file of NMEA lines in a loop at a fixed pace
#[derive(Debug)]
pub struct ReplayStream {
    path: String,
    lines: Vec<String>,
    next: usize,
    ticker: tokio::time::Interval,
}

impl ReplayStream {
    async fn open(path: &str) -> Result<Self, SourceError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            SourceError::SourceUnavailable(format!("failed to read replay file {}: {}", path, e))
        })?;

        let lines: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if lines.is_empty() {
            return Err(SourceError::SourceUnavailable(format!(
                "replay file {} is empty",
                path
            )));
        }

        // Cheap framing sniff: a replay file that is not NMEA at all should
        // fail start() instead of producing a stream of skipped frames
        if !lines[0].starts_with('$') {
            return Err(SourceError::ProtocolError(format!(
                "replay file {} does not look like NMEA (first line {:?})",
                path, lines[0]
            )));
        }

        info!("replaying {} lines from {}", lines.len(), path);

        Ok(Self {
            path: path.to_string(),
            lines,
            next: 0,
            ticker: tokio::time::interval(REPLAY_LINE_INTERVAL),
        })
    }

    async fn next_line(&mut self) -> std::io::Result<String> {
        self.ticker.tick().await;
        let line = self.lines[self.next].clone();
        self.next = (self.next + 1) % self.lines.len();
        Ok(line)
    }
}

/// Open a position source
///
/// A path naming an existing regular file is opened as a replay source;
/// anything else is opened as a serial device at `baud`, 8N1.
///
/// # Errors
///
/// * `SourceUnavailable` - device cannot be opened, file missing or empty
/// * `ProtocolError` - a replay file whose content is not NMEA framed
pub async fn open_source(path: &str, baud: u32) -> Result<(SourceLines, CommandSink), SourceError> {
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    if is_file {
        let stream = ReplayStream::open(path).await?;
        return Ok((
            SourceLines::Replay(stream),
            CommandSink::Replay {
                path: path.to_string(),
            },
        ));
    }

    let port = tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| {
            SourceError::SourceUnavailable(format!("failed to open {}: {}", path, e))
        })?;

    info!("opened serial device {} at {} baud", path, baud);

    let (read_half, write_half) = tokio::io::split(port);
    Ok((
        SourceLines::Serial {
            reader: BufReader::new(read_half),
            path: path.to_string(),
        },
        CommandSink::Serial {
            writer: write_half,
            path: path.to_string(),
        },
    ))
}

impl SourceLines {
    /// Read the next line, without the terminator
    ///
    /// A closed serial device surfaces as `UnexpectedEof`; a replay source
    /// cycles forever.
    pub async fn next_line(&mut self) -> std::io::Result<String> {
        match self {
            SourceLines::Serial { reader, path } => {
                let mut line = String::new();
                let n = reader.read_line(&mut line).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("serial port {} closed", path),
                    ));
                }
                Ok(line.trim_end_matches(['\r', '\n']).to_string())
            }
            SourceLines::Replay(stream) => stream.next_line().await,
        }
    }

    /// Path of the underlying device or file
    pub fn path(&self) -> &str {
        match self {
            SourceLines::Serial { path, .. } => path,
            SourceLines::Replay(stream) => &stream.path,
        }
    }
}

impl CommandSink {
    /// Write a device command
    pub async fn write_command(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            CommandSink::Serial { writer, path } => {
                writer.write_all(data).await?;
                writer.flush().await?;
                debug!("wrote {} byte command to {}", data.len(), path);
                Ok(())
            }
            CommandSink::Replay { path } => {
                debug!("pretending to write {:?} to replay source {}", data, path);
                Ok(())
            }
        }
    }
}
