//! # Position Source Reader
//!
//! One reader per position source (GPS or USBL). A reader owns its input,
//! frames the byte stream into NMEA lines, decodes them into fixes and
//! pushes `SourceEvent`s into the controller's ingestion channel. A small
//! sibling task drains a command channel so device writes (the ROVL sync
//! command) never disturb the read loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::fix::{FixSource, GpsFix, PositionFix, UsblFix};
use crate::nmea::decoder::{parse_rmc, parse_rth, parse_sentence};
use crate::nmea::protocol::{RMC_MNEMONIC, RTH_MNEMONIC};
use crate::serial::{open_source, CommandSink, SourceLines, USBL_BAUD_RATE};

/// Consecutive undecodable frames before the reader gives up
pub const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 10;

/// Bound on joining a stopping reader
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Depth of the device command queue
const COMMAND_QUEUE_DEPTH: usize = 8;

/// What a reader reports to the controller
#[derive(Debug)]
pub enum SourceEvent {
    /// A raw line as received (GPS only; used for pass-through forwarding)
    Line { source: FixSource, line: String },

    /// A decoded position fix
    Fix(PositionFix),

    /// The reader hit a fatal fault and stopped
    Fault {
        source: FixSource,
        error: SourceError,
    },
}

/// Handle to a running reader
#[derive(Debug)]
pub struct ReaderHandle {
    source: FixSource,
    path: String,
    shutdown: watch::Sender<bool>,
    commands: mpsc::Sender<Vec<u8>>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

/// Start a reader on the given device or replay file
///
/// The GPS variant uses the configured baud rate; the USBL variant always
/// opens at the ROVL's fixed 115200.
///
/// # Errors
///
/// * `SourceUnavailable` - the device or file cannot be opened
/// * `ProtocolError` - a replay file whose first bytes are not NMEA framed
pub async fn start(
    source: FixSource,
    path: &str,
    baud: u32,
    events: mpsc::Sender<SourceEvent>,
) -> Result<ReaderHandle, SourceError> {
    let baud = match source {
        FixSource::Gps => baud,
        FixSource::Usbl => USBL_BAUD_RATE,
    };

    let (lines, sink) = open_source(path, baud).await?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    info!("{} reader started on {}", source, path);

    let read_task = tokio::spawn(read_loop(source, lines, events, shutdown_rx));
    let write_task = tokio::spawn(write_loop(sink, commands_rx));

    Ok(ReaderHandle {
        source,
        path: path.to_string(),
        shutdown,
        commands,
        read_task,
        write_task,
    })
}

impl ReaderHandle {
    pub fn source(&self) -> FixSource {
        self.source
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Queue a device command for the writer task
    pub fn send_command(&self, data: Vec<u8>) {
        if self.commands.try_send(data).is_err() {
            warn!("{} reader command queue unavailable, command dropped", self.source);
        }
    }

    /// Stop the reader and release the underlying device
    ///
    /// Signals shutdown, then joins both tasks with a bounded wait,
    /// aborting if a blocked read refuses to finish.
    pub async fn stop(self) {
        let ReaderHandle {
            source,
            shutdown,
            commands,
            mut read_task,
            mut write_task,
            ..
        } = self;

        let _ = shutdown.send(true);
        drop(commands);

        if tokio::time::timeout(STOP_TIMEOUT, &mut read_task).await.is_err() {
            warn!("{} reader did not stop in time, aborting", source);
            read_task.abort();
        }
        if tokio::time::timeout(STOP_TIMEOUT, &mut write_task).await.is_err() {
            write_task.abort();
        }

        info!("{} reader stopped", source);
    }
}

async fn read_loop(
    source: FixSource,
    mut lines: SourceLines,
    events: mpsc::Sender<SourceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            result = lines.next_line() => match result {
                Ok(line) => {
                    if line.is_empty() {
                        continue;
                    }

                    match process_line(source, &line, &events).await {
                        Ok(true) => consecutive_errors = 0,
                        Ok(false) => break, // controller went away
                        Err(e) => {
                            debug!("skipping malformed {} frame: {}", source, e);
                            consecutive_errors += 1;
                            if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                                let error = SourceError::ProtocolError(format!(
                                    "{} consecutive undecodable frames on {}",
                                    consecutive_errors,
                                    lines.path()
                                ));
                                let _ = events.send(SourceEvent::Fault { source, error }).await;
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    let error = SourceError::SourceUnavailable(format!(
                        "{}: {}",
                        lines.path(),
                        e
                    ));
                    let _ = events.send(SourceEvent::Fault { source, error }).await;
                    break;
                }
            }
        }
    }
}

/// Decode one line and emit the resulting events
///
/// Returns `Ok(false)` when the event channel is closed, `Err` for a frame
/// that should count against the consecutive-failure threshold.
async fn process_line(
    source: FixSource,
    line: &str,
    events: &mpsc::Sender<SourceEvent>,
) -> Result<bool, SourceError> {
    // GPS lines pass through raw before any decoding, matching the relay's
    // original echo behavior
    if source == FixSource::Gps {
        let event = SourceEvent::Line {
            source,
            line: line.to_string(),
        };
        if events.send(event).await.is_err() {
            return Ok(false);
        }
    }

    let sentence = parse_sentence(line)?;

    let fix = match source {
        FixSource::Gps => {
            if sentence.mnemonic != RMC_MNEMONIC {
                return Ok(true);
            }
            let rmc = parse_rmc(&sentence)?;
            if !rmc.valid {
                info!("no GPS fix");
                return Ok(true);
            }
            PositionFix::Gps(GpsFix::new(rmc, line.to_string()))
        }
        FixSource::Usbl => {
            if sentence.mnemonic != RTH_MNEMONIC {
                debug!(
                    "ignoring unexpected {} sentence from USBL",
                    sentence.mnemonic
                );
                return Ok(true);
            }
            PositionFix::Usbl(UsblFix::new(parse_rth(&sentence)?))
        }
    };

    Ok(events.send(SourceEvent::Fix(fix)).await.is_ok())
}

async fn write_loop(mut sink: CommandSink, mut commands: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = commands.recv().await {
        if let Err(e) = sink.write_command(&data).await {
            warn!("device command write failed: {}", e);
        }
    }
}
