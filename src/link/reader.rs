//! Serial ingestion thread and outbound command writer.

use crate::clock::Clock;
use crate::link::protocol::{DeviceCommand, DeviceMessage};
use crate::telemetry::SharedStats;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Longest line kept while waiting for a terminator.
const MAX_LINE_BYTES: usize = 512;

/// Errors raised by the device link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link reader is already running")]
    AlreadyRunning,
    #[error("Serial IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits a byte stream into lines across read boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every line completed by them.
    ///
    /// A line longer than [`MAX_LINE_BYTES`] is discarded up to its terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if !self.overflowed {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                }
                self.pending.clear();
                self.overflowed = false;
            } else if self.pending.len() < MAX_LINE_BYTES {
                self.pending.push(byte);
            } else {
                self.overflowed = true;
            }
        }

        lines
    }

    /// Bytes held while waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Reads device lines on a background thread and queues parsed messages.
///
/// Every message is forwarded in arrival order over a single bounded queue,
/// so button edges keep their relative order. A link is started once; the
/// owner reconnects by building a new `DeviceLink` around a new reader.
pub struct DeviceLink {
    sender: Option<Sender<DeviceMessage>>,
    receiver: Receiver<DeviceMessage>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceLink {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(4_096);
        Self {
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start reading `source` on a background thread.
    pub fn start<R>(
        &mut self,
        source: R,
        clock: Arc<dyn Clock>,
        stats: SharedStats,
    ) -> Result<(), LinkError>
    where
        R: Read + Send + 'static,
    {
        let sender = match self.sender.take() {
            Some(sender) if !self.running.load(Ordering::SeqCst) => sender,
            _ => return Err(LinkError::AlreadyRunning),
        };

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = read_loop(source, &sender, &running, clock.as_ref(), &stats) {
                tracing::warn!("Device link reader stopped: {e}");
            }
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Ask the reader to stop.
    ///
    /// A reader blocked inside `read` exits after its next chunk; it is
    /// joined only if it has already finished.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Whether the reader thread is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver for parsed messages.
    pub fn receiver(&self) -> &Receiver<DeviceMessage> {
        &self.receiver
    }

    /// Clone of the receiver; it disconnects once the reader thread ends,
    /// which happens at end of stream or on a read error.
    pub fn subscribe(&self) -> Receiver<DeviceMessage> {
        self.receiver.clone()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Option<DeviceMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Default for DeviceLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop<R: Read>(
    mut source: R,
    sender: &Sender<DeviceMessage>,
    running: &AtomicBool,
    clock: &dyn Clock,
    stats: &SharedStats,
) -> Result<(), LinkError> {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 256];

    while running.load(Ordering::SeqCst) {
        let read = match source.read(&mut chunk) {
            Ok(0) => {
                tracing::info!("Device link reached end of stream");
                return Ok(());
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for line in buffer.push(&chunk[..read]) {
            let message = DeviceMessage::parse(&line, clock.now());
            if !message.is_known() {
                stats.record_line_dropped();
                tracing::debug!("Dropping unrecognized device line: {line:?}");
                continue;
            }

            stats.record_line_parsed();
            if sender.send(message).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Outbound side of the link: one line per command.
pub trait CommandSink: Send {
    fn send(&mut self, command: DeviceCommand) -> Result<(), LinkError>;
}

/// Writes commands as newline-terminated lines.
pub struct LineWriter<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> CommandSink for LineWriter<W> {
    fn send(&mut self, command: DeviceCommand) -> Result<(), LinkError> {
        self.inner.write_all(command.as_line().as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Sink that discards commands, for hosts without an outbound channel.
#[derive(Debug, Default)]
pub struct NoopSink;

impl CommandSink for NoopSink {
    fn send(&mut self, _command: DeviceCommand) -> Result<(), LinkError> {
        Ok(())
    }
}
