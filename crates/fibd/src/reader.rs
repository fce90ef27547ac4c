//! Per-port frame ingestion.
//!
//! A [`PortReader`] turns the frames seen on one port into FIB commands. It
//! keeps its own last-seen cache so that a MAC which keeps talking produces
//! one `LEARN` rather than one per frame, and ages that cache itself.

use crate::clock::Clock;
use crate::command::FibCommand;
use crate::frame_source::FrameSource;
use std::collections::HashMap;
use std::sync::Arc;
use switch_types::{source_mac, MacAddress};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Default aging cutoff in seconds.
pub const DEFAULT_AGING_SECS: i64 = 300;

/// Default receive buffer size; large enough for a standard Ethernet frame.
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    pub aging_secs: i64,
    pub frame_buffer_size: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            aging_secs: DEFAULT_AGING_SECS,
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
        }
    }
}

/// What the reader should do after one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    EndOfStream,
}

pub struct PortReader {
    port: String,
    source: Box<dyn FrameSource>,
    commands: mpsc::Sender<FibCommand>,
    clock: Arc<dyn Clock>,
    aging_secs: i64,
    /// MAC -> last seen; only holds MACs whose LEARN was delivered
    cache: HashMap<MacAddress, i64>,
    buf: Vec<u8>,
}

impl PortReader {
    pub fn new(
        port: impl Into<String>,
        source: Box<dyn FrameSource>,
        commands: mpsc::Sender<FibCommand>,
        settings: ReaderSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            port: port.into(),
            source,
            commands,
            clock,
            aging_secs: settings.aging_secs,
            cache: HashMap::new(),
            buf: vec![0u8; settings.frame_buffer_size],
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Last-seen time of `mac`, if the reader has learned it.
    pub fn cached(&self, mac: &MacAddress) -> Option<i64> {
        self.cache.get(mac).copied()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Reads and handles one frame, then runs the aging scan.
    ///
    /// A read error or a zero-length read ends the stream; the caller is
    /// expected to stop and report the port closed.
    pub async fn process_one_frame(&mut self) -> FrameOutcome {
        let len = match self.source.read_frame(&mut self.buf).await {
            Ok(0) => {
                debug!(port = %self.port, "Frame source reached end of stream");
                return FrameOutcome::EndOfStream;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(port = %self.port, error = %e, "Frame read failed");
                return FrameOutcome::EndOfStream;
            }
        };

        let now = self.clock.now();
        match source_mac(&self.buf[..len]) {
            Ok(mac) if mac.is_multicast() => {
                trace!(port = %self.port, %mac, "Ignoring multicast source");
            }
            Ok(mac) => self.observe(mac, now),
            Err(e) => {
                debug!(port = %self.port, error = %e, "Dropping runt frame");
            }
        }

        self.age_out(now);
        FrameOutcome::Continue
    }

    fn observe(&mut self, mac: MacAddress, now: i64) {
        if let Some(last_seen) = self.cache.get_mut(&mac) {
            *last_seen = now;
            return;
        }

        match self
            .commands
            .try_send(FibCommand::learn(mac, self.port.as_str(), now))
        {
            Ok(()) => {
                debug!(port = %self.port, %mac, "Learned");
                self.cache.insert(mac, now);
            }
            Err(TrySendError::Full(_)) => {
                warn!(port = %self.port, %mac, "Command queue full, dropping LEARN");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(port = %self.port, %mac, "Coordinator gone, dropping LEARN");
            }
        }
    }

    fn age_out(&mut self, now: i64) {
        let mut stale: Vec<MacAddress> = self
            .cache
            .iter()
            .filter(|(_, last_seen)| now - **last_seen >= self.aging_secs)
            .map(|(mac, _)| *mac)
            .collect();
        stale.sort();

        for mac in stale {
            match self
                .commands
                .try_send(FibCommand::expire(mac, self.port.as_str()))
            {
                Ok(()) => {
                    debug!(port = %self.port, %mac, "Aged out");
                    self.cache.remove(&mac);
                }
                Err(e) => {
                    // Stays cached; the next scan retries
                    warn!(port = %self.port, %mac, error = %e, "Could not queue EXPIRE");
                }
            }
        }
    }

    /// Releases the frame source.
    pub async fn close(&mut self) {
        self.source.close().await;
    }

    /// Processes frames until the stream ends, then reports the port closed.
    pub async fn run(mut self) {
        debug!(port = %self.port, "Port reader started");

        while self.process_one_frame().await == FrameOutcome::Continue {}

        self.close().await;
        if self
            .commands
            .send(FibCommand::close(self.port.as_str()))
            .await
            .is_err()
        {
            debug!(port = %self.port, "Coordinator gone before CLOSE");
        }
        debug!(port = %self.port, "Port reader stopped");
    }
}

impl std::fmt::Debug for PortReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortReader")
            .field("port", &self.port)
            .field("aging_secs", &self.aging_secs)
            .field("cached", &self.cache.len())
            .finish()
    }
}
