//! The FIB coordinator.
//!
//! One task owns the forwarding table. It waits on every registered port's
//! command stream plus the administrative control channel, and applies one
//! command at a time: update the table, then fan the change out to the
//! pipeline directory.
//!
//! Port streams live in a [`StreamMap`] keyed by port name, so adding and
//! removing ports is a map insert/remove done between waits. Each stream is
//! chained with a trailing `CLOSE` for its port; a reader that dies without
//! reporting still gets its port unregistered.

use crate::clock::{Clock, SystemClock};
use crate::command::FibCommand;
use crate::error::{FibError, Result};
use crate::fib::{FibEntry, FibRecord, FibStats, FibTable};
use crate::frame_source::{FrameSource, FrameSourceFactory};
use crate::pipeline::{FanOut, PipelineRegistry, SharedPipelines};
use crate::reader::{PortReader, ReaderSettings};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use switch_types::MacAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default capacity of each port's command channel.
pub const DEFAULT_PORT_QUEUE_DEPTH: usize = 128;

/// Default capacity of the administrative channel.
pub const DEFAULT_CONTROL_QUEUE_DEPTH: usize = 32;

type PortEvents = Pin<Box<dyn Stream<Item = FibCommand> + Send>>;

/// Coordinator tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub reader: ReaderSettings,
    pub port_queue_depth: usize,
    pub control_queue_depth: usize,
    /// Remove (and un-program) a port's entries when it goes away
    pub flush_on_port_close: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            reader: ReaderSettings::default(),
            port_queue_depth: DEFAULT_PORT_QUEUE_DEPTH,
            control_queue_depth: DEFAULT_CONTROL_QUEUE_DEPTH,
            flush_on_port_close: true,
        }
    }
}

/// What one [`FibCoordinator::iteration`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A table command was applied and propagated
    Applied(FibCommand),
    PortAdded(String),
    PortRemoved(String),
    /// An event was consumed without changing any state
    Idle,
    /// Every port is gone and the control channel is closed
    Exhausted,
}

/// Administrative handle into a running coordinator.
///
/// Commands go through the same wait as port traffic, so they are applied in
/// order with everything else.
#[derive(Debug, Clone)]
pub struct FibControl {
    tx: mpsc::Sender<FibCommand>,
}

impl FibControl {
    pub async fn send(&self, command: FibCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FibError::ControlClosed)
    }

    /// Attach a port and start learning on it.
    pub async fn add_port(&self, name: impl Into<String>) -> Result<()> {
        self.send(FibCommand::add_port(name)).await
    }

    /// Install a permanent entry.
    pub async fn add_static(&self, mac: MacAddress, port: impl Into<String>) -> Result<()> {
        self.send(FibCommand::add(mac, port)).await
    }

    /// Stop reading a port and unregister it.
    pub async fn close_port(&self, port: impl Into<String>) -> Result<()> {
        self.send(FibCommand::close(port)).await
    }
}

pub struct FibCoordinator {
    name: String,
    settings: CoordinatorSettings,
    table: FibTable,
    stats: FibStats,
    pipelines: SharedPipelines,
    attacher: Arc<dyn FrameSourceFactory>,
    clock: Arc<dyn Clock>,
    control: mpsc::Receiver<FibCommand>,
    control_open: bool,
    events: StreamMap<String, PortEvents>,
    readers: HashMap<String, JoinHandle<()>>,
}

impl FibCoordinator {
    /// Creates an idle coordinator with no ports and its control handle.
    pub fn new(
        name: impl Into<String>,
        settings: CoordinatorSettings,
        pipelines: SharedPipelines,
        attacher: Arc<dyn FrameSourceFactory>,
    ) -> (Self, FibControl) {
        let (tx, control) = mpsc::channel(settings.control_queue_depth);
        let coordinator = Self {
            name: name.into(),
            settings,
            table: FibTable::new(),
            stats: FibStats::default(),
            pipelines,
            attacher,
            clock: Arc::new(SystemClock),
            control,
            control_open: true,
            events: StreamMap::new(),
            readers: HashMap::new(),
        };
        (coordinator, FibControl { tx })
    }

    /// Replaces the clock handed to port readers registered from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &FibStats {
        &self.stats
    }

    pub fn get_entry(&self, mac: &MacAddress) -> Option<&FibEntry> {
        self.table.get(mac)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Names of registered ports, sorted.
    pub fn registered_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.readers.keys().cloned().collect();
        ports.sort();
        ports
    }

    pub fn snapshot(&self) -> Vec<FibRecord> {
        self.table.snapshot()
    }

    /// Waits for one event and applies it.
    ///
    /// Never fails: faults are logged and counted, and the call returns once
    /// the event has been consumed.
    pub async fn iteration(&mut self) -> Progress {
        match self.next_command().await {
            Some(command) => self.apply(command).await,
            None => Progress::Exhausted,
        }
    }

    async fn next_command(&mut self) -> Option<FibCommand> {
        loop {
            tokio::select! {
                command = self.control.recv(), if self.control_open => match command {
                    Some(command) => return Some(command),
                    None => {
                        debug!(fib = %self.name, "Control channel closed");
                        self.control_open = false;
                    }
                },
                Some((_, command)) = self.events.next(), if !self.events.is_empty() => {
                    return Some(command);
                }
                else => return None,
            }
        }
    }

    async fn apply(&mut self, command: FibCommand) -> Progress {
        trace!(fib = %self.name, command = %command, "Applying");

        if let FibCommand::AddPort { name } = command {
            // Attaching may suspend, so it runs without the directory lock
            return self.add_port(name).await;
        }

        let pipelines = self.pipelines.clone();
        let mut registry = pipelines.lock();

        match command {
            FibCommand::Learn {
                mac,
                ref port,
                timestamp,
            } => {
                self.learn(&mut registry, mac, port, timestamp);
                Progress::Applied(command)
            }
            FibCommand::Expire { mac, ref port } => {
                self.expire(&mut registry, mac, port);
                Progress::Applied(command)
            }
            FibCommand::Add { mac, ref port } => {
                self.add_static(&mut registry, mac, port);
                Progress::Applied(command)
            }
            FibCommand::Close { port } => {
                if self.unregister_port(&mut registry, &port) {
                    Progress::PortRemoved(port)
                } else {
                    Progress::Idle
                }
            }
            FibCommand::AddPort { .. } => Progress::Idle,
        }
    }

    fn learn(&mut self, registry: &mut PipelineRegistry, mac: MacAddress, port: &str, ts: i64) {
        if let Some(previous) = self.table.insert(mac, FibEntry::learned(port, ts)) {
            if previous.port != port {
                info!(fib = %self.name, %mac, from = %previous.port, to = port, "MAC moved");
                self.stats.moved += 1;
            }
        }
        self.stats.learned += 1;

        let fan_out = registry.fan_out_add(mac, port);
        self.record(fan_out);
        debug!(fib = %self.name, %mac, port, programmed = fan_out.programmed, "Learned");
    }

    /// Removes `mac` whatever port or kind currently owns it, and deletes it
    /// from every pipeline.
    fn expire(&mut self, registry: &mut PipelineRegistry, mac: MacAddress, port: &str) {
        match self.table.remove(&mac) {
            Some(previous) => {
                if previous.port != port || previous.permanent {
                    debug!(
                        fib = %self.name,
                        %mac,
                        port,
                        owner = %previous.port,
                        permanent = previous.permanent,
                        "EXPIRE removes entry owned elsewhere"
                    );
                }
                self.stats.expired += 1;
            }
            None => {
                debug!(fib = %self.name, %mac, port, "EXPIRE for unknown MAC");
            }
        }

        let fan_out = registry.fan_out_del(mac);
        self.record(fan_out);
        debug!(fib = %self.name, %mac, port, "Expired");
    }

    fn add_static(&mut self, registry: &mut PipelineRegistry, mac: MacAddress, port: &str) {
        if let Some(previous) = self.table.insert(mac, FibEntry::permanent(port)) {
            if previous.port != port {
                self.stats.moved += 1;
            }
        }
        self.stats.static_added += 1;

        let fan_out = registry.fan_out_add(mac, port);
        self.record(fan_out);
        info!(fib = %self.name, %mac, port, "Added static entry");
    }

    async fn add_port(&mut self, name: String) -> Progress {
        if self.readers.contains_key(&name) {
            warn!(fib = %self.name, port = %name, "Port already registered, ignoring ADDPORT");
            return Progress::Idle;
        }

        match self.attacher.attach(&name).await {
            Ok(source) => {
                self.register_port(name.clone(), source);
                Progress::PortAdded(name)
            }
            Err(e) => {
                error!(fib = %self.name, port = %name, error = %e, "Failed to add port");
                self.stats.attach_failures += 1;
                Progress::Idle
            }
        }
    }

    fn register_port(&mut self, name: String, source: Box<dyn FrameSource>) {
        let (tx, rx) = mpsc::channel(self.settings.port_queue_depth);
        let reader = PortReader::new(
            name.clone(),
            source,
            tx,
            self.settings.reader,
            self.clock.clone(),
        );

        let events: PortEvents = Box::pin(
            ReceiverStream::new(rx).chain(tokio_stream::once(FibCommand::close(name.clone()))),
        );
        self.events.insert(name.clone(), events);
        self.readers.insert(name.clone(), tokio::spawn(reader.run()));
        self.stats.ports_added += 1;

        info!(fib = %self.name, port = %name, "Port registered");
    }

    fn unregister_port(&mut self, registry: &mut PipelineRegistry, port: &str) -> bool {
        let stream = self.events.remove(port);
        let Some(reader) = self.readers.remove(port) else {
            debug!(fib = %self.name, port, "CLOSE for unknown port");
            return false;
        };
        drop(stream);
        // No-op when the reader already stopped; otherwise drops its source
        reader.abort();
        self.stats.ports_removed += 1;

        if self.settings.flush_on_port_close {
            let flushed = self.table.drain_port(port);
            for mac in &flushed {
                let fan_out = registry.fan_out_del(*mac);
                self.record(fan_out);
            }
            self.stats.flushed += flushed.len() as u64;
            info!(fib = %self.name, port, flushed = flushed.len(), "Port unregistered");
        } else {
            info!(fib = %self.name, port, "Port unregistered");
        }
        true
    }

    fn record(&mut self, fan_out: FanOut) {
        self.stats.pipeline_failures += fan_out.failed as u64;
    }

    /// Runs until every port is gone and all control handles are dropped.
    #[instrument(skip_all, fields(fib = %self.name))]
    pub async fn run(&mut self) {
        info!("FIB coordinator running");
        while self.iteration().await != Progress::Exhausted {}
        info!("FIB coordinator exhausted");
    }

    /// Like [`run`](Self::run), but also stops once `token` is cancelled.
    ///
    /// Readers are left running; call [`shutdown`](Self::shutdown) to stop
    /// them.
    #[instrument(skip_all, fields(fib = %self.name))]
    pub async fn run_until(&mut self, token: CancellationToken) {
        info!("FIB coordinator running");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("FIB coordinator cancelled");
                    break;
                }
                progress = self.iteration() => {
                    if progress == Progress::Exhausted {
                        info!("FIB coordinator exhausted");
                        break;
                    }
                }
            }
        }
    }

    /// Stops every reader and forgets all ports. The table is kept.
    pub fn shutdown(&mut self) {
        for (port, reader) in self.readers.drain() {
            debug!(fib = %self.name, port = %port, "Stopping reader");
            reader.abort();
        }
        self.events.clear();
    }
}

impl Drop for FibCoordinator {
    fn drop(&mut self) {
        for reader in self.readers.values() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for FibCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FibCoordinator")
            .field("name", &self.name)
            .field("entries", &self.table.len())
            .field("ports", &self.registered_ports())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame_source::ChannelAttacher;
    use crate::pipeline::{ForwardingPipeline, PipelineError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};
    use std::io;

    const T0: i64 = 1_700_000_000;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add(&'static str, MacAddress, String),
        Del(&'static str, MacAddress),
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;
    type PipelineResult = std::result::Result<(), PipelineError>;

    /// Owns the port with its own name and records every call.
    struct RecordingPipeline {
        id: &'static str,
        calls: CallLog,
    }

    impl ForwardingPipeline for RecordingPipeline {
        fn id(&self) -> &str {
            self.id
        }

        fn owns_port(&self, port: &str) -> bool {
            port == self.id
        }

        fn add_entry(&mut self, mac: MacAddress, port: &str) -> PipelineResult {
            self.calls
                .lock()
                .push(Call::Add(self.id, mac, port.to_string()));
            Ok(())
        }

        fn del_entry(&mut self, mac: MacAddress) -> PipelineResult {
            self.calls.lock().push(Call::Del(self.id, mac));
            Ok(())
        }
    }

    struct Harness {
        coord: FibCoordinator,
        control: FibControl,
        attacher: Arc<ChannelAttacher>,
        calls: CallLog,
    }

    impl Harness {
        fn new(pipelines: &[&'static str]) -> Self {
            let calls = CallLog::default();
            let shared = SharedPipelines::default();
            for id in pipelines {
                shared.add_pipeline(Box::new(RecordingPipeline {
                    id,
                    calls: calls.clone(),
                }));
            }
            let attacher = Arc::new(ChannelAttacher::new());
            let (coord, control) = FibCoordinator::new(
                "test",
                CoordinatorSettings::default(),
                shared,
                attacher.clone(),
            );
            let coord = coord.with_clock(Arc::new(ManualClock::new(T0)));
            Self {
                coord,
                control,
                attacher,
                calls,
            }
        }

        async fn apply(&mut self, command: FibCommand) -> Progress {
            self.control.send(command).await.unwrap();
            self.coord.iteration().await
        }

        fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn frame_from(src: MacAddress) -> Vec<u8> {
        let mut buf = vec![0u8; 60];
        let mut frame = EthernetFrame::new_unchecked(&mut buf);
        frame.set_dst_addr(EthernetAddress::BROADCAST);
        frame.set_src_addr(src.into());
        frame.set_ethertype(EthernetProtocol::Arp);
        buf
    }

    #[tokio::test]
    async fn test_learn_excludes_owning_pipeline() {
        let mut h = Harness::new(&["A", "B", "C"]);

        let learn = FibCommand::learn(mac(1), "A", T0);
        assert_eq!(h.apply(learn.clone()).await, Progress::Applied(learn));
        assert_eq!(
            h.take_calls(),
            vec![
                Call::Add("B", mac(1), "A".to_string()),
                Call::Add("C", mac(1), "A".to_string()),
            ]
        );
        assert_eq!(h.coord.get_entry(&mac(1)), Some(&FibEntry::learned("A", T0)));
    }

    #[tokio::test]
    async fn test_expire_reaches_every_pipeline() {
        let mut h = Harness::new(&["A", "B"]);
        h.apply(FibCommand::learn(mac(1), "A", T0)).await;
        h.take_calls();

        h.apply(FibCommand::expire(mac(1), "A")).await;
        assert_eq!(
            h.take_calls(),
            vec![Call::Del("A", mac(1)), Call::Del("B", mac(1))]
        );
        assert!(h.coord.is_empty());
        assert_eq!(h.coord.stats().expired, 1);

        // Unknown MAC still propagates
        let expire = FibCommand::expire(mac(7), "B");
        assert_eq!(h.apply(expire.clone()).await, Progress::Applied(expire));
        assert_eq!(h.take_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_static_entry_is_permanent() {
        let mut h = Harness::new(&["A", "B"]);

        h.control.add_static(mac(2), "B").await.unwrap();
        h.coord.iteration().await;
        assert_eq!(h.take_calls(), vec![Call::Add("A", mac(2), "B".to_string())]);
        assert_eq!(h.coord.get_entry(&mac(2)), Some(&FibEntry::permanent("B")));

        // Readers never age permanent entries, but an explicit EXPIRE removes one
        let expire = FibCommand::expire(mac(2), "B");
        assert_eq!(h.apply(expire.clone()).await, Progress::Applied(expire));
        assert_eq!(
            h.take_calls(),
            vec![Call::Del("A", mac(2)), Call::Del("B", mac(2))]
        );
        assert!(h.coord.is_empty());
        assert_eq!(h.coord.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_port_move_replaces_entry() {
        let mut h = Harness::new(&["A", "B"]);
        h.apply(FibCommand::learn(mac(1), "A", T0)).await;
        h.apply(FibCommand::learn(mac(1), "B", T0 + 5)).await;

        assert_eq!(h.coord.len(), 1);
        assert_eq!(h.coord.get_entry(&mac(1)).unwrap().port, "B");
        assert_eq!(h.coord.stats().moved, 1);
        assert_eq!(
            h.take_calls(),
            vec![
                Call::Add("B", mac(1), "A".to_string()),
                Call::Add("A", mac(1), "B".to_string()),
            ]
        );

        // The old port's reader ages it out later, which removes it everywhere
        let expire = FibCommand::expire(mac(1), "A");
        assert_eq!(h.apply(expire.clone()).await, Progress::Applied(expire));
        assert_eq!(h.coord.get_entry(&mac(1)), None);
        assert_eq!(
            h.take_calls(),
            vec![Call::Del("A", mac(1)), Call::Del("B", mac(1))]
        );
    }

    #[tokio::test]
    async fn test_expire_ignores_reporting_port() {
        let mut h = Harness::new(&["A", "B", "C"]);
        h.apply(FibCommand::learn(mac(4), "C", T0)).await;
        h.apply(FibCommand::add(mac(5), "A")).await;
        h.take_calls();

        // Reported by ports that do not own the entries
        for (target, reporter) in [(mac(4), "B"), (mac(5), "C")] {
            let expire = FibCommand::expire(target, reporter);
            assert_eq!(h.apply(expire.clone()).await, Progress::Applied(expire));
            assert_eq!(
                h.take_calls(),
                vec![
                    Call::Del("A", target),
                    Call::Del("B", target),
                    Call::Del("C", target),
                ]
            );
            assert_eq!(h.coord.get_entry(&target), None);
        }
        assert!(h.coord.is_empty());
        assert_eq!(h.coord.stats().expired, 2);
    }

    #[tokio::test]
    async fn test_dynamic_membership() {
        let mut h = Harness::new(&["A", "B"]);
        let feed_a = h.attacher.feed("A", 8);
        let feed_b = h.attacher.feed("B", 8);

        assert_eq!(h.apply(FibCommand::add_port("A")).await, Progress::PortAdded("A".into()));
        assert_eq!(h.apply(FibCommand::add_port("B")).await, Progress::PortAdded("B".into()));
        assert_eq!(h.coord.registered_ports(), vec!["A".to_string(), "B".to_string()]);

        feed_b.send(frame_from(mac(2))).await.unwrap();
        assert_eq!(
            h.coord.iteration().await,
            Progress::Applied(FibCommand::learn(mac(2), "B", T0))
        );

        // A's stream ends; B keeps working
        drop(feed_a);
        assert_eq!(h.coord.iteration().await, Progress::PortRemoved("A".into()));
        assert_eq!(h.coord.registered_ports(), vec!["B".to_string()]);

        feed_b.send(frame_from(mac(3))).await.unwrap();
        assert_eq!(
            h.coord.iteration().await,
            Progress::Applied(FibCommand::learn(mac(3), "B", T0))
        );
        assert_eq!(h.coord.stats().ports_removed, 1);
    }

    #[tokio::test]
    async fn test_close_flushes_port_entries() {
        let mut h = Harness::new(&["A", "B"]);
        let _feed = h.attacher.feed("A", 8);
        h.apply(FibCommand::add_port("A")).await;
        h.apply(FibCommand::learn(mac(1), "A", T0)).await;
        h.apply(FibCommand::add(mac(2), "A")).await;
        h.apply(FibCommand::learn(mac(3), "B", T0)).await;
        h.take_calls();

        assert_eq!(h.apply(FibCommand::close("A")).await, Progress::PortRemoved("A".into()));
        assert_eq!(
            h.take_calls(),
            vec![
                Call::Del("A", mac(1)),
                Call::Del("B", mac(1)),
                Call::Del("A", mac(2)),
                Call::Del("B", mac(2)),
            ]
        );
        assert_eq!(h.coord.len(), 1);
        assert_eq!(h.coord.stats().flushed, 2);
        assert!(h.coord.registered_ports().is_empty());

        // Closing again is a no-op
        assert_eq!(h.apply(FibCommand::close("A")).await, Progress::Idle);
    }

    #[tokio::test]
    async fn test_close_without_flush_keeps_entries() {
        let mut h = Harness::new(&["A", "B"]);
        h.coord.settings.flush_on_port_close = false;
        let _feed = h.attacher.feed("A", 8);
        h.apply(FibCommand::add_port("A")).await;
        h.apply(FibCommand::learn(mac(1), "A", T0)).await;
        h.take_calls();

        h.apply(FibCommand::close("A")).await;
        assert!(h.take_calls().is_empty());
        assert_eq!(h.coord.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_failure_leaves_no_port() {
        let mut h = Harness::new(&["A"]);

        assert_eq!(h.apply(FibCommand::add_port("ghost")).await, Progress::Idle);
        assert!(h.coord.registered_ports().is_empty());
        assert_eq!(h.coord.stats().attach_failures, 1);
        assert_eq!(h.coord.stats().ports_added, 0);
    }

    #[tokio::test]
    async fn test_duplicate_add_port_rejected() {
        let mut h = Harness::new(&["A"]);
        let _first = h.attacher.feed("A", 8);
        h.apply(FibCommand::add_port("A")).await;

        let _second = h.attacher.feed("A", 8);
        assert_eq!(h.apply(FibCommand::add_port("A")).await, Progress::Idle);
        assert_eq!(h.coord.registered_ports(), vec!["A".to_string()]);
        assert_eq!(h.coord.stats().ports_added, 1);
    }

    struct PanickingSource;

    #[async_trait]
    impl FrameSource for PanickingSource {
        async fn read_frame(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("reader crashed");
        }

        async fn close(&mut self) {}
    }

    struct PanickingAttacher;

    #[async_trait]
    impl FrameSourceFactory for PanickingAttacher {
        async fn attach(&self, _port: &str) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(PanickingSource))
        }
    }

    #[tokio::test]
    async fn test_detached_reader_is_reaped() {
        let (mut coord, control) = FibCoordinator::new(
            "test",
            CoordinatorSettings::default(),
            SharedPipelines::default(),
            Arc::new(PanickingAttacher),
        );

        control.add_port("A").await.unwrap();
        assert_eq!(coord.iteration().await, Progress::PortAdded("A".into()));
        assert_eq!(coord.iteration().await, Progress::PortRemoved("A".into()));
        assert!(coord.registered_ports().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_when_control_dropped() {
        let Harness {
            mut coord, control, ..
        } = Harness::new(&["A"]);
        control.add_static(mac(1), "A").await.unwrap();
        drop(control);

        assert!(matches!(coord.iteration().await, Progress::Applied(_)));
        assert_eq!(coord.iteration().await, Progress::Exhausted);
        coord.run().await;
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let mut h = Harness::new(&["A"]);
        let _feed = h.attacher.feed("A", 8);
        h.control.add_port("A").await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        let control = h.control.clone();
        tokio::spawn(async move {
            control.add_static(mac(9), "A").await.unwrap();
            canceller.cancel();
        });

        h.coord.run_until(token).await;
        assert_eq!(h.coord.registered_ports(), vec!["A".to_string()]);

        h.coord.shutdown();
        assert!(h.coord.registered_ports().is_empty());
    }

    #[tokio::test]
    async fn test_control_send_after_drop_fails() {
        let Harness { coord, control, .. } = Harness::new(&[]);
        drop(coord);
        assert!(matches!(
            control.add_port("A").await,
            Err(FibError::ControlClosed)
        ));
    }
}
