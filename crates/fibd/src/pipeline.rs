//! Forwarding pipelines and the shared directory the coordinator fans out to.
//!
//! A pipeline is one forwarding engine instance programming dataplane rules
//! for the ports it owns. The directory is touched by two parties: the
//! coordinator (once per applied command) and whatever management actor adds
//! or removes pipelines, so it lives behind a single mutex.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use switch_types::MacAddress;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a forwarding engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Pipeline {pipeline} rejected {operation} for {mac}: {reason}")]
    Rejected {
        pipeline: String,
        operation: &'static str,
        mac: MacAddress,
        reason: String,
    },

    #[error("Pipeline {0} unavailable")]
    Unavailable(String),
}

/// Handle to one forwarding engine.
///
/// Calls are made with the directory lock held and must not block for long.
pub trait ForwardingPipeline: Send {
    fn id(&self) -> &str;

    /// True if traffic ingressing on `port` is handled by this pipeline.
    fn owns_port(&self, port: &str) -> bool;

    /// Program a rule sending traffic for `mac` toward `ingress_port`.
    fn add_entry(&mut self, mac: MacAddress, ingress_port: &str) -> Result<(), PipelineError>;

    /// Remove the rule for `mac`.
    fn del_entry(&mut self, mac: MacAddress) -> Result<(), PipelineError>;
}

/// Outcome of one fan-out across the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub programmed: usize,
    pub failed: usize,
}

/// Pipelines keyed by id, iterated in id order.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Box<dyn ForwardingPipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipeline, replacing (and returning) one with the same id.
    pub fn insert(
        &mut self,
        pipeline: Box<dyn ForwardingPipeline>,
    ) -> Option<Box<dyn ForwardingPipeline>> {
        self.pipelines.insert(pipeline.id().to_string(), pipeline)
    }

    pub fn remove(&mut self, id: &str) -> Option<Box<dyn ForwardingPipeline>> {
        self.pipelines.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pipelines.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }

    /// Calls `add_entry` on every pipeline except the ones owning `port`,
    /// so traffic is never sent back out of its own ingress.
    pub fn fan_out_add(&mut self, mac: MacAddress, port: &str) -> FanOut {
        let mut result = FanOut::default();
        for pipeline in self.pipelines.values_mut() {
            if pipeline.owns_port(port) {
                continue;
            }
            match pipeline.add_entry(mac, port) {
                Ok(()) => result.programmed += 1,
                Err(e) => {
                    warn!(pipeline = pipeline.id(), %mac, port, error = %e, "AddEntry failed");
                    result.failed += 1;
                }
            }
        }
        result
    }

    /// Calls `del_entry` on every pipeline.
    pub fn fan_out_del(&mut self, mac: MacAddress) -> FanOut {
        let mut result = FanOut::default();
        for pipeline in self.pipelines.values_mut() {
            match pipeline.del_entry(mac) {
                Ok(()) => result.programmed += 1,
                Err(e) => {
                    warn!(pipeline = pipeline.id(), %mac, error = %e, "DelEntry failed");
                    result.failed += 1;
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.pipelines.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Cloneable, lock-guarded handle to the pipeline directory.
///
/// The coordinator holds one clone; management code holds others and edits
/// the directory through [`add_pipeline`](Self::add_pipeline) and
/// [`remove_pipeline`](Self::remove_pipeline).
#[derive(Clone, Default, Debug)]
pub struct SharedPipelines {
    inner: Arc<Mutex<PipelineRegistry>>,
}

impl SharedPipelines {
    pub fn new(registry: PipelineRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Locks the directory. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, PipelineRegistry> {
        self.inner.lock()
    }

    pub fn add_pipeline(&self, pipeline: Box<dyn ForwardingPipeline>) {
        let id = pipeline.id().to_string();
        if self.inner.lock().insert(pipeline).is_some() {
            warn!(pipeline = %id, "Replaced existing pipeline");
        } else {
            debug!(pipeline = %id, "Added pipeline");
        }
    }

    pub fn remove_pipeline(&self, id: &str) -> Option<Box<dyn ForwardingPipeline>> {
        let removed = self.inner.lock().remove(id);
        if removed.is_some() {
            debug!(pipeline = id, "Removed pipeline");
        }
        removed
    }
}

// ============================================================================
// Mock pipeline
// ============================================================================

/// Default gate, reserved for flooding unknown destinations.
pub const DEFAULT_GATE: u16 = 0;

/// Stand-in forwarding engine.
///
/// Keeps the rule table a real L2 forwarder would hold: each destination
/// port gets an output gate on first use and every MAC maps to a gate.
#[derive(Debug)]
pub struct MockPipeline {
    id: String,
    ports: BTreeSet<String>,
    gates: HashMap<String, u16>,
    fib: HashMap<MacAddress, u16>,
}

impl MockPipeline {
    /// A pipeline owning the port with the same name.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let ports = BTreeSet::from([id.clone()]);
        Self {
            id,
            ports,
            gates: HashMap::new(),
            fib: HashMap::new(),
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.ports.insert(port.into());
        self
    }

    pub fn gate_for(&self, mac: &MacAddress) -> Option<u16> {
        self.fib.get(mac).copied()
    }

    pub fn gate_of_port(&self, port: &str) -> Option<u16> {
        self.gates.get(port).copied()
    }

    pub fn rule_count(&self) -> usize {
        self.fib.len()
    }

    fn gate_toward(&mut self, port: &str) -> u16 {
        if let Some(gate) = self.gates.get(port) {
            return *gate;
        }
        let gate = self.gates.values().copied().max().unwrap_or(DEFAULT_GATE) + 1;
        self.gates.insert(port.to_string(), gate);
        debug!(pipeline = %self.id, port, gate, "Wired new output gate");
        gate
    }
}

impl ForwardingPipeline for MockPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    fn owns_port(&self, port: &str) -> bool {
        self.ports.contains(port)
    }

    fn add_entry(&mut self, mac: MacAddress, ingress_port: &str) -> Result<(), PipelineError> {
        let gate = self.gate_toward(ingress_port);
        if let Some(previous) = self.fib.insert(mac, gate) {
            if previous != gate {
                debug!(pipeline = %self.id, %mac, from = previous, to = gate, "Re-pointed rule");
            }
        } else {
            debug!(pipeline = %self.id, %mac, port = ingress_port, gate, "Added rule");
        }
        Ok(())
    }

    fn del_entry(&mut self, mac: MacAddress) -> Result<(), PipelineError> {
        if self.fib.remove(&mac).is_some() {
            debug!(pipeline = %self.id, %mac, "Deleted rule");
        }
        Ok(())
    }
}
