//! L2 forwarding-table coordinator for a software Ethernet bridge
//!
//! fibd learns which MAC addresses sit behind which ports, ages out stale
//! entries, and keeps every forwarding pipeline programmed from one
//! authoritative table.
//!
//! # Architecture
//!
//! ```text
//! +--------------+    +------------+   LEARN/EXPIRE/CLOSE    +----------------+
//! | FrameSource  |--->| PortReader |------------------------>|                |
//! |  (port A)    |    |  (cache)   |                         |                |
//! +--------------+    +------------+                         | FibCoordinator |  AddEntry/DelEntry  +-----------+
//! +--------------+    +------------+                         |   (FibTable)   |-------------------->| Pipelines |
//! | FrameSource  |--->| PortReader |------------------------>|                |                     +-----------+
//! |  (port B)    |    |  (cache)   |                         |                |
//! +--------------+    +------------+                         +----------------+
//!                                     ADD/ADDPORT/CLOSE              ^
//!                        FibControl -----------------------------------+
//! ```
//!
//! Each port reader runs in its own task and only talks to the coordinator
//! through a bounded channel. The coordinator is the single writer of the
//! table and the only caller into the pipelines.

pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fib;
pub mod frame_source;
pub mod pipeline;
pub mod reader;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::FibCommand;
pub use config::{FibdConfig, StaticEntry};
pub use coordinator::{CoordinatorSettings, FibControl, FibCoordinator, Progress};
pub use error::{FibError, Result};
pub use fib::{FibEntry, FibRecord, FibStats, FibTable};
pub use frame_source::{
    ChannelAttacher, ChannelSource, FrameFeeder, FrameSource, FrameSourceFactory,
    UnixPacketSource, UnixSocketAttacher,
};
pub use pipeline::{
    ForwardingPipeline, MockPipeline, PipelineError, PipelineRegistry, SharedPipelines,
};
pub use reader::{FrameOutcome, PortReader, ReaderSettings};
