//! Job Graph Tracker - local mirror of a remotely executed job graph
//!
//! A remote engine runs graphs of task nodes; each node spawns work items
//! that produce file artifacts. This crate keeps a local model of that
//! execution in sync with the engine:
//!
//! - Topology discovery with stable identities across re-instantiation
//! - A per-node work item tally and node status state machine
//! - Work results and their artifacts, relinked across session reloads
//! - Pruning of results whose work items the engine no longer knows
//!
//! # Architecture
//!
//! Everything runs on a synchronous tick driven by the host:
//!
//! - `EngineClient`: the request/response seam to the remote engine
//! - `TopologyBuilder`: rebuilds networks and nodes of an asset link
//! - `EventProcessor`: drains engine events and applies them to nodes
//! - `Materializer`: host hook that turns artifacts into outputs
//! - `GraphTracker`: owns all of the above and exposes the host API
//!
//! # Example
//!
//! ```ignore
//! use job_graph_tracker::{GraphTracker, MockEngine, TrackerConfig};
//!
//! let mut tracker = GraphTracker::new(MockEngine::new(), TrackerConfig::default());
//! let link = tracker.register_link(1, "terrain");
//! tracker.initialize_link(&link)?;
//! loop {
//!     tracker.update();
//! }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod link;
pub mod materializer;
pub mod mock;
pub mod network;
pub mod node;
pub mod processor;
pub mod reconcile;
pub mod registry;
pub mod tally;
pub mod topology;
pub mod tracker;
pub mod types;
pub mod work_result;

// Re-export key types
pub use config::{LinkFilters, TrackerConfig};
pub use engine::{EngineClient, GraphEvent, GraphEventKind, ResultDescriptor};
pub use error::{Result, TrackerError};
pub use events::{EventSink, NullEventSink, TrackerEvent, VecEventSink};
pub use link::AssetLink;
pub use materializer::{Materializer, PendingDelete, PendingLoad};
pub use mock::{MockEngine, MockEngineState};
pub use network::GraphNetwork;
pub use node::GraphNode;
pub use processor::EventProcessor;
pub use registry::AssetLinkRegistry;
pub use tally::{TallyCounts, WorkItemTally};
pub use tracker::GraphTracker;
pub use types::{
    ContextId, CookState, LinkId, LinkState, NodeState, OutputId, RemoteHandle, WorkItemId,
    WorkItemState, WorkResultState,
};
pub use work_result::{WorkResult, WorkResultObject};
