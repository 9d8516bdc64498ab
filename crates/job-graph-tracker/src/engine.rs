//! Execution engine client interface
//!
//! The tracker never talks to the remote engine directly. Everything goes
//! through [`EngineClient`], a synchronous request/response interface over a
//! local engine session. Calls may fail; the tracker logs failures and leaves
//! its state untouched.
//!
//! This module also defines the event records drained from the engine.

use serde::{Deserialize, Serialize};

use crate::types::{ContextId, CookState, NodeType, RemoteHandle, WorkItemId, WorkItemState};
use crate::Result;

/// Flag filter for child node enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFlags {
    /// Only nodes that are task networks
    pub network: bool,
    /// Only bypassed nodes
    pub bypassed: bool,
    /// Only task nodes that are not schedulers
    pub non_scheduler: bool,
}

/// Child enumeration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildQuery {
    /// Restrict to one node type, `None` for any
    pub node_type: Option<NodeType>,
    pub flags: NodeFlags,
    /// Descend into nested children
    pub recursive: bool,
}

impl ChildQuery {
    /// Every task network below a node, at any depth
    pub fn networks() -> Self {
        Self {
            node_type: None,
            flags: NodeFlags {
                network: true,
                ..Default::default()
            },
            recursive: true,
        }
    }

    /// Every bypassed task network below a node, at any depth
    pub fn bypassed_networks() -> Self {
        Self {
            flags: NodeFlags {
                network: true,
                bypassed: true,
                ..Default::default()
            },
            ..Self::networks()
        }
    }

    /// Non-scheduler task nodes of a network, at any depth
    pub fn task_nodes() -> Self {
        Self {
            node_type: Some(NodeType::Task),
            flags: NodeFlags {
                non_scheduler: true,
                ..Default::default()
            },
            recursive: true,
        }
    }

    /// Bypassed non-scheduler task nodes of a network, at any depth
    pub fn bypassed_task_nodes() -> Self {
        Self {
            node_type: None,
            flags: NodeFlags {
                non_scheduler: true,
                bypassed: true,
                ..Default::default()
            },
            recursive: true,
        }
    }
}

/// Information about a remote node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    /// Parent handle, `None` at the root
    pub parent: Option<RemoteHandle>,
    pub node_type: NodeType,
    /// Number of nested child nodes
    pub child_count: usize,
}

/// A live execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub name: String,
    pub id: ContextId,
}

/// Information about one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemInfo {
    pub name: String,
    /// Number of result descriptors the item produced
    pub result_count: usize,
    /// Stable ordinal of the item within its node
    pub index: i32,
}

/// One produced result of a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDescriptor {
    /// Result tag, e.g. `file/geo`
    pub tag: String,
    /// Result locator, e.g. a file path
    pub locator: String,
}

/// Severity hint carried by an engine event message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

/// Kind of an engine event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEventKind {
    Null,
    NodeClear,
    WorkItemAdd,
    WorkItemRemove,
    WorkItemStateChange {
        last: WorkItemState,
        current: WorkItemState,
    },
    CookWarning,
    CookError,
    CookComplete,
    CookStart,
    DirtyStart,
    DirtyStop,
    DirtyAll,
    WorkItemAddDependency,
    WorkItemRemoveDependency,
    WorkItemAddParent,
    WorkItemRemoveParent,
    WorkItemAddStaticAncestor,
    WorkItemRemoveStaticAncestor,
    WorkItemResult,
    WorkItemAttributeChange,
    UiSelect,
    NodeCreate,
    NodeRemove,
    NodeRename,
    NodeConnect,
    NodeDisconnect,
    NodeProgressUpdate,
    Log,
}

/// One event drained from an execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEvent {
    /// Handle of the node the event belongs to
    pub node: RemoteHandle,
    /// Work item concerned, for work item events
    #[serde(default)]
    pub work_item: Option<WorkItemId>,
    pub kind: GraphEventKind,
    /// Optional engine message
    #[serde(default)]
    pub message: String,
}

impl GraphEvent {
    pub fn new(node: RemoteHandle, kind: GraphEventKind) -> Self {
        Self {
            node,
            work_item: None,
            kind,
            message: String::new(),
        }
    }

    /// Work item event
    pub fn work_item(node: RemoteHandle, work_item: WorkItemId, kind: GraphEventKind) -> Self {
        Self {
            work_item: Some(work_item),
            ..Self::new(node, kind)
        }
    }

    /// Work item state change event
    pub fn state_change(
        node: RemoteHandle,
        work_item: WorkItemId,
        last: WorkItemState,
        current: WorkItemState,
    ) -> Self {
        Self::work_item(
            node,
            work_item,
            GraphEventKind::WorkItemStateChange { last, current },
        )
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Synchronous client of a remote execution engine session
///
/// Every method is a blocking request/response call. Implementations
/// report any non-success result as [`crate::TrackerError::Remote`].
pub trait EngineClient {
    /// Enumerate child nodes of `parent` matching `query`
    fn child_nodes(&self, parent: RemoteHandle, query: ChildQuery) -> Result<Vec<RemoteHandle>>;

    fn node_info(&self, node: RemoteHandle) -> Result<NodeInfo>;

    /// Path of `node` relative to `relative_to`
    fn node_path(&self, node: RemoteHandle, relative_to: RemoteHandle) -> Result<String>;

    /// Currently live execution contexts
    fn execution_contexts(&self) -> Result<Vec<ExecutionContext>>;

    /// Move up to `max_count` pending events of `context` into `buffer`.
    ///
    /// `buffer` is cleared first. Returns the number of events still pending
    /// on the engine side.
    fn drain_events(
        &self,
        context: ContextId,
        buffer: &mut Vec<GraphEvent>,
        max_count: usize,
    ) -> Result<usize>;

    fn work_item_info(&self, context: ContextId, work_item: WorkItemId) -> Result<WorkItemInfo>;

    fn work_item_results(
        &self,
        node: RemoteHandle,
        work_item: WorkItemId,
        count: usize,
    ) -> Result<Vec<ResultDescriptor>>;

    /// Ids of the work items currently alive on `node`
    fn live_work_item_ids(&self, node: RemoteHandle) -> Result<Vec<WorkItemId>>;

    /// Execution context owning `node`
    fn context_id(&self, node: RemoteHandle) -> Result<ContextId>;

    fn dirty_node(&self, node: RemoteHandle, recursive: bool) -> Result<()>;

    /// Start cooking a single node
    fn cook_node(&self, node: RemoteHandle) -> Result<()>;

    /// Start cooking every output of a network
    fn cook_outputs(&self, network: RemoteHandle) -> Result<()>;

    fn pause_cook(&self, context: ContextId) -> Result<()>;

    fn cancel_cook(&self, context: ContextId) -> Result<()>;

    fn cook_state(&self, context: ContextId) -> Result<CookState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = GraphEvent::state_change(
            4,
            7,
            WorkItemState::Waiting,
            WorkItemState::Cooking,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["node"], 4);
        assert_eq!(value["workItem"], 7);
        assert_eq!(value["kind"]["type"], "work_item_state_change");
        assert_eq!(value["kind"]["current"], "cooking");

        let parsed: GraphEvent =
            serde_json::from_str(r#"{ "node": 2, "kind": { "type": "cook_start" } }"#).unwrap();
        assert_eq!(parsed.kind, GraphEventKind::CookStart);
        assert_eq!(parsed.work_item, None);
        assert!(parsed.message.is_empty());
    }

    #[test]
    fn test_child_queries() {
        let bypassed = ChildQuery::bypassed_networks();
        assert!(bypassed.recursive);
        assert!(bypassed.flags.network && bypassed.flags.bypassed);

        let nodes = ChildQuery::task_nodes();
        assert_eq!(nodes.node_type, Some(NodeType::Task));
        assert!(!nodes.flags.bypassed);

        let bypassed_nodes = ChildQuery::bypassed_task_nodes();
        assert_eq!(bypassed_nodes.node_type, None);
        assert!(bypassed_nodes.flags.bypassed && bypassed_nodes.flags.non_scheduler);
    }
}
