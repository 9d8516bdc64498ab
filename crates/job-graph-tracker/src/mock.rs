//! Scriptable in-memory engine
//!
//! [`MockEngine`] implements [`EngineClient`] over a plain node table, a
//! list of work items and per-context event queues. It is deserializable
//! from JSON so scenarios can be replayed, and it records every command the
//! tracker issues.
//!
//! Useful for testing and for replaying captured sessions.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::{
    ChildQuery, EngineClient, ExecutionContext, GraphEvent, NodeInfo, ResultDescriptor,
    WorkItemInfo,
};
use crate::error::TrackerError;
use crate::types::{ContextId, CookState, NodeType, RemoteHandle, WorkItemId};
use crate::Result;

/// A node in the scripted engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockNode {
    pub handle: RemoteHandle,
    pub name: String,
    #[serde(default)]
    pub parent: Option<RemoteHandle>,
    #[serde(default)]
    pub node_type: NodeType,
    /// Task network container
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default)]
    pub scheduler: bool,
    /// Context owning this node and its descendants
    #[serde(default)]
    pub context: Option<ContextId>,
}

/// A live work item in the scripted engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockWorkItem {
    pub id: WorkItemId,
    pub node: RemoteHandle,
    pub name: String,
    pub index: i32,
    #[serde(default)]
    pub results: Vec<ResultDescriptor>,
}

/// An execution context with its pending events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockContext {
    pub id: ContextId,
    pub name: String,
    #[serde(default)]
    pub cook_state: CookState,
    #[serde(default)]
    pub events: VecDeque<GraphEvent>,
}

/// Complete scripted engine state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MockEngineState {
    pub nodes: Vec<MockNode>,
    pub work_items: Vec<MockWorkItem>,
    pub contexts: Vec<MockContext>,
    /// Engine calls that currently fail, by method name
    pub failing_calls: HashSet<String>,
}

/// Command issued by the tracker to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Dirty { node: RemoteHandle, recursive: bool },
    Cook(RemoteHandle),
    CookOutputs(RemoteHandle),
    Pause(ContextId),
    Cancel(ContextId),
}

/// In-memory [`EngineClient`]
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockEngineState>,
    commands: Mutex<Vec<EngineCommand>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: MockEngineState) -> Self {
        Self {
            state: Mutex::new(state),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the scripted state
    pub fn state(&self) -> MockEngineState {
        self.state.lock().clone()
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    pub fn add_node(&self, node: MockNode) {
        self.state.lock().nodes.push(node);
    }

    /// Add a plain container node (asset root, object, ...)
    pub fn add_container(&self, handle: RemoteHandle, name: &str, parent: Option<RemoteHandle>) {
        self.add_node(MockNode {
            handle,
            name: name.to_string(),
            parent,
            node_type: NodeType::Object,
            network: false,
            bypassed: false,
            scheduler: false,
            context: None,
        });
    }

    /// Add a task network owning execution context `context`
    pub fn add_network(
        &self,
        handle: RemoteHandle,
        name: &str,
        parent: RemoteHandle,
        context: ContextId,
    ) {
        self.add_node(MockNode {
            handle,
            name: name.to_string(),
            parent: Some(parent),
            node_type: NodeType::Task,
            network: true,
            bypassed: false,
            scheduler: false,
            context: Some(context),
        });
        let mut state = self.state.lock();
        if !state.contexts.iter().any(|c| c.id == context) {
            state.contexts.push(MockContext {
                id: context,
                name: name.to_string(),
                cook_state: CookState::Ready,
                events: VecDeque::new(),
            });
        }
    }

    /// Add a non-scheduler task node
    pub fn add_task_node(&self, handle: RemoteHandle, name: &str, parent: RemoteHandle) {
        self.add_node(MockNode {
            handle,
            name: name.to_string(),
            parent: Some(parent),
            node_type: NodeType::Task,
            network: false,
            bypassed: false,
            scheduler: false,
            context: None,
        });
    }

    pub fn set_bypassed(&self, handle: RemoteHandle, bypassed: bool) {
        if let Some(node) = self.state.lock().nodes.iter_mut().find(|n| n.handle == handle) {
            node.bypassed = bypassed;
        }
    }

    pub fn remove_node(&self, handle: RemoteHandle) {
        self.state.lock().nodes.retain(|n| n.handle != handle);
    }

    pub fn add_work_item(
        &self,
        node: RemoteHandle,
        id: WorkItemId,
        index: i32,
        results: Vec<ResultDescriptor>,
    ) {
        self.state.lock().work_items.push(MockWorkItem {
            id,
            node,
            name: format!("item{}", index),
            index,
            results,
        });
    }

    pub fn remove_work_item(&self, id: WorkItemId) {
        self.state.lock().work_items.retain(|w| w.id != id);
    }

    pub fn set_results(&self, id: WorkItemId, results: Vec<ResultDescriptor>) {
        if let Some(item) = self.state.lock().work_items.iter_mut().find(|w| w.id == id) {
            item.results = results;
        }
    }

    pub fn push_event(&self, context: ContextId, event: GraphEvent) {
        if let Some(ctx) = self.state.lock().contexts.iter_mut().find(|c| c.id == context) {
            ctx.events.push_back(event);
        }
    }

    pub fn pending_events(&self, context: ContextId) -> usize {
        self.state
            .lock()
            .contexts
            .iter()
            .find(|c| c.id == context)
            .map(|c| c.events.len())
            .unwrap_or(0)
    }

    pub fn set_cook_state(&self, context: ContextId, cook_state: CookState) {
        if let Some(ctx) = self.state.lock().contexts.iter_mut().find(|c| c.id == context) {
            ctx.cook_state = cook_state;
        }
    }

    /// Make every call to `call` fail until [`MockEngine::recover`]
    pub fn fail(&self, call: &str) {
        self.state.lock().failing_calls.insert(call.to_string());
    }

    pub fn recover(&self, call: &str) {
        self.state.lock().failing_calls.remove(call);
    }

    /// Commands issued so far
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.commands.lock().clone()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check(&self, call: &'static str) -> Result<()> {
        if self.state.lock().failing_calls.contains(call) {
            return Err(TrackerError::remote(call, "scripted failure"));
        }
        Ok(())
    }

    fn record(&self, command: EngineCommand) {
        self.commands.lock().push(command);
    }

    fn is_descendant(state: &MockEngineState, node: &MockNode, ancestor: RemoteHandle) -> bool {
        let mut parent = node.parent;
        while let Some(handle) = parent {
            if handle == ancestor {
                return true;
            }
            parent = state
                .nodes
                .iter()
                .find(|n| n.handle == handle)
                .and_then(|n| n.parent);
        }
        false
    }

    fn missing(call: &'static str, what: impl std::fmt::Display) -> TrackerError {
        TrackerError::remote(call, format!("{} does not exist", what))
    }
}

impl EngineClient for MockEngine {
    fn child_nodes(&self, parent: RemoteHandle, query: ChildQuery) -> Result<Vec<RemoteHandle>> {
        self.check("child_nodes")?;
        let state = self.state.lock();
        if !state.nodes.iter().any(|n| n.handle == parent) {
            return Err(Self::missing("child_nodes", parent));
        }
        let handles = state
            .nodes
            .iter()
            .filter(|n| {
                if query.recursive {
                    Self::is_descendant(&state, n, parent)
                } else {
                    n.parent == Some(parent)
                }
            })
            .filter(|n| query.node_type.map_or(true, |t| n.node_type == t))
            .filter(|n| !query.flags.network || n.network)
            .filter(|n| !query.flags.bypassed || n.bypassed)
            .filter(|n| {
                !query.flags.non_scheduler
                    || (n.node_type == NodeType::Task && !n.scheduler && !n.network)
            })
            .map(|n| n.handle)
            .collect();
        Ok(handles)
    }

    fn node_info(&self, node: RemoteHandle) -> Result<NodeInfo> {
        self.check("node_info")?;
        let state = self.state.lock();
        let found = state
            .nodes
            .iter()
            .find(|n| n.handle == node)
            .ok_or_else(|| Self::missing("node_info", node))?;
        Ok(NodeInfo {
            name: found.name.clone(),
            parent: found.parent,
            node_type: found.node_type,
            child_count: state
                .nodes
                .iter()
                .filter(|n| n.parent == Some(node))
                .count(),
        })
    }

    fn node_path(&self, node: RemoteHandle, relative_to: RemoteHandle) -> Result<String> {
        self.check("node_path")?;
        let state = self.state.lock();
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(handle) = current {
            if handle == relative_to {
                segments.reverse();
                return Ok(segments.join("/"));
            }
            let found = state
                .nodes
                .iter()
                .find(|n| n.handle == handle)
                .ok_or_else(|| Self::missing("node_path", handle))?;
            segments.push(found.name.clone());
            current = found.parent;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    fn execution_contexts(&self) -> Result<Vec<ExecutionContext>> {
        self.check("execution_contexts")?;
        Ok(self
            .state
            .lock()
            .contexts
            .iter()
            .map(|c| ExecutionContext {
                name: c.name.clone(),
                id: c.id,
            })
            .collect())
    }

    fn drain_events(
        &self,
        context: ContextId,
        buffer: &mut Vec<GraphEvent>,
        max_count: usize,
    ) -> Result<usize> {
        self.check("drain_events")?;
        buffer.clear();
        let mut state = self.state.lock();
        let ctx = state
            .contexts
            .iter_mut()
            .find(|c| c.id == context)
            .ok_or_else(|| Self::missing("drain_events", context))?;
        let count = max_count.min(ctx.events.len());
        buffer.extend(ctx.events.drain(..count));
        Ok(ctx.events.len())
    }

    fn work_item_info(&self, _context: ContextId, work_item: WorkItemId) -> Result<WorkItemInfo> {
        self.check("work_item_info")?;
        let state = self.state.lock();
        let item = state
            .work_items
            .iter()
            .find(|w| w.id == work_item)
            .ok_or_else(|| Self::missing("work_item_info", work_item))?;
        Ok(WorkItemInfo {
            name: item.name.clone(),
            result_count: item.results.len(),
            index: item.index,
        })
    }

    fn work_item_results(
        &self,
        _node: RemoteHandle,
        work_item: WorkItemId,
        count: usize,
    ) -> Result<Vec<ResultDescriptor>> {
        self.check("work_item_results")?;
        let state = self.state.lock();
        let item = state
            .work_items
            .iter()
            .find(|w| w.id == work_item)
            .ok_or_else(|| Self::missing("work_item_results", work_item))?;
        Ok(item.results.iter().take(count).cloned().collect())
    }

    fn live_work_item_ids(&self, node: RemoteHandle) -> Result<Vec<WorkItemId>> {
        self.check("live_work_item_ids")?;
        Ok(self
            .state
            .lock()
            .work_items
            .iter()
            .filter(|w| w.node == node)
            .map(|w| w.id)
            .collect())
    }

    fn context_id(&self, node: RemoteHandle) -> Result<ContextId> {
        self.check("context_id")?;
        let state = self.state.lock();
        let mut current = Some(node);
        while let Some(handle) = current {
            let found = state
                .nodes
                .iter()
                .find(|n| n.handle == handle)
                .ok_or_else(|| Self::missing("context_id", handle))?;
            if let Some(context) = found.context {
                return Ok(context);
            }
            current = found.parent;
        }
        Err(TrackerError::remote("context_id", format!("node {} has no context", node)))
    }

    fn dirty_node(&self, node: RemoteHandle, recursive: bool) -> Result<()> {
        self.check("dirty_node")?;
        self.record(EngineCommand::Dirty { node, recursive });
        Ok(())
    }

    fn cook_node(&self, node: RemoteHandle) -> Result<()> {
        self.check("cook_node")?;
        self.record(EngineCommand::Cook(node));
        Ok(())
    }

    fn cook_outputs(&self, network: RemoteHandle) -> Result<()> {
        self.check("cook_outputs")?;
        self.record(EngineCommand::CookOutputs(network));
        Ok(())
    }

    fn pause_cook(&self, context: ContextId) -> Result<()> {
        self.check("pause_cook")?;
        self.record(EngineCommand::Pause(context));
        Ok(())
    }

    fn cancel_cook(&self, context: ContextId) -> Result<()> {
        self.check("cancel_cook")?;
        self.record(EngineCommand::Cancel(context));
        Ok(())
    }

    fn cook_state(&self, context: ContextId) -> Result<CookState> {
        self.check("cook_state")?;
        self.state
            .lock()
            .contexts
            .iter()
            .find(|c| c.id == context)
            .map(|c| c.cook_state)
            .ok_or_else(|| Self::missing("cook_state", context))
    }
}
