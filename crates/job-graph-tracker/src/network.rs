//! Graph networks
//!
//! A [`GraphNetwork`] is a named scope holding the [`GraphNode`]s discovered
//! under one remote task network. Nested nodes (subnetworks) are flattened
//! into the same list; their nesting is expressed through paths, and the
//! parent nodes aggregate their children's tallies and states.

use serde::{Deserialize, Serialize};

use crate::node::GraphNode;
use crate::tally::{NodeTally, TallyCounts, WorkItemTally};
use crate::types::{NodeState, RemoteHandle};

/// Local mirror of a remote task network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNetwork {
    /// Stable local identity, preserved across rebuilds
    pub uid: String,
    /// Engine handle (refreshed on every rebuild)
    pub handle: RemoteHandle,
    pub name: String,
    /// Path relative to the hosting asset
    pub path: String,
    /// Name of the enclosing scope
    pub parent_name: String,
    /// Index into `nodes` of the node shown in the UI
    pub selected_node_index: Option<usize>,
    pub show_results: bool,
    pub nodes: Vec<GraphNode>,
}

impl GraphNetwork {
    pub fn new(handle: RemoteHandle, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            handle,
            name: name.into(),
            path: path.into(),
            parent_name: String::new(),
            selected_node_index: None,
            show_results: false,
            nodes: Vec::new(),
        }
    }

    pub fn find_node_by_handle(&self, handle: RemoteHandle) -> Option<usize> {
        self.nodes.iter().position(|n| n.handle == handle)
    }

    pub fn find_node_by_path(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.path == path)
    }

    pub fn selected_node(&self) -> Option<&GraphNode> {
        self.selected_node_index.and_then(|i| self.nodes.get(i))
    }

    /// Select a node by index. Hidden or out-of-range nodes are refused.
    pub fn select_node(&mut self, index: usize) -> bool {
        match self.nodes.get(index) {
            Some(node) if !node.hidden => {
                self.selected_node_index = Some(index);
                true
            }
            _ => false,
        }
    }

    /// Keep the current selection if it is still valid and visible,
    /// otherwise select the first visible node.
    pub fn ensure_visible_selection(&mut self) {
        let valid = self
            .selected_node()
            .map(|node| !node.hidden)
            .unwrap_or(false);
        if valid {
            return;
        }
        self.selected_node_index = self.nodes.iter().position(|n| !n.hidden);
    }

    /// Index of the node enclosing `node_index`, found by path
    pub fn parent_node_index(&self, node_index: usize) -> Option<usize> {
        let node = self.nodes.get(node_index)?;
        let trimmed = node.path.trim_end_matches('/');
        let (parent_path, _) = trimmed.rsplit_once('/')?;
        self.nodes
            .iter()
            .enumerate()
            .find(|(i, n)| *i != node_index && n.path == parent_path)
            .map(|(i, _)| i)
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Recompute the tally and state of every parent node from scratch.
    ///
    /// A parent sums the tallies of all leaf nodes below its path, and takes
    /// the highest-precedence state among them.
    pub fn recompute_parent_tallies(&mut self) {
        for index in 0..self.nodes.len() {
            if !self.nodes[index].has_children {
                continue;
            }
            let prefix = format!("{}/", self.nodes[index].path.trim_end_matches('/'));
            let mut counts = TallyCounts::default();
            let mut state = NodeState::None;
            for child in self
                .nodes
                .iter()
                .filter(|n| !n.has_children && n.path.starts_with(&prefix))
            {
                counts += child.counts();
                if child.state.precedence() > state.precedence() {
                    state = child.state;
                }
            }
            let parent = &mut self.nodes[index];
            parent.tally = NodeTally::Aggregated(counts);
            parent.state = state;
        }
    }

    /// Sum of the leaf node tallies of this network
    pub fn tally(&self) -> TallyCounts {
        self.nodes
            .iter()
            .filter(|n| !n.has_children)
            .map(|n| n.counts())
            .sum()
    }

    pub fn any_pending(&self) -> bool {
        self.nodes.iter().any(|n| n.any_pending())
    }

    pub fn any_failed(&self) -> bool {
        self.nodes.iter().any(|n| n.any_failed())
    }

    /// True once every node reported cook-complete since its last cook start
    pub fn all_nodes_cook_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.has_received_cook_complete)
    }

    /// Clear the work results of every node
    pub fn clear_work_results(&mut self) {
        for node in &mut self.nodes {
            node.clear_work_results();
        }
    }
}
