//! Asset links
//!
//! An [`AssetLink`] binds the local session to one remote asset hosting a
//! job graph. It owns the discovered networks, the name filters, and the
//! aggregated tally shown to the UI.

use serde::{Deserialize, Serialize};

use crate::config::LinkFilters;
use crate::network::GraphNetwork;
use crate::node::GraphNode;
use crate::tally::{TallyCounts, WorkItemTally};
use crate::types::{LinkId, LinkState, OutputId, RemoteHandle};

/// Position of a node inside an asset link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLocation {
    pub network: usize,
    pub node: usize,
}

/// Binding between the local session and one remote graph-hosting asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetLink {
    /// Registry key
    pub id: LinkId,
    /// Engine handle of the hosting asset
    pub asset_handle: RemoteHandle,
    pub asset_name: String,
    pub state: LinkState,
    pub networks: Vec<GraphNetwork>,
    pub selected_network_index: usize,
    pub filters: LinkFilters,
    /// Cook the selected network after every asset cook
    pub auto_cook: bool,
    /// Sum of every leaf node tally, recomputed each tick
    pub tally: TallyCounts,
    /// Set by anything that needs a full UI refresh on the next tick
    #[serde(skip)]
    pub needs_ui_refresh: bool,
    #[serde(skip)]
    released_outputs: Vec<OutputId>,
}

impl AssetLink {
    pub fn new(asset_handle: RemoteHandle, asset_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset_handle,
            asset_name: asset_name.into(),
            state: LinkState::Inactive,
            networks: Vec::new(),
            selected_network_index: 0,
            filters: LinkFilters::default(),
            auto_cook: false,
            tally: TallyCounts::default(),
            needs_ui_refresh: false,
            released_outputs: Vec::new(),
        }
    }

    /// Set the initial filters
    pub fn with_filters(mut self, filters: LinkFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_auto_cook(mut self, auto_cook: bool) -> Self {
        self.auto_cook = auto_cook;
        self
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn selected_network(&self) -> Option<&GraphNetwork> {
        self.networks.get(self.selected_network_index)
    }

    /// Select a network; out-of-range indices are ignored
    pub fn select_network(&mut self, index: usize) -> bool {
        if index >= self.networks.len() {
            return false;
        }
        self.selected_network_index = index;
        self.needs_ui_refresh = true;
        true
    }

    /// Reverse lookup of a node by its engine handle
    pub fn find_node_by_handle(&self, handle: RemoteHandle) -> Option<NodeLocation> {
        self.networks.iter().enumerate().find_map(|(n, network)| {
            network
                .find_node_by_handle(handle)
                .map(|node| NodeLocation { network: n, node })
        })
    }

    pub fn find_network_by_name(&self, name: &str) -> Option<usize> {
        self.networks.iter().position(|n| n.name == name)
    }

    pub fn node(&self, location: NodeLocation) -> Option<&GraphNode> {
        self.networks
            .get(location.network)
            .and_then(|n| n.nodes.get(location.node))
    }

    pub fn node_mut(&mut self, location: NodeLocation) -> Option<&mut GraphNode> {
        self.networks
            .get_mut(location.network)
            .and_then(|n| n.nodes.get_mut(location.node))
    }

    // =========================================================================
    // Tally and filters
    // =========================================================================

    /// Recompute parent node tallies and the link tally from leaf nodes
    pub fn update_work_item_tally(&mut self) {
        for network in &mut self.networks {
            network.recompute_parent_tallies();
        }
        self.tally = self.networks.iter().map(|n| n.tally()).sum();
    }

    /// Replace the filters and re-evaluate every node in place
    pub fn set_filters(&mut self, filters: LinkFilters) {
        self.filters = filters;
        for network in &mut self.networks {
            for node in &mut network.nodes {
                node.apply_filters(&self.filters);
            }
            network.ensure_visible_selection();
        }
        self.needs_ui_refresh = true;
    }

    pub fn any_pending(&self) -> bool {
        self.tally.any_pending()
    }

    // =========================================================================
    // Output release
    // =========================================================================

    pub(crate) fn queue_released(&mut self, outputs: impl IntoIterator<Item = OutputId>) {
        self.released_outputs.extend(outputs);
    }

    /// Destroy all results of every node and drop the topology
    pub fn clear_all(&mut self) {
        for network in &mut self.networks {
            network.clear_work_results();
        }
        let released: Vec<OutputId> = self
            .networks
            .iter_mut()
            .flat_map(|n| n.nodes.iter_mut())
            .flat_map(|node| node.take_released_outputs())
            .collect();
        self.released_outputs.extend(released);
        self.networks.clear();
    }

    /// Drain outputs released by this link and all of its nodes
    pub fn take_released_outputs(&mut self) -> Vec<OutputId> {
        let mut released = std::mem::take(&mut self.released_outputs);
        for node in self.networks.iter_mut().flat_map(|n| n.nodes.iter_mut()) {
            released.extend(node.take_released_outputs());
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::TallyBucket;
    use crate::types::WorkResultState;
    use crate::work_result::{WorkResult, WorkResultObject};

    fn test_link() -> AssetLink {
        let mut link = AssetLink::new(1, "hda");
        let mut net_a = GraphNetwork::new(10, "topnet_a", "topnet_a");
        let mut sub = GraphNode::new(11, "sub", "sub");
        sub.set_has_children(true);
        net_a.nodes.push(sub);
        net_a.nodes.push(GraphNode::new(12, "leaf", "sub/leaf"));
        let mut net_b = GraphNetwork::new(20, "topnet_b", "topnet_b");
        net_b.nodes.push(GraphNode::new(21, "other", "other"));
        link.networks = vec![net_a, net_b];
        link
    }

    #[test]
    fn test_find_node_by_handle() {
        let link = test_link();
        assert_eq!(
            link.find_node_by_handle(21),
            Some(NodeLocation { network: 1, node: 0 })
        );
        assert_eq!(link.find_node_by_handle(99), None);
        assert_eq!(link.find_network_by_name("topnet_b"), Some(1));
    }

    #[test]
    fn test_update_work_item_tally_counts_leaves_once() {
        let mut link = test_link();
        let leaf = NodeLocation { network: 0, node: 1 };
        link.node_mut(leaf).unwrap().record_work_item(1, TallyBucket::Cooked);
        let other = NodeLocation { network: 1, node: 0 };
        link.node_mut(other).unwrap().record_work_item(2, TallyBucket::Waiting);

        link.update_work_item_tally();
        assert_eq!(link.tally.total, 2);
        assert_eq!(link.tally.cooked, 1);
        assert!(link.any_pending());
        assert_eq!(link.networks[0].nodes[0].counts().cooked, 1);

        link.update_work_item_tally();
        assert_eq!(link.tally.total, 2);
    }

    #[test]
    fn test_set_filters_reevaluates_nodes() {
        let mut link = test_link();
        link.set_filters(LinkFilters {
            use_node_filter: true,
            node_filter: "le".to_string(),
            ..Default::default()
        });
        assert!(link.networks[0].nodes[0].hidden);
        assert!(!link.networks[0].nodes[1].hidden);
        assert_eq!(link.networks[0].selected_node_index, Some(1));
        assert!(link.needs_ui_refresh);
    }

    #[test]
    fn test_select_network() {
        let mut link = test_link();
        assert!(link.select_network(1));
        assert_eq!(link.selected_network().unwrap().name, "topnet_b");
        assert!(!link.select_network(2));
        assert_eq!(link.selected_network_index, 1);
    }

    #[test]
    fn test_clear_all_releases_outputs() {
        let mut link = test_link();
        let node = link.node_mut(NodeLocation { network: 1, node: 0 }).unwrap();
        let mut result = WorkResult::new(3, 0);
        let mut object = WorkResultObject::new("o", "/o", 0, WorkResultState::Loaded);
        object.outputs.push("mesh".to_string());
        result.result_objects.push(object);
        node.work_results.push(result);

        link.clear_all();
        assert!(link.networks.is_empty());
        assert_eq!(link.take_released_outputs(), vec!["mesh".to_string()]);
    }
}
