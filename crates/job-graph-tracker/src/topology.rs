//! Topology discovery
//!
//! [`TopologyBuilder`] rebuilds the networks and nodes of an [`AssetLink`]
//! from the engine. Rebuilding is idempotent with respect to identity: a
//! network or node found again at the same relative path reuses the previous
//! instance, so its tallies, work results and loaded outputs survive.
//!
//! # Key Concepts
//!
//! - **Previous pool**: the link's old networks (and each network's old
//!   nodes) are moved into a map keyed by path. Matches are removed from the
//!   pool; whatever is left over is cleared and its outputs released.
//! - **Failure policy**: a failed discovery call keeps the previous instance
//!   of that subtree unmodified instead of dropping it.

use std::collections::{HashMap, HashSet};

use crate::config::LinkFilters;
use crate::engine::{ChildQuery, EngineClient};
use crate::link::AssetLink;
use crate::network::GraphNetwork;
use crate::node::GraphNode;
use crate::types::{NodeState, NodeType, OutputId, RemoteHandle};

/// Rebuilds asset link topology from an engine session
pub struct TopologyBuilder<'a> {
    engine: &'a dyn EngineClient,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(engine: &'a dyn EngineClient) -> Self {
        Self { engine }
    }

    /// Rediscover the networks of `link`.
    ///
    /// Returns true iff at least one network with at least one node was
    /// found. If the network listing itself fails, the link is left as is.
    pub fn rebuild(&self, link: &mut AssetLink, zero_tallies: bool) -> bool {
        let asset = link.asset_handle;

        let all_networks = match self.engine.child_nodes(asset, ChildQuery::networks()) {
            Ok(handles) => handles,
            Err(e) => {
                log::error!(
                    "Failed to list networks of asset '{}' ({}): {}",
                    link.asset_name,
                    asset,
                    e
                );
                return false;
            }
        };
        let bypassed: HashSet<RemoteHandle> =
            match self.engine.child_nodes(asset, ChildQuery::bypassed_networks()) {
                Ok(handles) => handles.into_iter().collect(),
                Err(e) => {
                    log::error!(
                        "Failed to list bypassed networks of asset '{}' ({}): {}",
                        link.asset_name,
                        asset,
                        e
                    );
                    return false;
                }
            };
        let known: HashSet<RemoteHandle> = all_networks.iter().copied().collect();

        let mut previous: HashMap<String, GraphNetwork> = std::mem::take(&mut link.networks)
            .into_iter()
            .map(|n| (n.path.clone(), n))
            .collect();
        let mut networks = Vec::new();
        let mut released = Vec::new();

        for handle in all_networks.into_iter().filter(|h| !bypassed.contains(h)) {
            let info = match self.engine.node_info(handle) {
                Ok(info) => info,
                Err(e) => {
                    log::error!("Failed to get info of network {}: {}", handle, e);
                    let kept = take_by_handle(&mut previous, handle, |n: &GraphNetwork| n.handle);
                    networks.extend(kept);
                    continue;
                }
            };
            if !matches!(info.node_type, NodeType::Task | NodeType::Geometry) {
                continue;
            }

            match self.is_nested(info.parent, asset, &known) {
                Ok(false) => {}
                Ok(true) => {
                    log::debug!("Skipping nested network '{}' ({})", info.name, handle);
                    continue;
                }
                Err(e) => {
                    log::error!("Failed to walk parents of network '{}': {}", info.name, e);
                    let kept = take_by_handle(&mut previous, handle, |n: &GraphNetwork| n.handle);
                    networks.extend(kept);
                    continue;
                }
            }

            let path = match self.engine.node_path(handle, asset) {
                Ok(path) => path,
                Err(e) => {
                    log::error!("Failed to get path of network '{}': {}", info.name, e);
                    let kept = take_by_handle(&mut previous, handle, |n: &GraphNetwork| n.handle);
                    networks.extend(kept);
                    continue;
                }
            };

            let node_handles = match self.list_task_nodes(handle) {
                Ok(handles) => handles,
                Err(e) => {
                    log::error!("Failed to list nodes of network '{}': {}", path, e);
                    networks.extend(previous.remove(&path));
                    continue;
                }
            };
            if node_handles.is_empty() {
                log::debug!("Skipping network '{}' without task nodes", path);
                continue;
            }

            let mut network = previous
                .remove(&path)
                .unwrap_or_else(|| GraphNetwork::new(handle, info.name.clone(), path.clone()));
            network.handle = handle;
            network.name = info.name;
            network.path = path;
            network.parent_name = link.asset_name.clone();
            network.show_results = true;

            released.extend(self.rebuild_nodes(
                &mut network,
                &node_handles,
                &link.filters,
                zero_tallies,
            ));

            if network.nodes.is_empty() {
                continue;
            }
            network.ensure_visible_selection();
            log::debug!(
                "Discovered network '{}' with {} nodes",
                network.path,
                network.nodes.len()
            );
            networks.push(network);
        }

        for (path, mut network) in previous {
            log::debug!("Clearing network '{}' no longer in the asset", path);
            network.clear_work_results();
            for node in &mut network.nodes {
                released.extend(node.take_released_outputs());
            }
        }

        link.queue_released(released);
        link.networks = networks;
        if link.selected_network_index >= link.networks.len() {
            link.selected_network_index = 0;
        }
        link.needs_ui_refresh = true;

        log::info!(
            "Asset '{}' has {} graph networks",
            link.asset_name,
            link.networks.len()
        );
        !link.networks.is_empty()
    }

    /// Match-by-path rebuild of the nodes of one network.
    ///
    /// Returns the outputs released by nodes that disappeared.
    fn rebuild_nodes(
        &self,
        network: &mut GraphNetwork,
        handles: &[RemoteHandle],
        filters: &LinkFilters,
        zero_tallies: bool,
    ) -> Vec<OutputId> {
        let selected_uid = network.selected_node().map(|n| n.uid.clone());
        let mut previous: HashMap<String, GraphNode> = std::mem::take(&mut network.nodes)
            .into_iter()
            .map(|n| (n.path.clone(), n))
            .collect();
        let parent_name = format!("{}_{}", network.parent_name, network.name);

        for &handle in handles {
            let info = match self.engine.node_info(handle) {
                Ok(info) => info,
                Err(e) => {
                    log::error!("Failed to get info of node {}: {}", handle, e);
                    let kept = take_by_handle(&mut previous, handle, |n: &GraphNode| n.handle);
                    network.nodes.extend(kept);
                    continue;
                }
            };
            let path = match self.engine.node_path(handle, network.handle) {
                Ok(path) => path,
                Err(e) => {
                    log::error!("Failed to get path of node '{}': {}", info.name, e);
                    let kept = take_by_handle(&mut previous, handle, |n: &GraphNode| n.handle);
                    network.nodes.extend(kept);
                    continue;
                }
            };

            let mut node = previous
                .remove(&path)
                .unwrap_or_else(|| GraphNode::new(handle, info.name.clone(), path.clone()));
            node.handle = handle;
            node.name = info.name;
            node.path = path;
            if zero_tallies {
                node.zero_tally();
                node.state = NodeState::None;
            }
            node.parent_name = parent_name.clone();
            node.set_has_children(info.child_count > 0);
            node.apply_filters(filters);
            network.nodes.push(node);
        }

        let mut released = Vec::new();
        for (path, mut node) in previous {
            log::debug!("Clearing node '{}' no longer in '{}'", path, network.path);
            node.clear_work_results();
            released.extend(node.take_released_outputs());
        }

        network.selected_node_index = selected_uid
            .and_then(|uid| network.nodes.iter().position(|n| n.uid == uid));
        released
    }

    /// Non-scheduler task nodes of a network, minus bypassed ones
    fn list_task_nodes(&self, network: RemoteHandle) -> crate::Result<Vec<RemoteHandle>> {
        let nodes = self.engine.child_nodes(network, ChildQuery::task_nodes())?;
        let bypassed: HashSet<RemoteHandle> = self
            .engine
            .child_nodes(network, ChildQuery::bypassed_task_nodes())?
            .into_iter()
            .collect();
        Ok(nodes.into_iter().filter(|h| !bypassed.contains(h)).collect())
    }

    /// Whether any ancestor below the asset is itself a network
    fn is_nested(
        &self,
        mut parent: Option<RemoteHandle>,
        asset: RemoteHandle,
        networks: &HashSet<RemoteHandle>,
    ) -> crate::Result<bool> {
        while let Some(handle) = parent {
            if handle == asset {
                return Ok(false);
            }
            if networks.contains(&handle) {
                return Ok(true);
            }
            parent = self.engine.node_info(handle)?.parent;
        }
        Ok(false)
    }
}

fn take_by_handle<T>(
    pool: &mut HashMap<String, T>,
    handle: RemoteHandle,
    handle_of: impl Fn(&T) -> RemoteHandle,
) -> Option<T> {
    let key = pool
        .iter()
        .find(|(_, item)| handle_of(item) == handle)
        .map(|(key, _)| key.clone())?;
    pool.remove(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;
    use crate::tally::{TallyBucket, WorkItemTally};
    use crate::types::WorkResultState;
    use crate::work_result::{WorkResult, WorkResultObject};

    fn scripted() -> MockEngine {
        let engine = MockEngine::new();
        engine.add_container(1, "hda", None);
        engine.add_network(2, "topnet1", 1, 100);
        engine.add_task_node(3, "generate", 2);
        engine.add_task_node(4, "sub", 2);
        engine.add_task_node(5, "inner", 4);
        engine
    }

    fn loaded_result(output: &str) -> WorkResult {
        let mut result = WorkResult::new(1, 0);
        let mut object = WorkResultObject::new("o", "/o", 0, WorkResultState::Loaded);
        object.outputs.push(output.to_string());
        result.result_objects.push(object);
        result
    }

    #[test]
    fn test_rebuild_discovers_networks_and_nodes() {
        let engine = scripted();
        let mut link = AssetLink::new(1, "hda");

        assert!(TopologyBuilder::new(&engine).rebuild(&mut link, true));
        assert_eq!(link.networks.len(), 1);
        assert!(link.needs_ui_refresh);

        let network = &link.networks[0];
        assert_eq!(network.path, "topnet1");
        assert_eq!(network.parent_name, "hda");
        assert!(network.show_results);
        assert_eq!(network.selected_node_index, Some(0));

        let paths: Vec<&str> = network.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["generate", "sub", "sub/inner"]);
        assert!(network.nodes[1].has_children);
        assert!(!network.nodes[2].has_children);
        assert_eq!(network.nodes[2].parent_name, "hda_topnet1");
    }

    #[test]
    fn test_rebuild_preserves_identity() {
        let engine = scripted();
        let mut link = AssetLink::new(1, "hda");
        let builder = TopologyBuilder::new(&engine);
        assert!(builder.rebuild(&mut link, true));

        let network_uid = link.networks[0].uid.clone();
        let node_uid = link.networks[0].nodes[0].uid.clone();
        link.networks[0].nodes[0].record_work_item(1, TallyBucket::Cooked);
        link.networks[0].nodes[0].work_results.push(loaded_result("mesh"));

        // Same path, new engine handle
        engine.remove_node(3);
        engine.add_task_node(30, "generate", 2);
        assert!(builder.rebuild(&mut link, false));

        let network = &link.networks[0];
        assert_eq!(network.uid, network_uid);
        let node = &network.nodes[network.find_node_by_path("generate").unwrap()];
        assert_eq!(node.uid, node_uid);
        assert_eq!(node.handle, 30);
        assert_eq!(node.counts().cooked, 1);
        assert_eq!(node.work_results.len(), 1);
        assert!(link.take_released_outputs().is_empty());
    }

    #[test]
    fn test_rebuild_zeroes_tallies_when_asked() {
        let engine = scripted();
        let mut link = AssetLink::new(1, "hda");
        let builder = TopologyBuilder::new(&engine);
        assert!(builder.rebuild(&mut link, true));
        link.networks[0].nodes[0].record_work_item(1, TallyBucket::Cooked);
        link.networks[0].nodes[0].state = NodeState::CookComplete;

        assert!(builder.rebuild(&mut link, true));
        assert_eq!(link.networks[0].nodes[0].counts().total, 0);
        assert_eq!(link.networks[0].nodes[0].state, NodeState::None);
    }

    #[test]
    fn test_rebuild_skips_bypassed_nested_and_empty_networks() {
        let engine = scripted();
        engine.add_network(6, "bypassed_net", 1, 101);
        engine.add_task_node(7, "a", 6);
        engine.set_bypassed(6, true);
        engine.add_network(8, "nested_net", 4, 102);
        engine.add_task_node(9, "b", 8);
        engine.add_network(10, "empty_net", 1, 103);

        let mut link = AssetLink::new(1, "hda");
        assert!(TopologyBuilder::new(&engine).rebuild(&mut link, true));
        let names: Vec<&str> = link.networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["topnet1"]);
    }

    #[test]
    fn test_rebuild_skips_bypassed_nodes() {
        let engine = scripted();
        engine.set_bypassed(3, true);

        let mut link = AssetLink::new(1, "hda");
        assert!(TopologyBuilder::new(&engine).rebuild(&mut link, true));
        assert!(link.networks[0].find_node_by_path("generate").is_none());
        assert_eq!(link.networks[0].nodes.len(), 2);
    }

    #[test]
    fn test_rebuild_clears_leftovers() {
        let engine = scripted();
        let mut link = AssetLink::new(1, "hda");
        let builder = TopologyBuilder::new(&engine);
        assert!(builder.rebuild(&mut link, true));
        link.networks[0].nodes[0].work_results.push(loaded_result("mesh_generate"));
        link.networks[0].nodes[0].output_container = Some("group_generate".to_string());

        engine.remove_node(3);
        assert!(builder.rebuild(&mut link, false));
        assert!(link.networks[0].find_node_by_path("generate").is_none());

        let released = link.take_released_outputs();
        assert!(released.contains(&"mesh_generate".to_string()));
        assert!(released.contains(&"group_generate".to_string()));
    }

    #[test]
    fn test_rebuild_without_networks_fails() {
        let engine = MockEngine::new();
        engine.add_container(1, "plain_asset", None);

        let mut link = AssetLink::new(1, "plain_asset");
        assert!(!TopologyBuilder::new(&engine).rebuild(&mut link, true));
        assert!(link.networks.is_empty());
    }

    #[test]
    fn test_rebuild_failure_keeps_previous_topology() {
        let engine = scripted();
        let mut link = AssetLink::new(1, "hda");
        let builder = TopologyBuilder::new(&engine);
        assert!(builder.rebuild(&mut link, true));
        let uid = link.networks[0].uid.clone();

        engine.fail("child_nodes");
        assert!(!builder.rebuild(&mut link, false));
        assert_eq!(link.networks.len(), 1);
        assert_eq!(link.networks[0].nodes.len(), 3);
        engine.recover("child_nodes");

        engine.fail("node_info");
        assert!(builder.rebuild(&mut link, false));
        assert_eq!(link.networks[0].uid, uid);
        assert_eq!(link.networks[0].nodes.len(), 3);
    }
}
