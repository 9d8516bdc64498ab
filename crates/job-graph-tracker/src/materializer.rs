//! Result materialization bookkeeping
//!
//! The tracker never builds host objects from artifacts itself. A
//! [`Materializer`] does, and this module drives the artifact lifecycle
//! around it:
//!
//! ```text
//! NotLoaded ──▶ ToLoad ──▶ Loading ──▶ Loaded ──▶ ToDelete ──▶ Deleting ──▶ Deleted
//!                              │
//!                              └──(load failed)──▶ None
//! ```
//!
//! Hosts that materialize synchronously implement [`Materializer`] and let
//! [`process_work_item_results`] call it every tick. Hosts that materialize
//! asynchronously use the pull API on [`AssetLink`] instead
//! ([`AssetLink::pending_loads`], [`AssetLink::report_loaded`], ...).
//!
//! A loaded artifact may carry no outputs at all. It stays `Loaded` until the
//! host reports the outputs lost with [`AssetLink::report_outputs_lost`].

use crate::error::TrackerError;
use crate::events::{emit, EventSink, TrackerEvent};
use crate::link::{AssetLink, NodeLocation};
use crate::registry::AssetLinkRegistry;
use crate::types::{LinkId, OutputId, WorkResultState};
use crate::Result;

/// An artifact waiting to be materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLoad {
    pub link_id: LinkId,
    pub network: String,
    /// Stable identity of the owning node
    pub node_uid: String,
    pub node_path: String,
    pub work_result_index: usize,
    pub work_item_index: i32,
    pub result_object_index: usize,
    pub result_info_index: Option<usize>,
    /// Artifact name
    pub name: String,
    /// Artifact locator (e.g. a file path)
    pub locator: String,
}

/// Outputs of an artifact waiting to be destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub link_id: LinkId,
    pub node_uid: String,
    pub work_result_index: usize,
    pub result_object_index: usize,
    pub outputs: Vec<OutputId>,
}

/// Turns loaded artifact references into host output objects
pub trait Materializer {
    /// Materialize one artifact, returning the created outputs.
    ///
    /// `None` marks the load as failed.
    fn load(&mut self, request: &PendingLoad) -> Option<Vec<OutputId>>;

    /// Destroy outputs previously returned by [`Materializer::load`]
    fn release(&mut self, outputs: &[OutputId]);
}

/// Advance every artifact of every link by one lifecycle step.
///
/// Without a materializer, `ToLoad` and `ToDelete` artifacts are left for the
/// pull API. The per-node "have loaded / have not loaded" caches are always
/// refreshed.
pub fn process_work_item_results(
    registry: &mut AssetLinkRegistry,
    mut materializer: Option<&mut dyn Materializer>,
    sink: &dyn EventSink,
) {
    for link in registry.iter_mut() {
        let link_id = link.id.clone();
        for network in &mut link.networks {
            for node in &mut network.nodes {
                node.have_loaded_work_results = false;
                node.have_not_loaded_work_results = false;

                for wr_index in 0..node.work_results.len() {
                    for wro_index in 0..node.work_results[wr_index].result_objects.len() {
                        let work_item_index = node.work_results[wr_index].work_item_index;
                        let object = &mut node.work_results[wr_index].result_objects[wro_index];
                        match object.state {
                            WorkResultState::ToLoad => {
                                let Some(materializer) = materializer.as_deref_mut() else {
                                    node.have_not_loaded_work_results = true;
                                    continue;
                                };
                                object.state = WorkResultState::Loading;
                                let request = PendingLoad {
                                    link_id: link_id.clone(),
                                    network: network.name.clone(),
                                    node_uid: node.uid.clone(),
                                    node_path: node.path.clone(),
                                    work_result_index: wr_index,
                                    work_item_index,
                                    result_object_index: wro_index,
                                    result_info_index: object.result_info_index,
                                    name: object.name.clone(),
                                    locator: object.locator.clone(),
                                };
                                match materializer.load(&request) {
                                    Some(outputs) => {
                                        object.state = WorkResultState::Loaded;
                                        object.auto_baked_since_last_load = false;
                                        object.outputs = outputs;
                                        node.have_loaded_work_results = true;
                                        emit(
                                            sink,
                                            TrackerEvent::WorkResultObjectLoaded {
                                                link_id: link_id.clone(),
                                                node_path: node.path.clone(),
                                                work_result_index: wr_index,
                                                result_info_index: request.result_info_index,
                                            },
                                        );
                                    }
                                    None => {
                                        log::warn!(
                                            "Failed to load '{}' from '{}'",
                                            request.name,
                                            request.locator
                                        );
                                        object.state = WorkResultState::None;
                                    }
                                }
                            }
                            WorkResultState::Loaded => {
                                node.have_loaded_work_results = true;
                            }
                            WorkResultState::ToDelete => {
                                node.have_not_loaded_work_results = true;
                                let Some(materializer) = materializer.as_deref_mut() else {
                                    continue;
                                };
                                object.state = WorkResultState::Deleting;
                                let outputs = std::mem::take(&mut object.outputs);
                                materializer.release(&outputs);
                                object.state = WorkResultState::Deleted;
                            }
                            WorkResultState::Deleted | WorkResultState::NotLoaded => {
                                node.have_not_loaded_work_results = true;
                            }
                            WorkResultState::None
                            | WorkResultState::Loading
                            | WorkResultState::Deleting => {}
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Pull API
// =============================================================================

impl AssetLink {
    /// Artifacts queued for loading
    pub fn pending_loads(&self) -> Vec<PendingLoad> {
        let mut pending = Vec::new();
        for network in &self.networks {
            for node in &network.nodes {
                for (wr_index, result) in node.work_results.iter().enumerate() {
                    for (wro_index, object) in result.result_objects.iter().enumerate() {
                        if object.state != WorkResultState::ToLoad {
                            continue;
                        }
                        pending.push(PendingLoad {
                            link_id: self.id.clone(),
                            network: network.name.clone(),
                            node_uid: node.uid.clone(),
                            node_path: node.path.clone(),
                            work_result_index: wr_index,
                            work_item_index: result.work_item_index,
                            result_object_index: wro_index,
                            result_info_index: object.result_info_index,
                            name: object.name.clone(),
                            locator: object.locator.clone(),
                        });
                    }
                }
            }
        }
        pending
    }

    /// Artifacts queued for deletion, with the outputs to destroy
    pub fn pending_deletes(&self) -> Vec<PendingDelete> {
        let mut pending = Vec::new();
        for node in self.networks.iter().flat_map(|n| n.nodes.iter()) {
            for (wr_index, result) in node.work_results.iter().enumerate() {
                for (wro_index, object) in result.result_objects.iter().enumerate() {
                    if object.state == WorkResultState::ToDelete {
                        pending.push(PendingDelete {
                            link_id: self.id.clone(),
                            node_uid: node.uid.clone(),
                            work_result_index: wr_index,
                            result_object_index: wro_index,
                            outputs: object.outputs.clone(),
                        });
                    }
                }
            }
        }
        pending
    }

    /// Record a successful load. Returns the path of the owning node.
    pub fn report_loaded(
        &mut self,
        node_uid: &str,
        work_result_index: usize,
        result_info_index: usize,
        outputs: Vec<OutputId>,
    ) -> Result<String> {
        let location = self.require_node_by_uid(node_uid)?;
        let Some(node) = self.node_mut(location) else {
            return Err(TrackerError::NodeNotFound(node_uid.to_string()));
        };
        let object = node
            .work_results
            .get_mut(work_result_index)
            .and_then(|r| {
                r.find_object_by_result_info_index(result_info_index)
                    .map(|i| &mut r.result_objects[i])
            })
            .ok_or_else(|| {
                TrackerError::NodeNotFound(format!(
                    "{} result {}/{}",
                    node_uid, work_result_index, result_info_index
                ))
            })?;
        object.state = WorkResultState::Loaded;
        object.auto_baked_since_last_load = false;
        object.outputs = outputs;
        node.have_loaded_work_results = true;
        Ok(node.path.clone())
    }

    /// Record a failed load
    pub fn report_load_failed(
        &mut self,
        node_uid: &str,
        work_result_index: usize,
        result_info_index: usize,
    ) -> Result<()> {
        let location = self.require_node_by_uid(node_uid)?;
        if let Some(object) = self.node_mut(location).and_then(|node| {
            node.work_results.get_mut(work_result_index).and_then(|r| {
                r.find_object_by_result_info_index(result_info_index)
                    .map(|i| &mut r.result_objects[i])
            })
        }) {
            object.state = WorkResultState::None;
        }
        Ok(())
    }

    /// Record that the host destroyed an artifact's outputs
    pub fn report_deleted(
        &mut self,
        node_uid: &str,
        work_result_index: usize,
        result_object_index: usize,
    ) -> Result<()> {
        let location = self.require_node_by_uid(node_uid)?;
        if let Some(object) = self.node_mut(location).and_then(|node| {
            node.work_results
                .get_mut(work_result_index)
                .and_then(|r| r.result_objects.get_mut(result_object_index))
        }) {
            object.outputs.clear();
            object.state = WorkResultState::Deleted;
        }
        Ok(())
    }

    /// Record that the host lost the outputs of a loaded artifact.
    ///
    /// The artifact is queued for deletion so a later load request can
    /// bring it back. Artifacts in any other state are left alone.
    pub fn report_outputs_lost(
        &mut self,
        node_uid: &str,
        work_result_index: usize,
        result_object_index: usize,
    ) -> Result<()> {
        let location = self.require_node_by_uid(node_uid)?;
        let Some(object) = self.node_mut(location).and_then(|node| {
            node.work_results
                .get_mut(work_result_index)
                .and_then(|r| r.result_objects.get_mut(result_object_index))
        }) else {
            return Err(TrackerError::NodeNotFound(format!(
                "{} result {}/{}",
                node_uid, work_result_index, result_object_index
            )));
        };
        if object.state == WorkResultState::Loaded {
            object.outputs.clear();
            object.state = WorkResultState::ToDelete;
        }
        Ok(())
    }

    fn require_node_by_uid(&self, node_uid: &str) -> Result<NodeLocation> {
        self.networks
            .iter()
            .enumerate()
            .find_map(|(n, network)| {
                network
                    .nodes
                    .iter()
                    .position(|node| node.uid == node_uid)
                    .map(|node| NodeLocation { network: n, node })
            })
            .ok_or_else(|| TrackerError::NodeNotFound(node_uid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::network::GraphNetwork;
    use crate::node::GraphNode;
    use crate::work_result::{WorkResult, WorkResultObject};

    /// Loads everything except locators containing "broken"
    #[derive(Default)]
    struct RecordingMaterializer {
        loaded: Vec<String>,
        released: Vec<OutputId>,
    }

    impl Materializer for RecordingMaterializer {
        fn load(&mut self, request: &PendingLoad) -> Option<Vec<OutputId>> {
            if request.locator.contains("broken") {
                return None;
            }
            self.loaded.push(request.locator.clone());
            Some(vec![format!("out_{}", request.name)])
        }

        fn release(&mut self, outputs: &[OutputId]) {
            self.released.extend_from_slice(outputs);
        }
    }

    fn registry_with(objects: Vec<WorkResultObject>) -> AssetLinkRegistry {
        let mut result = WorkResult::new(7, 0);
        result.result_objects = objects;
        let mut node = GraphNode::new(3, "node1", "node1");
        node.work_results.push(result);
        let mut network = GraphNetwork::new(2, "net1", "net1");
        network.nodes.push(node);
        let mut link = AssetLink::new(1, "hda");
        link.networks.push(network);
        let mut registry = AssetLinkRegistry::new();
        registry.insert(link);
        registry
    }

    fn objects(registry: &AssetLinkRegistry) -> Vec<WorkResultObject> {
        registry.iter().next().unwrap().networks[0].nodes[0].work_results[0]
            .result_objects
            .clone()
    }

    #[test]
    fn test_process_loads_and_deletes() {
        let mut loaded = WorkResultObject::new("c", "/c", 2, WorkResultState::ToDelete);
        loaded.outputs = vec!["out_c".to_string()];
        let mut registry = registry_with(vec![
            WorkResultObject::new("a", "/a", 0, WorkResultState::ToLoad),
            WorkResultObject::new("b", "/broken", 1, WorkResultState::ToLoad),
            loaded,
        ]);
        let mut materializer = RecordingMaterializer::default();
        let sink = VecEventSink::new();

        process_work_item_results(&mut registry, Some(&mut materializer), &sink);

        let objects = objects(&registry);
        assert_eq!(objects[0].state, WorkResultState::Loaded);
        assert_eq!(objects[0].outputs, vec!["out_a".to_string()]);
        assert_eq!(objects[1].state, WorkResultState::None);
        assert_eq!(objects[2].state, WorkResultState::Deleted);
        assert_eq!(materializer.released, vec!["out_c".to_string()]);

        let node = &registry.iter().next().unwrap().networks[0].nodes[0];
        assert!(node.have_loaded_work_results);
        assert!(node.have_not_loaded_work_results);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TrackerEvent::WorkResultObjectLoaded {
                work_result_index: 0,
                result_info_index: Some(0),
                ..
            }
        ));
    }

    #[test]
    fn test_loaded_without_outputs_stays_loaded() {
        let mut registry = registry_with(vec![WorkResultObject::new(
            "a",
            "/a",
            0,
            WorkResultState::ToLoad,
        )]);
        let link_id = registry.iter().next().unwrap().id.clone();
        let uid = registry.get(&link_id).unwrap().pending_loads()[0]
            .node_uid
            .clone();
        registry
            .get_mut(&link_id)
            .unwrap()
            .report_loaded(&uid, 0, 0, Vec::new())
            .unwrap();

        let mut materializer = RecordingMaterializer::default();
        let sink = VecEventSink::new();
        for _ in 0..2 {
            process_work_item_results(&mut registry, Some(&mut materializer), &sink);
            assert_eq!(objects(&registry)[0].state, WorkResultState::Loaded);
        }
        assert!(materializer.released.is_empty());
        assert!(registry.iter().next().unwrap().networks[0].nodes[0].have_loaded_work_results);
    }

    #[test]
    fn test_lost_outputs_queue_delete() {
        let mut loaded = WorkResultObject::new("a", "/a", 0, WorkResultState::Loaded);
        loaded.outputs = vec!["out_a".to_string()];
        let mut registry = registry_with(vec![
            loaded,
            WorkResultObject::new("b", "/b", 1, WorkResultState::NotLoaded),
        ]);
        let link_id = registry.iter().next().unwrap().id.clone();
        let link = registry.get_mut(&link_id).unwrap();
        let uid = link.networks[0].nodes[0].uid.clone();

        link.report_outputs_lost(&uid, 0, 0).unwrap();
        link.report_outputs_lost(&uid, 0, 1).unwrap();
        assert!(link.report_outputs_lost(&uid, 0, 5).is_err());

        let objects_now = objects(&registry);
        assert_eq!(objects_now[0].state, WorkResultState::ToDelete);
        assert!(objects_now[0].outputs.is_empty());
        assert_eq!(objects_now[1].state, WorkResultState::NotLoaded);

        let mut materializer = RecordingMaterializer::default();
        process_work_item_results(&mut registry, Some(&mut materializer), &VecEventSink::new());
        assert_eq!(objects(&registry)[0].state, WorkResultState::Deleted);
    }

    #[test]
    fn test_pull_api() {
        let mut deleting = WorkResultObject::new("b", "/b", 1, WorkResultState::ToDelete);
        deleting.outputs = vec!["out_b".to_string()];
        let mut registry = registry_with(vec![
            WorkResultObject::new("a", "/a", 0, WorkResultState::ToLoad),
            deleting,
        ]);

        // Without a materializer nothing moves
        process_work_item_results(&mut registry, None, &VecEventSink::new());
        assert_eq!(objects(&registry)[0].state, WorkResultState::ToLoad);

        let link_id = registry.iter().next().unwrap().id.clone();
        let link = registry.get_mut(&link_id).unwrap();
        let loads = link.pending_loads();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].locator, "/a");
        assert_eq!(loads[0].network, "net1");

        let path = link
            .report_loaded(&loads[0].node_uid, 0, 0, vec!["mesh".to_string()])
            .unwrap();
        assert_eq!(path, "node1");

        let deletes = link.pending_deletes();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].outputs, vec!["out_b".to_string()]);
        link.report_deleted(&deletes[0].node_uid, 0, 1).unwrap();

        assert!(link.report_loaded("missing", 0, 0, vec![]).is_err());
        assert!(link.report_loaded(&loads[0].node_uid, 0, 9, vec![]).is_err());

        let objects = objects(&registry);
        assert_eq!(objects[0].state, WorkResultState::Loaded);
        assert_eq!(objects[1].state, WorkResultState::Deleted);
        assert!(objects[1].outputs.is_empty());
    }

    #[test]
    fn test_report_load_failed() {
        let mut registry = registry_with(vec![WorkResultObject::new(
            "a",
            "/a",
            0,
            WorkResultState::ToLoad,
        )]);
        let link_id = registry.iter().next().unwrap().id.clone();
        let link = registry.get_mut(&link_id).unwrap();
        let uid = link.pending_loads()[0].node_uid.clone();
        link.report_load_failed(&uid, 0, 0).unwrap();
        assert!(link.pending_loads().is_empty());
        assert_eq!(objects(&registry)[0].state, WorkResultState::None);
    }
}
