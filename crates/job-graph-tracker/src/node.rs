//! Graph nodes
//!
//! A [`GraphNode`] mirrors one remote task node. It carries the node status,
//! its work item tally and the ordered list of [`WorkResult`]s produced by
//! the node's work items.
//!
//! # Key Concepts
//!
//! - **Identity**: `uid` is assigned once and kept across topology rebuilds.
//!   Two snapshots of the same node compare equal on `uid`.
//! - **Released outputs**: destroying artifacts never frees host objects
//!   directly. Released output ids are queued on the node and drained by the
//!   host through the asset link.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::LinkFilters;
use crate::tally::{LeafTally, NodeTally, TallyBucket, TallyCounts, WorkItemTally};
use crate::types::{NodeState, OutputId, RemoteHandle, WorkItemId, WorkResultState};
use crate::work_result::{baked_output_key, BakedOutput, WorkResult};

/// Local mirror of a remote task node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Stable local identity, preserved across rebuilds
    pub uid: String,
    /// Engine handle (refreshed on every rebuild)
    pub handle: RemoteHandle,
    /// Node name
    pub name: String,
    /// Path relative to the owning network
    pub path: String,
    /// Owning scope name, used to build artifact names
    pub parent_name: String,
    /// Whether other nodes are nested below this one
    pub has_children: bool,
    /// Hidden by the node name filter
    pub hidden: bool,
    /// Load results as soon as they are produced
    pub auto_load: bool,
    /// Show loaded outputs
    pub show: bool,
    /// Current status
    pub state: NodeState,
    /// Work item counters
    pub tally: NodeTally,
    /// Work items in creation order
    pub work_results: Vec<WorkResult>,
    /// Baked outputs keyed by `"{work_result}_{result_object}"`
    pub baked_outputs: HashMap<String, BakedOutput>,
    /// Host container grouping this node's outputs
    pub output_container: Option<OutputId>,
    /// Set by cook-complete, reset by cook-start and dirty
    pub has_received_cook_complete: bool,
    /// Cached by result processing: some artifact is loaded
    #[serde(skip)]
    pub have_loaded_work_results: bool,
    /// Cached by result processing: some artifact is not loaded
    #[serde(skip)]
    pub have_not_loaded_work_results: bool,
    #[serde(skip)]
    released_outputs: Vec<OutputId>,
}

impl GraphNode {
    pub fn new(handle: RemoteHandle, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            handle,
            name: name.into(),
            path: path.into(),
            parent_name: String::new(),
            has_children: false,
            hidden: false,
            auto_load: false,
            show: false,
            state: NodeState::None,
            tally: NodeTally::default(),
            work_results: Vec::new(),
            baked_outputs: HashMap::new(),
            output_container: None,
            has_received_cook_complete: false,
            have_loaded_work_results: false,
            have_not_loaded_work_results: false,
            released_outputs: Vec::new(),
        }
    }

    /// Flag whether this node has nested nodes, switching the tally flavour
    pub fn set_has_children(&mut self, has_children: bool) {
        if self.has_children == has_children && self.tally_matches_children() {
            return;
        }
        self.has_children = has_children;
        self.tally = if has_children {
            NodeTally::Aggregated(TallyCounts::default())
        } else {
            NodeTally::Leaf(LeafTally::default())
        };
    }

    fn tally_matches_children(&self) -> bool {
        matches!(
            (&self.tally, self.has_children),
            (NodeTally::Aggregated(_), true) | (NodeTally::Leaf(_), false)
        )
    }

    /// Re-evaluate `hidden`, `auto_load` and `show` from name filters
    pub fn apply_filters(&mut self, filters: &LinkFilters) {
        self.hidden = filters.use_node_filter
            && !filters.node_filter.is_empty()
            && !self.name.starts_with(&filters.node_filter);

        if filters.use_output_filter {
            let autoload =
                filters.output_filter.is_empty() || self.name.starts_with(&filters.output_filter);
            self.auto_load = autoload;
            self.show = autoload;
        }
    }

    // =========================================================================
    // Tally
    // =========================================================================

    /// Record a work item in a bucket. No-op on parent nodes.
    pub fn record_work_item(&mut self, work_item_id: WorkItemId, bucket: TallyBucket) {
        if let Some(tally) = self.tally.as_leaf_mut() {
            tally.record(work_item_id, bucket);
        }
    }

    pub fn on_work_item_created(&mut self, work_item_id: WorkItemId) {
        if let Some(tally) = self.tally.as_leaf_mut() {
            tally.record_created(work_item_id);
        }
    }

    pub fn on_work_item_removed(&mut self, work_item_id: WorkItemId) {
        if let Some(tally) = self.tally.as_leaf_mut() {
            tally.remove(work_item_id);
        }
    }

    /// An item found live during pruning; counted cooked unless already tracked
    pub fn on_work_item_synced(&mut self, work_item_id: WorkItemId) {
        if let Some(tally) = self.tally.as_leaf_mut() {
            if tally.bucket_of(work_item_id).is_none() {
                tally.record(work_item_id, TallyBucket::Cooked);
            }
        }
    }

    /// Stop counting items the engine no longer knows about
    pub fn retain_tracked_work_items(&mut self, keep: impl FnMut(WorkItemId) -> bool) {
        if let Some(tally) = self.tally.as_leaf_mut() {
            tally.retain(keep);
        }
    }

    /// The item is waiting again, so any bake of its old results is stale
    pub fn on_work_item_waiting(&mut self, work_item_id: WorkItemId) {
        self.record_work_item(work_item_id, TallyBucket::Waiting);
        if let Some(index) = self.find_work_result_by_id(work_item_id) {
            for object in &mut self.work_results[index].result_objects {
                object.auto_baked_since_last_load = false;
            }
        }
    }

    pub fn zero_tally(&mut self) {
        self.tally.zero_all();
    }

    // =========================================================================
    // Cook lifecycle
    // =========================================================================

    pub fn on_cook_start(&mut self) {
        self.has_received_cook_complete = false;
    }

    pub fn on_cook_complete(&mut self) {
        self.has_received_cook_complete = true;
    }

    /// Reset per-cook flags. Loaded artifacts are left alone.
    pub fn on_dirty_node(&mut self) {
        self.has_received_cook_complete = false;
    }

    /// Human-readable status for display
    pub fn status_text(&self) -> &'static str {
        if self.state == NodeState::CookFailed || self.any_failed() {
            return "Cook Failed";
        }
        match self.state {
            NodeState::CookComplete => "Cook Completed",
            NodeState::Cooking => "Cook In Progress",
            NodeState::Dirtied => "Dirtied",
            NodeState::Dirtying => "Dirtying",
            _ => "",
        }
    }

    // =========================================================================
    // Work result lookup
    // =========================================================================

    pub fn find_work_result_by_id(&self, work_item_id: WorkItemId) -> Option<usize> {
        self.work_results
            .iter()
            .position(|r| r.work_item_id == Some(work_item_id))
    }

    /// First entry whose transient id is gone (e.g. after a session reload)
    pub fn first_unlinked_work_result(&self) -> Option<usize> {
        self.work_results.iter().position(|r| !r.is_linked())
    }

    /// Entry with the given stable ordinal that has no id or a stale one.
    ///
    /// Ordinals are not unique among live items, so an entry still bound to
    /// a live id is never a candidate.
    pub fn find_relinkable_by_ordinal(
        &self,
        work_item_index: i32,
        mut is_stale: impl FnMut(WorkItemId) -> bool,
    ) -> Option<usize> {
        self.work_results.iter().position(|r| {
            r.work_item_index == work_item_index && r.work_item_id.map_or(true, &mut is_stale)
        })
    }

    /// True if some entry with this ordinal is bound to another id
    pub(crate) fn has_bound_ordinal(&self, work_item_index: i32) -> bool {
        self.work_results
            .iter()
            .any(|r| r.work_item_index == work_item_index && r.work_item_id.is_some())
    }

    // =========================================================================
    // Clearing and destruction
    // =========================================================================

    /// Destroy the artifacts of one item but keep its entry
    pub fn clear_work_item_result_by_id(&mut self, work_item_id: WorkItemId) -> bool {
        let Some(index) = self.find_work_result_by_id(work_item_id) else {
            return false;
        };
        let released = self.work_results[index].clear_and_destroy_result_objects();
        self.released_outputs.extend(released);
        true
    }

    /// Destroy the artifacts of one item and remove its entry
    pub fn destroy_work_item_by_id(&mut self, work_item_id: WorkItemId) -> bool {
        let Some(index) = self.find_work_result_by_id(work_item_id) else {
            return false;
        };
        self.destroy_work_result_at(index);
        true
    }

    pub(crate) fn destroy_work_result_at(&mut self, index: usize) -> WorkResult {
        let mut result = self.work_results.remove(index);
        let released = result.clear_and_destroy_result_objects();
        self.released_outputs.extend(released);
        result
    }

    /// Drop every work result and release the node's output container
    pub fn clear_work_results(&mut self) {
        self.on_dirty_node();
        for result in &mut self.work_results {
            let released = result.clear_and_destroy_result_objects();
            self.released_outputs.extend(released);
        }
        self.work_results.clear();
        if let Some(container) = self.output_container.take() {
            self.released_outputs.push(container);
        }
    }

    /// Release one artifact's outputs and mark it deleted
    pub fn delete_work_result_object_outputs(
        &mut self,
        work_result_index: usize,
        result_object_index: usize,
    ) -> bool {
        let Some(object) = self
            .work_results
            .get_mut(work_result_index)
            .and_then(|r| r.result_objects.get_mut(result_object_index))
        else {
            return false;
        };
        let released = object.destroy_outputs();
        self.released_outputs.extend(released);
        true
    }

    pub fn delete_work_item_outputs(&mut self, work_result_index: usize) -> bool {
        let Some(result) = self.work_results.get_mut(work_result_index) else {
            return false;
        };
        for object in &mut result.result_objects {
            let released = object.destroy_outputs();
            self.released_outputs.extend(released);
        }
        true
    }

    pub fn delete_all_outputs(&mut self) {
        for index in 0..self.work_results.len() {
            self.delete_work_item_outputs(index);
        }
    }

    pub(crate) fn queue_released(&mut self, outputs: impl IntoIterator<Item = OutputId>) {
        self.released_outputs.extend(outputs);
    }

    /// Drain outputs released since the last call
    pub fn take_released_outputs(&mut self) -> Vec<OutputId> {
        std::mem::take(&mut self.released_outputs)
    }

    // =========================================================================
    // Bulk load/unload requests
    // =========================================================================

    /// Queue not-loaded artifacts (and deleted ones if asked) for loading
    pub fn set_not_loaded_to_load(&mut self, also_deleted: bool) {
        for object in self
            .work_results
            .iter_mut()
            .flat_map(|r| r.result_objects.iter_mut())
        {
            let requeue = object.state == WorkResultState::NotLoaded
                || (also_deleted && object.state == WorkResultState::Deleted);
            if requeue {
                object.state = WorkResultState::ToLoad;
            }
        }
    }

    /// Queue every loaded artifact for deletion
    pub fn set_loaded_to_delete(&mut self) {
        for object in self
            .work_results
            .iter_mut()
            .flat_map(|r| r.result_objects.iter_mut())
        {
            if object.state == WorkResultState::Loaded {
                object.state = WorkResultState::ToDelete;
            }
        }
    }

    // =========================================================================
    // Baking
    // =========================================================================

    pub fn baked_outputs_for(
        &self,
        work_result_index: usize,
        result_object_index: usize,
    ) -> Option<&BakedOutput> {
        self.baked_outputs
            .get(&baked_output_key(work_result_index, result_object_index))
    }

    /// Record a bake and flag the artifact as baked since its last load
    pub fn record_baked_outputs(
        &mut self,
        work_result_index: usize,
        result_object_index: usize,
        baked: BakedOutput,
    ) -> bool {
        let Some(object) = self
            .work_results
            .get_mut(work_result_index)
            .and_then(|r| r.result_objects.get_mut(result_object_index))
        else {
            return false;
        };
        object.auto_baked_since_last_load = true;
        self.baked_outputs
            .insert(baked_output_key(work_result_index, result_object_index), baked);
        true
    }

    /// Whether an automatic bake could still pick up work from this node
    pub fn can_still_be_auto_baked(&self) -> bool {
        if !self.auto_load || self.any_failed() {
            return false;
        }
        if !self.all_complete() {
            return true;
        }
        self.work_results
            .iter()
            .flat_map(|r| r.result_objects.iter())
            .any(|o| match o.state {
                WorkResultState::NotLoaded | WorkResultState::ToLoad | WorkResultState::Loading => {
                    true
                }
                WorkResultState::Loaded => !o.auto_baked_since_last_load,
                _ => false,
            })
    }
}

impl WorkItemTally for GraphNode {
    fn counts(&self) -> TallyCounts {
        self.tally.counts()
    }
}
