//! Work results and their produced artifacts
//!
//! A [`WorkResult`] is the local record of one work item of a graph node.
//! It owns the [`WorkResultObject`]s (one per produced file) that move
//! through the load/unload lifecycle driven by the materializer.

use serde::{Deserialize, Serialize};

use crate::types::{OutputId, WorkItemId, WorkResultState};

/// One produced artifact of a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResultObject {
    /// Display name, regenerated on every relink
    pub name: String,
    /// Locator of the artifact (usually a file path)
    pub locator: String,
    /// Lifecycle state
    pub state: WorkResultState,
    /// Position in the engine's result list for the owning item
    pub result_info_index: Option<usize>,
    /// Set once the loaded outputs were baked, cleared on every (re)load
    pub auto_baked_since_last_load: bool,
    /// Outputs the materializer created for this artifact
    pub outputs: Vec<OutputId>,
}

impl Default for WorkResultObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            locator: String::new(),
            state: WorkResultState::None,
            result_info_index: None,
            auto_baked_since_last_load: false,
            outputs: Vec::new(),
        }
    }
}

impl WorkResultObject {
    pub fn new(
        name: impl Into<String>,
        locator: impl Into<String>,
        result_info_index: usize,
        state: WorkResultState,
    ) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            state,
            result_info_index: Some(result_info_index),
            ..Default::default()
        }
    }

    /// Release the outputs of this artifact and mark it deleted.
    ///
    /// Returns the released output ids so the caller can queue them for the host.
    pub fn destroy_outputs(&mut self) -> Vec<OutputId> {
        self.state = WorkResultState::Deleted;
        std::mem::take(&mut self.outputs)
    }
}

/// Local record of one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResult {
    /// Stable ordinal of the item within its node, survives session reloads
    pub work_item_index: i32,
    /// Transient engine id; never persisted, so it reads back as `None`
    #[serde(skip)]
    pub work_item_id: Option<WorkItemId>,
    /// Produced artifacts, in engine result order
    pub result_objects: Vec<WorkResultObject>,
}

impl WorkResult {
    pub fn new(work_item_id: WorkItemId, work_item_index: i32) -> Self {
        Self {
            work_item_index,
            work_item_id: Some(work_item_id),
            result_objects: Vec::new(),
        }
    }

    /// Whether this entry is bound to a live engine item
    pub fn is_linked(&self) -> bool {
        self.work_item_id.is_some()
    }

    pub fn find_object_by_result_info_index(&self, result_info_index: usize) -> Option<usize> {
        self.result_objects
            .iter()
            .position(|o| o.result_info_index == Some(result_info_index))
    }

    /// Destroy every artifact and empty the list.
    pub fn clear_and_destroy_result_objects(&mut self) -> Vec<OutputId> {
        let mut released = Vec::new();
        for object in &mut self.result_objects {
            released.extend(object.destroy_outputs());
        }
        self.result_objects.clear();
        released
    }
}

/// Record of outputs baked from one loaded artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BakedOutput {
    /// Host object paths produced by the bake
    pub baked_object_paths: Vec<String>,
}

/// Key of the baked output map for a (work result, result object) pair
pub fn baked_output_key(work_result_index: usize, result_object_index: usize) -> String {
    format!("{}_{}", work_result_index, result_object_index)
}
