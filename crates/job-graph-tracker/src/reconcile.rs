//! Work result reconciliation
//!
//! Keeps a node's [`WorkResult`] list consistent with the engine:
//!
//! - **Relinking**: transient work item ids change whenever the engine
//!   session restarts. New ids are attached to existing entries by stable
//!   ordinal, or to entries that lost their id, before a new entry is
//!   appended. Loaded artifacts therefore survive a reload.
//! - **Result objects**: artifacts are matched by their position in the
//!   engine's result list, never by name. Unmatched old artifacts are
//!   destroyed.
//! - **Pruning**: once a node looks complete, the engine's live id list is
//!   authoritative. Missing entries are synthesized and stale ones removed.

use std::collections::HashSet;

use crate::constants::results::FILE_TAG_PREFIX;
use crate::engine::EngineClient;
use crate::node::GraphNode;
use crate::types::{ContextId, WorkItemId, WorkResultState};
use crate::work_result::{WorkResult, WorkResultObject};

/// Reconciles node work results against an engine session
pub struct WorkItemSync<'a> {
    engine: &'a dyn EngineClient,
}

impl<'a> WorkItemSync<'a> {
    pub fn new(engine: &'a dyn EngineClient) -> Self {
        Self { engine }
    }

    /// Find or create the work result for `work_item`, returning its index.
    ///
    /// Lookup order: transient id, then an entry with the same stable ordinal
    /// whose id is unset or no longer live, then the first entry without a
    /// transient id. A new entry is appended only if all fail.
    pub fn create_or_relink_work_item(
        &self,
        node: &mut GraphNode,
        context: ContextId,
        work_item: WorkItemId,
    ) -> Option<usize> {
        let info = match self.engine.work_item_info(context, work_item) {
            Ok(info) => info,
            Err(e) => {
                log::error!(
                    "Failed to get work item {} info for '{}': {}",
                    work_item,
                    node.name,
                    e
                );
                return None;
            }
        };

        if let Some(index) = node.find_work_result_by_id(work_item) {
            return Some(index);
        }

        // Only entries whose id the engine dropped may change hands
        let live = if node.has_bound_ordinal(info.index) {
            match self.engine.live_work_item_ids(node.handle) {
                Ok(ids) => Some(ids.into_iter().collect::<HashSet<_>>()),
                Err(e) => {
                    log::warn!(
                        "Failed to list work items of '{}' ({}): {}",
                        node.name,
                        node.handle,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };
        let relinked = node
            .find_relinkable_by_ordinal(info.index, |id| {
                live.as_ref().map_or(false, |live| !live.contains(&id))
            })
            .or_else(|| node.first_unlinked_work_result());

        match relinked {
            Some(index) => {
                let previous = node.work_results[index].work_item_id.replace(work_item);
                node.work_results[index].work_item_index = info.index;
                if let Some(stale) = previous {
                    node.on_work_item_removed(stale);
                }
                log::debug!(
                    "Relinked work item {} (index {}) of '{}' to entry {}",
                    work_item,
                    info.index,
                    node.path,
                    index
                );
                Some(index)
            }
            None => {
                node.work_results.push(WorkResult::new(work_item, info.index));
                Some(node.work_results.len() - 1)
            }
        }
    }

    /// Refresh the result objects of `work_item` from the engine.
    ///
    /// With `load` set, artifacts are queued for loading; otherwise loaded
    /// artifacts are queued for deletion and the rest marked not loaded.
    pub fn create_or_relink_work_item_result(
        &self,
        node: &mut GraphNode,
        context: ContextId,
        work_item: WorkItemId,
        load: bool,
    ) -> bool {
        let info = match self.engine.work_item_info(context, work_item) {
            Ok(info) => info,
            Err(e) => {
                log::error!(
                    "Failed to get work item {} info for '{}': {}",
                    work_item,
                    node.name,
                    e
                );
                return false;
            }
        };

        let index = match node.find_work_result_by_id(work_item) {
            Some(index) => Some(index),
            None => self.create_or_relink_work_item(node, context, work_item),
        };
        let Some(index) = index else {
            log::error!(
                "Failed to get or add a work result for work item {} of '{}'",
                work_item,
                node.name
            );
            return false;
        };

        let descriptors = if info.result_count > 0 {
            match self
                .engine
                .work_item_results(node.handle, work_item, info.result_count)
            {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    log::error!(
                        "Failed to get work item {} result info for '{}': {}",
                        work_item,
                        node.name,
                        e
                    );
                    return false;
                }
            }
        } else {
            Vec::new()
        };

        let parent_name = node.parent_name.clone();
        let mut previous: Vec<Option<WorkResultObject>> =
            std::mem::take(&mut node.work_results[index].result_objects)
                .into_iter()
                .map(Some)
                .collect();

        let mut objects = Vec::with_capacity(descriptors.len());
        for (result_index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.locator.is_empty() || !descriptor.tag.starts_with(FILE_TAG_PREFIX) {
                continue;
            }

            let name = format!("{}_{}_{}_{}", parent_name, info.name, index, result_index);
            let existing = previous.iter().position(|o| {
                o.as_ref()
                    .map_or(false, |o| o.result_info_index == Some(result_index))
            });

            match existing.and_then(|i| previous[i].take()) {
                Some(mut object) => {
                    object.name = name;
                    object.locator = descriptor.locator.clone();
                    object.auto_baked_since_last_load = false;
                    object.state = if object.state == WorkResultState::Loaded && !load {
                        WorkResultState::ToDelete
                    } else if load {
                        WorkResultState::ToLoad
                    } else {
                        WorkResultState::NotLoaded
                    };
                    objects.push(object);
                }
                None => {
                    let state = if load {
                        WorkResultState::ToLoad
                    } else {
                        WorkResultState::NotLoaded
                    };
                    objects.push(WorkResultObject::new(
                        name,
                        descriptor.locator.clone(),
                        result_index,
                        state,
                    ));
                }
            }
        }

        // Artifacts the engine no longer reports
        for mut stale in previous.into_iter().flatten() {
            let released = stale.destroy_outputs();
            node.queue_released(released);
        }

        node.work_results[index].result_objects = objects;
        true
    }

    /// Repair `node` against the engine's live work item list.
    ///
    /// Returns the number of pruned entries, or `None` if the engine could
    /// not be queried (the node is left untouched).
    pub fn sync_and_prune_work_items(&self, node: &mut GraphNode) -> Option<usize> {
        let live_ids = match self.engine.live_work_item_ids(node.handle) {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!(
                    "Failed to list work items of '{}' ({}): {}",
                    node.name,
                    node.handle,
                    e
                );
                return None;
            }
        };
        let context = match self.engine.context_id(node.handle) {
            Ok(context) => context,
            Err(e) => {
                log::warn!(
                    "Failed to get execution context of '{}' ({}): {}",
                    node.name,
                    node.handle,
                    e
                );
                return None;
            }
        };

        let live: HashSet<WorkItemId> = live_ids.iter().copied().collect();
        for &work_item in &live_ids {
            if node.find_work_result_by_id(work_item).is_some() {
                continue;
            }
            // An add event was lost; the item is live on a node that finished
            if self.create_or_relink_work_item_result(node, context, work_item, node.auto_load) {
                node.on_work_item_synced(work_item);
            }
        }

        let mut pruned = 0;
        for index in (0..node.work_results.len()).rev() {
            let keep = node.work_results[index]
                .work_item_id
                .map_or(false, |id| live.contains(&id));
            if keep {
                continue;
            }
            let result = node.destroy_work_result_at(index);
            log::warn!(
                "Pruning work result from '{}' ({}): work item {:?}, index {}, entry {}",
                node.path,
                node.handle,
                result.work_item_id,
                result.work_item_index,
                index
            );
            if let Some(id) = result.work_item_id {
                node.on_work_item_removed(id);
            }
            pruned += 1;
        }
        node.retain_tracked_work_items(|id| live.contains(&id));

        Some(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ResultDescriptor;
    use crate::mock::MockEngine;
    use crate::tally::{TallyBucket, WorkItemTally};

    const CONTEXT: ContextId = 100;
    const NODE: i32 = 3;

    fn file(locator: &str) -> ResultDescriptor {
        ResultDescriptor {
            tag: "file/geo".to_string(),
            locator: locator.to_string(),
        }
    }

    fn setup() -> (MockEngine, GraphNode) {
        let engine = MockEngine::new();
        engine.add_container(1, "hda", None);
        engine.add_network(2, "topnet1", 1, CONTEXT);
        engine.add_task_node(NODE, "node1", 2);
        let mut node = GraphNode::new(NODE, "node1", "node1");
        node.parent_name = "hda_topnet1".to_string();
        (engine, node)
    }

    #[test]
    fn test_create_or_relink_by_id() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 5, 2, vec![]);
        let sync = WorkItemSync::new(&engine);

        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 5), Some(0));
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 5), Some(0));
        assert_eq!(node.work_results.len(), 1);
        assert_eq!(node.work_results[0].work_item_index, 2);
    }

    #[test]
    fn test_relink_by_stable_ordinal() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 5, 2, vec![]);
        let sync = WorkItemSync::new(&engine);
        let first = sync.create_or_relink_work_item(&mut node, CONTEXT, 5).unwrap();

        // Same ordinal, new transient id
        engine.remove_work_item(5);
        engine.add_work_item(NODE, 9, 2, vec![]);
        let second = sync.create_or_relink_work_item(&mut node, CONTEXT, 9).unwrap();

        assert_eq!(first, second);
        assert_eq!(node.work_results.len(), 1);
        assert_eq!(node.work_results[0].work_item_id, Some(9));
    }

    #[test]
    fn test_shared_ordinal_keeps_live_items_apart() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 5, 0, vec![file("/out/5")]);
        engine.add_work_item(NODE, 6, 0, vec![file("/out/6")]);
        let sync = WorkItemSync::new(&engine);

        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 5), Some(0));
        node.on_work_item_created(5);
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 6), Some(1));
        node.on_work_item_created(6);
        node.record_work_item(5, TallyBucket::Cooked);
        node.record_work_item(6, TallyBucket::Cooked);

        assert_eq!(node.work_results.len(), 2);
        assert_eq!(node.counts().total, 2);

        assert_eq!(sync.sync_and_prune_work_items(&mut node), Some(0));
        let before = node.work_results.clone();
        assert_eq!(sync.sync_and_prune_work_items(&mut node), Some(0));
        assert_eq!(node.work_results, before);
        assert!(node.find_work_result_by_id(5).is_some());
        assert!(node.find_work_result_by_id(6).is_some());
        assert_eq!(node.counts().total, 2);
        assert_eq!(node.counts().cooked, 2);
    }

    #[test]
    fn test_shared_ordinal_without_live_list_appends() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 5, 0, vec![]);
        engine.add_work_item(NODE, 6, 0, vec![]);
        let sync = WorkItemSync::new(&engine);
        sync.create_or_relink_work_item(&mut node, CONTEXT, 5).unwrap();

        engine.fail("live_work_item_ids");
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 6), Some(1));
        assert_eq!(node.work_results[0].work_item_id, Some(5));
    }

    #[test]
    fn test_relink_after_reload() {
        let (engine, mut node) = setup();
        node.work_results.push(WorkResult::new(1, 0));
        node.work_results.push(WorkResult::new(2, 1));
        for result in &mut node.work_results {
            result.work_item_id = None;
        }

        // Ordinal 1 comes back first with a fresh id
        engine.add_work_item(NODE, 40, 1, vec![]);
        engine.add_work_item(NODE, 41, 7, vec![]);
        let sync = WorkItemSync::new(&engine);
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 40), Some(1));
        // Unknown ordinal falls back to the first entry without an id
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 41), Some(0));
        assert_eq!(node.work_results.len(), 2);
        assert_eq!(node.work_results[0].work_item_index, 7);
    }

    #[test]
    fn test_create_or_relink_fails_without_info() {
        let (engine, mut node) = setup();
        let sync = WorkItemSync::new(&engine);
        assert_eq!(sync.create_or_relink_work_item(&mut node, CONTEXT, 77), None);
        assert!(node.work_results.is_empty());
    }

    #[test]
    fn test_result_objects_created_and_filtered() {
        let (engine, mut node) = setup();
        engine.add_work_item(
            NODE,
            7,
            0,
            vec![
                file("/out/a.bgeo"),
                ResultDescriptor {
                    tag: "log".to_string(),
                    locator: "/out/log.txt".to_string(),
                },
                file(""),
                file("/out/b.bgeo"),
            ],
        );
        let sync = WorkItemSync::new(&engine);
        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, true));

        let objects = &node.work_results[0].result_objects;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].result_info_index, Some(0));
        assert_eq!(objects[1].result_info_index, Some(3));
        assert_eq!(objects[0].name, "hda_topnet1_item0_0_0");
        assert!(objects.iter().all(|o| o.state == WorkResultState::ToLoad));
    }

    #[test]
    fn test_result_object_garbage_collection() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 7, 0, vec![file("/out/a"), file("/out/b")]);
        let sync = WorkItemSync::new(&engine);
        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, true));
        {
            let objects = &mut node.work_results[0].result_objects;
            objects[0].state = WorkResultState::Loaded;
            objects[0].auto_baked_since_last_load = true;
            objects[1].state = WorkResultState::Loaded;
            objects[1].outputs.push("mesh_b".to_string());
        }

        engine.set_results(7, vec![file("/out/a_v2")]);
        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, true));

        let objects = &node.work_results[0].result_objects;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].result_info_index, Some(0));
        assert_eq!(objects[0].locator, "/out/a_v2");
        assert_eq!(objects[0].state, WorkResultState::ToLoad);
        assert!(!objects[0].auto_baked_since_last_load);
        assert_eq!(node.take_released_outputs(), vec!["mesh_b".to_string()]);
    }

    #[test]
    fn test_loaded_object_queued_for_delete_without_load() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 7, 0, vec![file("/out/a"), file("/out/b")]);
        let sync = WorkItemSync::new(&engine);
        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, false));
        assert_eq!(
            node.work_results[0].result_objects[1].state,
            WorkResultState::NotLoaded
        );
        node.work_results[0].result_objects[0].state = WorkResultState::Loaded;

        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, false));
        let objects = &node.work_results[0].result_objects;
        assert_eq!(objects[0].state, WorkResultState::ToDelete);
        assert_eq!(objects[1].state, WorkResultState::NotLoaded);
    }

    #[test]
    fn test_result_descriptor_failure_leaves_objects() {
        let (engine, mut node) = setup();
        engine.add_work_item(NODE, 7, 0, vec![file("/out/a")]);
        let sync = WorkItemSync::new(&engine);
        assert!(sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, true));

        engine.fail("work_item_results");
        assert!(!sync.create_or_relink_work_item_result(&mut node, CONTEXT, 7, true));
        assert_eq!(node.work_results[0].result_objects.len(), 1);
    }

    #[test]
    fn test_sync_and_prune_is_idempotent() {
        let (engine, mut node) = setup();
        node.auto_load = true;
        engine.add_work_item(NODE, 1, 0, vec![file("/out/1")]);
        engine.add_work_item(NODE, 2, 1, vec![file("/out/2")]);

        // Entry 1 tracked locally, entry 2 lost its add event, 99 is stale
        let sync = WorkItemSync::new(&engine);
        sync.create_or_relink_work_item(&mut node, CONTEXT, 1).unwrap();
        node.record_work_item(1, TallyBucket::Cooked);
        node.work_results.push(WorkResult::new(99, 5));
        node.record_work_item(99, TallyBucket::Cooked);

        let pruned = sync.sync_and_prune_work_items(&mut node);
        assert_eq!(pruned, Some(1));
        assert_eq!(node.work_results.len(), 2);
        assert!(node.find_work_result_by_id(2).is_some());
        assert!(node.find_work_result_by_id(99).is_none());
        assert_eq!(
            node.work_results[1].result_objects[0].state,
            WorkResultState::ToLoad
        );
        let counts = node.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.cooked, 2);

        let before = node.work_results.clone();
        assert_eq!(sync.sync_and_prune_work_items(&mut node), Some(0));
        assert_eq!(node.work_results, before);
    }

    #[test]
    fn test_sync_prunes_unlinked_entries() {
        let (engine, mut node) = setup();
        let mut orphan = WorkResult::new(3, 0);
        orphan.work_item_id = None;
        node.work_results.push(orphan);

        let sync = WorkItemSync::new(&engine);
        assert_eq!(sync.sync_and_prune_work_items(&mut node), Some(1));
        assert!(node.work_results.is_empty());
    }

    #[test]
    fn test_sync_failure_leaves_node_untouched() {
        let (engine, mut node) = setup();
        node.work_results.push(WorkResult::new(99, 0));
        engine.fail("live_work_item_ids");

        let sync = WorkItemSync::new(&engine);
        assert_eq!(sync.sync_and_prune_work_items(&mut node), None);
        assert_eq!(node.work_results.len(), 1);
    }
}
