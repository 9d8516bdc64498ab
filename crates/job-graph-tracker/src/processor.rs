//! Event processing
//!
//! [`EventProcessor::tick`] drains a bounded batch of events from every live
//! execution context and applies each one to the node that owns it.
//!
//! # Key Concepts
//!
//! - **Reverse lookup**: events only carry a node handle. The owning link,
//!   network and node are found by searching every registered link; events
//!   for untracked nodes are dropped with a warning.
//! - **Node status**: after any work item event the node status is derived
//!   from its tally. A cooking node whose items all completed is reconciled
//!   against the engine once before it is marked complete or failed.
//! - **Bounded work**: at most `max_events` events are drained per context
//!   per tick. Whatever remains is picked up on the next tick.

use crate::engine::{EngineClient, GraphEvent, GraphEventKind, Severity};
use crate::events::{emit, EventSink, TrackerEvent};
use crate::node::GraphNode;
use crate::reconcile::WorkItemSync;
use crate::registry::AssetLinkRegistry;
use crate::tally::{TallyBucket, WorkItemTally};
use crate::types::{ContextId, NodeState, WorkItemId, WorkItemState};

/// Drains engine events and drives node state
#[derive(Debug)]
pub struct EventProcessor {
    /// Reused across ticks
    buffer: Vec<GraphEvent>,
    max_events: usize,
}

impl EventProcessor {
    pub fn new(max_events: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_events),
            max_events,
        }
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn set_max_events(&mut self, max_events: usize) {
        self.max_events = max_events;
    }

    /// Run one tick. Returns the number of events processed.
    pub fn tick(
        &mut self,
        engine: &dyn EngineClient,
        registry: &mut AssetLinkRegistry,
        sink: &dyn EventSink,
    ) -> usize {
        let mut processed = 0;

        match engine.execution_contexts() {
            Ok(contexts) => {
                for context in contexts {
                    let remaining =
                        match engine.drain_events(context.id, &mut self.buffer, self.max_events) {
                            Ok(remaining) => remaining,
                            Err(e) => {
                                log::error!(
                                    "Failed to get events of context '{}' ({}): {}",
                                    context.name,
                                    context.id,
                                    e
                                );
                                continue;
                            }
                        };
                    if self.buffer.is_empty() {
                        continue;
                    }

                    for event in &self.buffer {
                        Self::process_event(engine, registry, context.id, event, sink);
                    }
                    processed += self.buffer.len();
                    log::info!(
                        "Tick processed {} events, {} remaining",
                        self.buffer.len(),
                        remaining
                    );
                }
            }
            Err(e) => {
                log::error!("Failed to get execution contexts: {}", e);
            }
        }

        for link in registry.iter_mut() {
            link.update_work_item_tally();
            if link.needs_ui_refresh {
                link.needs_ui_refresh = false;
                emit(
                    sink,
                    TrackerEvent::LinkRefreshed {
                        link_id: link.id.clone(),
                    },
                );
            }
        }

        processed
    }

    /// Apply one event to the node owning it.
    ///
    /// Returns false if no registered link tracks the event's node.
    pub fn process_event(
        engine: &dyn EngineClient,
        registry: &mut AssetLinkRegistry,
        context: ContextId,
        event: &GraphEvent,
        sink: &dyn EventSink,
    ) -> bool {
        let Some(location) = registry.find_node_by_handle(event.node) else {
            log::warn!(
                "No tracked node for {:?} event, work item {:?}, node {}",
                event.kind,
                event.work_item,
                event.node
            );
            return false;
        };
        let Some(link) = registry.link_at_mut(location.link) else {
            return false;
        };
        let link_id = link.id.clone();
        let Some(network) = link.networks.get_mut(location.node.network) else {
            return false;
        };
        let Some(node) = network.nodes.get_mut(location.node.node) else {
            return false;
        };

        log::debug!(
            "Event {:?} on '{}', work item {:?}",
            event.kind,
            node.path,
            event.work_item
        );

        let sync = WorkItemSync::new(engine);
        let mut severity = Severity::Info;
        let mut update_node_state = false;
        let mut cook_complete = false;

        match event.kind {
            GraphEventKind::Null => node.state = NodeState::None,
            GraphEventKind::NodeClear => {
                node.state = NodeState::None;
                node.zero_tally();
                node.on_dirty_node();
            }
            GraphEventKind::WorkItemAdd => {
                if let Some(work_item) = require_work_item(event, node) {
                    sync.create_or_relink_work_item(node, context, work_item);
                    node.on_work_item_created(work_item);
                    update_node_state = true;
                }
            }
            GraphEventKind::WorkItemRemove => {
                if let Some(work_item) = require_work_item(event, node) {
                    node.destroy_work_item_by_id(work_item);
                    node.on_work_item_removed(work_item);
                    update_node_state = true;
                }
            }
            GraphEventKind::WorkItemStateChange { last, current } => {
                if let Some(work_item) = require_work_item(event, node) {
                    update_node_state = true;
                    severity = apply_state_change(&sync, node, context, work_item, last, current);
                }
            }
            GraphEventKind::CookWarning => severity = Severity::Warning,
            GraphEventKind::CookError => severity = Severity::Error,
            GraphEventKind::CookComplete => {
                node.state = NodeState::CookComplete;
                node.on_cook_complete();
                cook_complete = true;
            }
            GraphEventKind::CookStart => node.on_cook_start(),
            GraphEventKind::DirtyStart => node.state = NodeState::Dirtying,
            GraphEventKind::DirtyStop => node.state = NodeState::Dirtied,
            GraphEventKind::DirtyAll
            | GraphEventKind::WorkItemAddDependency
            | GraphEventKind::WorkItemRemoveDependency
            | GraphEventKind::WorkItemAddParent
            | GraphEventKind::WorkItemRemoveParent
            | GraphEventKind::WorkItemAddStaticAncestor
            | GraphEventKind::WorkItemRemoveStaticAncestor
            | GraphEventKind::WorkItemResult
            | GraphEventKind::WorkItemAttributeChange
            | GraphEventKind::UiSelect
            | GraphEventKind::NodeCreate
            | GraphEventKind::NodeRemove
            | GraphEventKind::NodeRename
            | GraphEventKind::NodeConnect
            | GraphEventKind::NodeDisconnect
            | GraphEventKind::NodeProgressUpdate
            | GraphEventKind::Log => {}
        }

        if update_node_state {
            update_state_from_tally(&sync, node);
        }

        if !event.message.is_empty() {
            match severity {
                Severity::Error => log::error!("'{}': {}", node.path, event.message),
                Severity::Warning => log::warn!("'{}': {}", node.path, event.message),
                Severity::Info => log::info!("'{}': {}", node.path, event.message),
            }
        }

        if cook_complete && network.all_nodes_cook_complete() {
            log::info!("Network '{}' finished cooking", network.name);
            emit(
                sink,
                TrackerEvent::NetworkCookComplete {
                    link_id,
                    network: network.name.clone(),
                    any_failed: network.any_failed(),
                },
            );
        }

        true
    }
}

fn require_work_item(event: &GraphEvent, node: &GraphNode) -> Option<WorkItemId> {
    if event.work_item.is_none() {
        log::warn!("{:?} event on '{}' without a work item", event.kind, node.path);
    }
    event.work_item
}

/// Apply a work item state change, returning the message severity
fn apply_state_change(
    sync: &WorkItemSync<'_>,
    node: &mut GraphNode,
    context: ContextId,
    work_item: WorkItemId,
    last: WorkItemState,
    current: WorkItemState,
) -> Severity {
    use WorkItemState::*;

    // Leaving a state needs no bookkeeping: each item sits in one bucket
    match last {
        Waiting | Cooking | Scheduled if current != last => {}
        CookedSuccess | CookedCache if !matches!(current, CookedSuccess | CookedCache) => {}
        CookedFail if current != last => {}
        _ => log::warn!(
            "unhandled state change node='{}' work_item={} last={:?} current={:?}",
            node.path,
            work_item,
            last,
            current
        ),
    }
    if last == current {
        log::warn!(
            "state change without effect node='{}' work_item={} state={:?}",
            node.path,
            work_item,
            current
        );
    }

    match current {
        Waiting => node.on_work_item_waiting(work_item),
        Uncooked | Undefined => {}
        Dirty => {
            node.clear_work_item_result_by_id(work_item);
            node.on_work_item_removed(work_item);
        }
        Scheduled => node.record_work_item(work_item, TallyBucket::Scheduled),
        Cooking => node.record_work_item(work_item, TallyBucket::Cooking),
        CookedSuccess | CookedCache => {
            node.record_work_item(work_item, TallyBucket::Cooked);
            let load = node.auto_load;
            sync.create_or_relink_work_item_result(node, context, work_item, load);
        }
        CookedFail => {
            node.record_work_item(work_item, TallyBucket::Errored);
            return Severity::Error;
        }
        CookedCancel => node.record_work_item(work_item, TallyBucket::Cancelled),
    }
    Severity::Info
}

/// Derive the node status from its tally after a work item event
fn update_state_from_tally(sync: &WorkItemSync<'_>, node: &mut GraphNode) {
    if node.state == NodeState::Cooking {
        if !node.all_complete() {
            return;
        }
        // Catch up on anything missed while cooking before declaring the result
        sync.sync_and_prune_work_items(node);
        if node.all_complete() {
            node.state = if node.any_failed() {
                NodeState::CookFailed
            } else {
                NodeState::CookComplete
            };
        }
    } else if node.any_pending() {
        node.state = NodeState::Cooking;
    }
}
