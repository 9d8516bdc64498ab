//! Graph tracker
//!
//! [`GraphTracker`] is the entry point of the crate. It owns the engine
//! client, the registry of asset links and the event processor, and exposes
//! the operations a host drives:
//!
//! - link lifecycle ([`GraphTracker::register_link`],
//!   [`GraphTracker::initialize_link`], [`GraphTracker::update_link`], ...)
//! - the periodic tick ([`GraphTracker::update`])
//! - cooperative cook control ([`GraphTracker::cook_output`],
//!   [`GraphTracker::dirty_node`], ...)
//! - UI selection and filters
//!
//! Engine failures never propagate out of these operations: they are logged
//! and the tracker state is left as before. Errors returned here are lookup
//! failures (unknown link, network or node) and missing topology.

use crate::config::{LinkFilters, TrackerConfig};
use crate::engine::EngineClient;
use crate::error::TrackerError;
use crate::events::{emit, EventSink, NullEventSink, TrackerEvent};
use crate::link::AssetLink;
use crate::materializer::{process_work_item_results, Materializer};
use crate::network::GraphNetwork;
use crate::node::GraphNode;
use crate::processor::EventProcessor;
use crate::registry::AssetLinkRegistry;
use crate::tally::WorkItemTally;
use crate::topology::TopologyBuilder;
use crate::types::{CookState, LinkId, LinkState, NodeState, OutputId, RemoteHandle};
use crate::Result;

/// Tracks the job graphs of remote assets through one engine session
pub struct GraphTracker<E: EngineClient> {
    engine: E,
    config: TrackerConfig,
    registry: AssetLinkRegistry,
    processor: EventProcessor,
    sink: Box<dyn EventSink>,
    materializer: Option<Box<dyn Materializer>>,
}

impl<E: EngineClient> GraphTracker<E> {
    pub fn new(engine: E, config: TrackerConfig) -> Self {
        let processor = EventProcessor::new(config.max_events_per_context);
        Self {
            engine,
            config,
            registry: AssetLinkRegistry::new(),
            processor,
            sink: Box::new(NullEventSink),
            materializer: None,
        }
    }

    /// Send notifications to `sink` instead of discarding them
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Materialize artifacts synchronously on every tick
    pub fn with_materializer(mut self, materializer: Box<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn set_max_events_per_context(&mut self, max_events: usize) {
        self.config.max_events_per_context = max_events;
        self.processor.set_max_events(max_events);
    }

    pub fn registry(&self) -> &AssetLinkRegistry {
        &self.registry
    }

    pub fn link(&self, link_id: &str) -> Option<&AssetLink> {
        self.registry.get(link_id)
    }

    pub fn link_mut(&mut self, link_id: &str) -> Option<&mut AssetLink> {
        self.registry.get_mut(link_id)
    }

    /// Node enclosing the given node, if it is nested
    pub fn parent_node(
        &self,
        link_id: &str,
        network: usize,
        node: usize,
    ) -> Result<Option<&GraphNode>> {
        let network = require_network(&self.registry, link_id, network)?;
        if node >= network.nodes.len() {
            return Err(TrackerError::NodeNotFound(format!("{}/{}", network.name, node)));
        }
        Ok(network
            .parent_node_index(node)
            .and_then(|parent| network.nodes.get(parent)))
    }

    // =========================================================================
    // Link lifecycle
    // =========================================================================

    /// Start tracking an asset. The link stays inactive until initialised.
    pub fn register_link(&mut self, asset_handle: RemoteHandle, asset_name: &str) -> LinkId {
        let link = AssetLink::new(asset_handle, asset_name)
            .with_filters(self.config.default_filters.clone())
            .with_auto_cook(self.config.auto_cook);
        let id = self.registry.insert(link);
        log::info!("Registered asset link '{}' for '{}'", id, asset_name);
        id
    }

    /// Stop tracking an asset, returning every output it still held
    pub fn remove_link(&mut self, link_id: &str) -> Result<Vec<OutputId>> {
        let mut link = self
            .registry
            .remove(link_id)
            .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?;
        link.clear_all();
        log::info!("Removed asset link '{}'", link_id);
        Ok(link.take_released_outputs())
    }

    /// Discover the topology of a freshly registered link.
    ///
    /// Fails with [`TrackerError::TopologyNotFound`] (and leaves the link in
    /// `Error`) if the asset holds no network with task nodes.
    pub fn initialize_link(&mut self, link_id: &str) -> Result<()> {
        let zero_tallies = self.config.zero_tallies_on_link;
        let builder = TopologyBuilder::new(&self.engine);
        let link = self
            .registry
            .get_mut(link_id)
            .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?;

        if builder.rebuild(link, zero_tallies) {
            link.selected_network_index = 0;
            set_link_state(link, LinkState::Linked, self.sink.as_ref());
            Ok(())
        } else {
            log::warn!("Asset '{}' holds no graph network with nodes", link.asset_name);
            set_link_state(link, LinkState::Error, self.sink.as_ref());
            Err(TrackerError::TopologyNotFound(link.asset_handle))
        }
    }

    /// Rediscover the topology after the asset was re-instantiated
    pub fn update_link(&mut self, link_id: &str) -> Result<()> {
        let builder = TopologyBuilder::new(&self.engine);
        let link = self
            .registry
            .get_mut(link_id)
            .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?;

        if link.state == LinkState::Linking {
            return Ok(());
        }

        if builder.rebuild(link, false) {
            if link.state != LinkState::Linked {
                set_link_state(link, LinkState::Linked, self.sink.as_ref());
            }
            Ok(())
        } else {
            log::error!("Failed to populate asset link '{}'", link.asset_name);
            set_link_state(link, LinkState::Error, self.sink.as_ref());
            Err(TrackerError::TopologyNotFound(link.asset_handle))
        }
    }

    /// React to the hosting asset finishing a cook
    pub fn notify_asset_cooked(&mut self, link_id: &str, success: bool) -> Result<()> {
        let link = self
            .registry
            .get_mut(link_id)
            .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?;

        if !success {
            set_link_state(link, LinkState::Error, self.sink.as_ref());
            return Ok(());
        }

        if link.state == LinkState::Linked {
            if link.auto_cook {
                let network = link.selected_network_index;
                self.cook_output(link_id, network)?;
            }
            Ok(())
        } else {
            self.update_link(link_id)
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Run one tick: drain engine events, then advance artifact loading.
    ///
    /// Returns the number of engine events processed.
    pub fn update(&mut self) -> usize {
        if self.registry.is_empty() {
            return 0;
        }

        let processed = self
            .processor
            .tick(&self.engine, &mut self.registry, self.sink.as_ref());

        let materializer = self
            .materializer
            .as_mut()
            .map(|m| m.as_mut() as &mut dyn Materializer);
        process_work_item_results(&mut self.registry, materializer, self.sink.as_ref());

        processed
    }

    // =========================================================================
    // Cook control
    // =========================================================================

    /// Dirty a node on the engine and clear its results locally
    pub fn dirty_node(&mut self, link_id: &str, network: usize, node: usize) -> Result<()> {
        let network = require_network_mut(&mut self.registry, link_id, network)?;
        let node = network
            .nodes
            .get_mut(node)
            .ok_or_else(|| TrackerError::NodeNotFound(format!("{}/{}", network.name, node)))?;

        if let Err(e) = self.engine.dirty_node(node.handle, true) {
            log::error!("Failed to dirty node '{}': {}", node.name, e);
        }
        node.clear_work_results();
        Ok(())
    }

    /// Dirty a whole network. Local results are kept if the engine refuses.
    pub fn dirty_all(&mut self, link_id: &str, network: usize) -> Result<()> {
        let network = require_network_mut(&mut self.registry, link_id, network)?;

        if let Err(e) = self.engine.dirty_node(network.handle, true) {
            log::error!("Failed to dirty all nodes of '{}': {}", network.name, e);
            return Ok(());
        }
        network.clear_work_results();
        Ok(())
    }

    /// Cook a single node. Returns false if the request was refused or failed.
    pub fn cook_node(&mut self, link_id: &str, network: usize, node: usize) -> Result<bool> {
        let network = require_network(&self.registry, link_id, network)?;
        let node = network
            .nodes
            .get(node)
            .ok_or_else(|| TrackerError::NodeNotFound(format!("{}/{}", network.name, node)))?;

        if node.state == NodeState::Cooking || node.any_pending() {
            log::warn!(
                "Node '{}' is already cooking, ignoring cook request",
                node.path
            );
            return Ok(false);
        }

        match self.engine.cook_node(node.handle) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::error!("Failed to cook node '{}': {}", node.name, e);
                Ok(false)
            }
        }
    }

    /// Cook every output of a network. Returns false if refused or failed.
    pub fn cook_output(&mut self, link_id: &str, network: usize) -> Result<bool> {
        let network = require_network(&self.registry, link_id, network)?;

        let mut already_cooking = network.any_pending();
        if !already_cooking {
            let context = match self.engine.context_id(network.handle) {
                Ok(context) => context,
                Err(e) => {
                    log::error!("Failed to get context of network '{}': {}", network.name, e);
                    return Ok(false);
                }
            };
            already_cooking = match self.engine.cook_state(context) {
                Ok(state) => state == CookState::Cooking,
                Err(e) => {
                    log::error!("Failed to get cook state of network '{}': {}", network.name, e);
                    return Ok(false);
                }
            };
        }

        if already_cooking {
            log::warn!(
                "Network '{}' is already cooking, ignoring cook output request",
                network.name
            );
            return Ok(false);
        }

        match self.engine.cook_outputs(network.handle) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::error!("Failed to cook outputs of '{}': {}", network.name, e);
                Ok(false)
            }
        }
    }

    pub fn pause_cook(&mut self, link_id: &str, network: usize) -> Result<()> {
        let network = require_network(&self.registry, link_id, network)?;
        let result = self
            .engine
            .context_id(network.handle)
            .and_then(|context| self.engine.pause_cook(context));
        if let Err(e) = result {
            log::error!("Failed to pause cook of '{}': {}", network.name, e);
        }
        Ok(())
    }

    pub fn cancel_cook(&mut self, link_id: &str, network: usize) -> Result<()> {
        let network = require_network(&self.registry, link_id, network)?;
        let result = self
            .engine
            .context_id(network.handle)
            .and_then(|context| self.engine.cancel_cook(context));
        if let Err(e) = result {
            log::error!("Failed to cancel cook of '{}': {}", network.name, e);
        }
        Ok(())
    }

    // =========================================================================
    // UI surface
    // =========================================================================

    pub fn select_network(&mut self, link_id: &str, index: usize) -> Result<bool> {
        Ok(self.require_link_mut(link_id)?.select_network(index))
    }

    /// Select a node; hidden or out-of-range nodes are refused
    pub fn select_node(&mut self, link_id: &str, network: usize, index: usize) -> Result<bool> {
        let link = self.require_link_mut(link_id)?;
        let Some(target) = link.networks.get_mut(network) else {
            return Err(TrackerError::NetworkNotFound(format!("{}/{}", link_id, network)));
        };
        let selected = target.select_node(index);
        if selected {
            link.needs_ui_refresh = true;
        }
        Ok(selected)
    }

    /// Replace the filters of a link and re-evaluate its nodes in place
    pub fn set_filters(&mut self, link_id: &str, filters: LinkFilters) -> Result<()> {
        self.require_link_mut(link_id)?.set_filters(filters);
        Ok(())
    }

    // =========================================================================
    // Materializer pull API
    // =========================================================================

    /// Record an artifact loaded by the host and notify listeners
    pub fn report_loaded(
        &mut self,
        link_id: &str,
        node_uid: &str,
        work_result_index: usize,
        result_info_index: usize,
        outputs: Vec<OutputId>,
    ) -> Result<()> {
        let link = self.require_link_mut(link_id)?;
        let node_path =
            link.report_loaded(node_uid, work_result_index, result_info_index, outputs)?;
        emit(
            self.sink.as_ref(),
            TrackerEvent::WorkResultObjectLoaded {
                link_id: link_id.to_string(),
                node_path,
                work_result_index,
                result_info_index: Some(result_info_index),
            },
        );
        Ok(())
    }

    /// Host lost the outputs of a loaded artifact; queue it for deletion
    pub fn report_outputs_lost(
        &mut self,
        link_id: &str,
        node_uid: &str,
        work_result_index: usize,
        result_info_index: usize,
    ) -> Result<()> {
        self.require_link_mut(link_id)?
            .report_outputs_lost(node_uid, work_result_index, result_info_index)
    }

    /// Drain outputs released by clears, prunes and rebuilds of a link
    pub fn take_released_outputs(&mut self, link_id: &str) -> Result<Vec<OutputId>> {
        Ok(self.require_link_mut(link_id)?.take_released_outputs())
    }

    fn require_link_mut(&mut self, link_id: &str) -> Result<&mut AssetLink> {
        self.registry
            .get_mut(link_id)
            .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))
    }
}

fn set_link_state(link: &mut AssetLink, state: LinkState, sink: &dyn EventSink) {
    if link.state != state {
        log::info!("Asset link '{}' is now {:?}", link.asset_name, state);
    }
    link.state = state;
    emit(
        sink,
        TrackerEvent::LinkStateChanged {
            link_id: link.id.clone(),
            state,
        },
    );
}

fn require_network<'r>(
    registry: &'r AssetLinkRegistry,
    link_id: &str,
    network: usize,
) -> Result<&'r GraphNetwork> {
    registry
        .get(link_id)
        .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?
        .networks
        .get(network)
        .ok_or_else(|| TrackerError::NetworkNotFound(format!("{}/{}", link_id, network)))
}

fn require_network_mut<'r>(
    registry: &'r mut AssetLinkRegistry,
    link_id: &str,
    network: usize,
) -> Result<&'r mut GraphNetwork> {
    registry
        .get_mut(link_id)
        .ok_or_else(|| TrackerError::LinkNotFound(link_id.to_string()))?
        .networks
        .get_mut(network)
        .ok_or_else(|| TrackerError::NetworkNotFound(format!("{}/{}", link_id, network)))
}
