//! Core identifier and state types
//!
//! These types are shared by the topology mirror, the event state machine
//! and the result store.

use serde::{Deserialize, Serialize};

/// Engine-side handle of a node or network
pub type RemoteHandle = i32;

/// Engine-side identifier of a live execution context
pub type ContextId = i32;

/// Transient engine identifier of a work item (valid within one live session)
pub type WorkItemId = i32;

/// Identifier of a registered asset link
pub type LinkId = String;

/// Identifier of a materialized output owned by the host
pub type OutputId = String;

/// Status of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    None,
    Dirtying,
    Dirtied,
    Cooking,
    CookComplete,
    CookFailed,
}

impl NodeState {
    /// Precedence used when folding child states into a parent node.
    ///
    /// Higher wins: an in-progress child dominates a failed one, which
    /// dominates a completed one.
    pub fn precedence(self) -> u8 {
        match self {
            NodeState::None => 0,
            NodeState::CookComplete => 1,
            NodeState::Dirtied => 2,
            NodeState::CookFailed => 3,
            NodeState::Dirtying => 4,
            NodeState::Cooking => 5,
        }
    }
}

/// Link state between a local asset link and its remote hosting asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Inactive,
    Linking,
    Linked,
    Error,
}

/// Lifecycle of a produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkResultState {
    #[default]
    None,
    NotLoaded,
    ToLoad,
    Loading,
    Loaded,
    ToDelete,
    Deleting,
    Deleted,
}

/// Engine-reported state of a single work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    #[default]
    Undefined,
    Uncooked,
    Waiting,
    Scheduled,
    Cooking,
    CookedSuccess,
    CookedCache,
    CookedFail,
    CookedCancel,
    Dirty,
}

/// Cook state of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookState {
    #[default]
    Ready,
    Cooking,
    Cooked,
    Dirty,
}

/// Kind of a remote node, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Scene-level container
    Object,
    /// Geometry network container
    Geometry,
    /// Task graph node or network
    Task,
    #[default]
    Other,
}
