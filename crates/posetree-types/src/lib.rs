//! `posetree-types` – shared vocabulary for the pose-tree workspace.
//!
//! Identifiers, the cache epoch, the workspace-wide error enum and the
//! notification events published when the forest changes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────────────────────────────────────

/// Index of a pose node inside its owning forest arena.
///
/// Slots are never reused, so a `NodeId` kept after its node was removed
/// resolves to nothing rather than to a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Stable identifier of the camera frame that owns a pose node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Opaque key for the optimizer's internal vertex of a node.
///
/// Minted and owned by the optimizer; the forest only stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexHandle(pub u64);

// ────────────────────────────────────────────────────────────────────────────
// Cache epoch
// ────────────────────────────────────────────────────────────────────────────

/// Value of the forest-wide invalidation counter.
///
/// Only meaningful when compared against a node's [`CacheStamp`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The epoch that follows `self`.
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}

/// Epoch at which a node's cached absolute pose was computed.
///
/// `Unset` orders strictly below every `At(_)`, so a forced invalidation
/// can never compare equal to the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheStamp {
    Unset,
    At(Epoch),
}

impl CacheStamp {
    /// `true` when the stamp matches `current`.
    pub fn is_valid_for(self, current: Epoch) -> bool {
        self == CacheStamp::At(current)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Notification wrapper routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "posetree-runtime::merge"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Things that happen to the forest that consumers may want to react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A batch of optimizer results was committed. Every pose cached
    /// before `epoch` is now stale.
    RoundCommitted {
        round: Uuid,
        epoch: Epoch,
        nodes: Vec<NodeId>,
    },
    /// A node was admitted to the optimizer's graph.
    NodeAdmitted { node: NodeId, vertex: VertexHandle },
    /// A node left the forest.
    NodeRemoved { node: NodeId, frame: FrameId },
    /// Cached poses of a node and its descendants were dropped.
    SubtreeInvalidated { root: NodeId, count: usize },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Recoverable failures across the workspace.
///
/// A corrupted parent chain is not represented here: it aborts pose
/// resolution with a panic.
#[derive(Error, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseTreeError {
    #[error("Unknown pose node: {0}")]
    UnknownNode(NodeId),

    #[error("Pose node {node} still has {children} child node(s)")]
    HasChildren { node: NodeId, children: usize },

    #[error("Event channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
