//! [`PoseNode`] – one entry of the pose forest.

use posetree_geometry::Sim3;
use posetree_types::{CacheStamp, FrameId, NodeId, VertexHandle};

/// Where a node stands in the optimizer merge protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Never admitted to the optimizer's graph (or removed from it before
    /// any result was committed).
    Unregistered,
    /// In the graph, nothing staged or committed yet.
    InGraph,
    /// A staged pose is waiting for the next commit.
    PendingMerge,
    /// At least one optimizer result has been committed.
    Optimized,
}

/// Pose record of a single tracked frame.
///
/// All mutation goes through [`PoseForest`][crate::forest::PoseForest],
/// which owns the epoch the cache stamp is compared against.
#[derive(Debug, Clone)]
pub struct PoseNode {
    pub(crate) frame_id: FrameId,
    pub(crate) absolute_pose: Sim3,
    pub(crate) pending_pose: Sim3,
    pub(crate) parent_relative: Sim3,
    pub(crate) tracking_parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) is_optimized: bool,
    pub(crate) is_registered_with_optimizer: bool,
    pub(crate) is_in_graph: bool,
    pub(crate) has_pending_merge: bool,
    pub(crate) cache_stamp: CacheStamp,
    pub(crate) graph_vertex: Option<VertexHandle>,
}

impl PoseNode {
    pub(crate) fn new(
        frame_id: FrameId,
        tracking_parent: Option<NodeId>,
        parent_relative: Sim3,
        initial_pose: Sim3,
    ) -> Self {
        Self {
            frame_id,
            absolute_pose: initial_pose,
            pending_pose: initial_pose,
            parent_relative,
            tracking_parent,
            children: Vec::new(),
            is_optimized: false,
            is_registered_with_optimizer: false,
            is_in_graph: false,
            has_pending_merge: false,
            cache_stamp: CacheStamp::Unset,
            graph_vertex: None,
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The last stored absolute pose.  May be stale; use
    /// [`PoseForest::resolve`][crate::forest::PoseForest::resolve] to read
    /// an up-to-date value.
    pub fn cached_pose(&self) -> Sim3 {
        self.absolute_pose
    }

    /// The staged optimizer result, if a merge is pending.
    pub fn pending_pose(&self) -> Option<Sim3> {
        self.has_pending_merge.then_some(self.pending_pose)
    }

    /// Raw transform from this node's frame into its parent's frame.
    pub fn parent_relative(&self) -> Sim3 {
        self.parent_relative
    }

    pub fn tracking_parent(&self) -> Option<NodeId> {
        self.tracking_parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_optimized(&self) -> bool {
        self.is_optimized
    }

    pub fn is_registered_with_optimizer(&self) -> bool {
        self.is_registered_with_optimizer
    }

    pub fn is_in_graph(&self) -> bool {
        self.is_in_graph
    }

    pub fn has_pending_merge(&self) -> bool {
        self.has_pending_merge
    }

    pub fn cache_stamp(&self) -> CacheStamp {
        self.cache_stamp
    }

    pub fn graph_vertex(&self) -> Option<VertexHandle> {
        self.graph_vertex
    }

    /// Current [`MergeState`].  A staged pose takes precedence over
    /// `Optimized`, since later optimizer passes re-stage optimized nodes.
    pub fn merge_state(&self) -> MergeState {
        if self.has_pending_merge {
            MergeState::PendingMerge
        } else if self.is_optimized {
            MergeState::Optimized
        } else if self.is_in_graph {
            MergeState::InGraph
        } else {
            MergeState::Unregistered
        }
    }
}
