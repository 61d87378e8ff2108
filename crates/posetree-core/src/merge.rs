//! Optimizer merge protocol.
//!
//! The pose-graph optimizer runs on its own schedule and hands back new
//! absolute poses for the nodes it holds.  Applying them is split in two:
//!
//! 1. **Stage** – [`PoseForest::stage_optimized_pose`] parks the result on
//!    the node.  Nothing a consumer can observe changes.
//! 2. **Commit** – [`PoseForest::commit_optimized_pose`] (one node) or
//!    [`PoseForest::commit_pending`] (every staged node) makes the staged
//!    poses authoritative and advances the forest epoch, which invalidates
//!    every cached pose derived from the old values.
//!
//! A whole optimizer pass travels as an [`OptimizationRound`];
//! [`PoseForest::apply_round`] stages all of it before committing any of it.
//!
//! Nodes outside the optimizer's graph silently ignore staged poses: the
//! optimizer may still hold references to nodes it has dropped.

use posetree_geometry::Sim3;
use posetree_types::{Epoch, FrameId, NodeId, PoseTreeError, VertexHandle};
use tracing::debug;
use uuid::Uuid;

use crate::forest::PoseForest;

// ────────────────────────────────────────────────────────────────────────────
// Round / summary types
// ────────────────────────────────────────────────────────────────────────────

/// The results of one optimizer pass.
#[derive(Debug, Clone)]
pub struct OptimizationRound {
    pub id: Uuid,
    pub poses: Vec<(NodeId, Sim3)>,
}

impl OptimizationRound {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            poses: Vec::new(),
        }
    }

    /// Add the optimized absolute pose for `node`.  A later entry for the
    /// same node overwrites an earlier one when staged.
    pub fn push(&mut self, node: NodeId, pose: Sim3) {
        self.poses.push((node, pose));
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

impl Default for OptimizationRound {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(NodeId, Sim3)> for OptimizationRound {
    fn from_iter<I: IntoIterator<Item = (NodeId, Sim3)>>(iter: I) -> Self {
        Self {
            id: Uuid::new_v4(),
            poses: iter.into_iter().collect(),
        }
    }
}

/// What a batch commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// The round the poses came from, when committed via
    /// [`PoseForest::apply_round`].
    pub round: Option<Uuid>,
    /// Epoch after the commit.
    pub epoch: Epoch,
    /// Nodes whose staged pose was applied, in id order.
    pub committed: Vec<NodeId>,
}

// ────────────────────────────────────────────────────────────────────────────
// Protocol
// ────────────────────────────────────────────────────────────────────────────

impl PoseForest {
    /// Admit `id` to the optimizer's graph.
    ///
    /// `make_vertex` is called once to mint the optimizer-side handle; a node
    /// that already has one (still in the graph, or re-admitted after
    /// [`remove_from_graph`][Self::remove_from_graph]) keeps it.
    pub fn register_in_graph<F>(
        &mut self,
        id: NodeId,
        make_vertex: F,
    ) -> Result<VertexHandle, PoseTreeError>
    where
        F: FnOnce(FrameId) -> VertexHandle,
    {
        let node = self.node_mut(id)?;
        let vertex = match node.graph_vertex {
            Some(vertex) => vertex,
            None => make_vertex(node.frame_id),
        };
        node.graph_vertex = Some(vertex);
        node.is_registered_with_optimizer = true;
        node.is_in_graph = true;
        Ok(vertex)
    }

    /// Take `id` out of the optimizer's working set.  Later stages for it
    /// are ignored; a pose already staged stays committable.
    pub fn remove_from_graph(&mut self, id: NodeId) -> Result<(), PoseTreeError> {
        self.node_mut(id)?.is_in_graph = false;
        Ok(())
    }

    /// Park an optimizer result on `id` until the next commit.
    ///
    /// Returns `false`, changing nothing, when the node is not in the graph
    /// or does not exist.  Staging twice before a commit keeps the latest
    /// pose.
    pub fn stage_optimized_pose(&mut self, id: NodeId, pose: Sim3) -> bool {
        match self.node_mut(id) {
            Ok(node) if node.is_in_graph => {
                node.pending_pose = pose;
                node.has_pending_merge = true;
                true
            }
            _ => {
                debug!(node = %id, "ignoring optimizer pose for node outside the graph");
                false
            }
        }
    }

    /// Apply the pose staged on `id` and advance the epoch.
    ///
    /// Returns `false`, leaving the epoch untouched, when nothing is
    /// staged.
    pub fn commit_optimized_pose(&mut self, id: NodeId) -> bool {
        if !self.apply_staged(id) {
            return false;
        }
        self.epoch = self.epoch.next();
        debug!(node = %id, epoch = %self.epoch, "optimizer pose committed");
        true
    }

    /// Apply every staged pose and advance the epoch once for the batch.
    ///
    /// Returns `None`, leaving the epoch untouched, when nothing is staged.
    pub fn commit_pending(&mut self) -> Option<MergeSummary> {
        let staged: Vec<NodeId> = self
            .iter()
            .filter(|(_, node)| node.has_pending_merge)
            .map(|(id, _)| id)
            .collect();
        if staged.is_empty() {
            return None;
        }
        for id in &staged {
            self.apply_staged(*id);
        }
        self.epoch = self.epoch.next();
        debug!(nodes = staged.len(), epoch = %self.epoch, "optimizer batch committed");
        Some(MergeSummary {
            round: None,
            epoch: self.epoch,
            committed: staged,
        })
    }

    /// Stage every pose of `round`, then commit them as one batch.
    ///
    /// Returns `None` when no pose of the round could be staged and nothing
    /// else was pending.
    pub fn apply_round(&mut self, round: &OptimizationRound) -> Option<MergeSummary> {
        let mut staged = 0;
        for (id, pose) in &round.poses {
            if self.stage_optimized_pose(*id, *pose) {
                staged += 1;
            }
        }
        debug!(round = %round.id, offered = round.len(), staged, "optimizer round staged");
        self.commit_pending().map(|summary| MergeSummary {
            round: Some(round.id),
            ..summary
        })
    }

    fn apply_staged(&mut self, id: NodeId) -> bool {
        match self.node_mut(id) {
            Ok(node) if node.has_pending_merge => {
                node.absolute_pose = node.pending_pose;
                node.is_optimized = true;
                node.has_pending_merge = false;
                true
            }
            _ => false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
