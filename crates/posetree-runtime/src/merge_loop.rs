//! [`MergeCoordinator`] – folds optimizer output into the shared forest.
//!
//! Each round pulled from a [`PoseGraphOptimizer`] is applied with
//! [`SharedPoseForest::apply_round`]: every pose of the round is staged,
//! then all of them are committed and the epoch advances once, all under
//! the forest lock.  The resulting epoch is published on
//! [`Topic::Merges`] so consumers know when re-reading poses is worthwhile.
//!
//! Structural changes that go through the coordinator (graph admission,
//! node removal, subtree invalidation) are announced on
//! [`Topic::Structure`].

use posetree_core::{MergeSummary, OptimizationRound, SharedPoseForest};
use posetree_middleware::{EventBus, Topic};
use posetree_types::{EventPayload, FrameId, NodeId, PoseTreeError, VertexHandle};
use tracing::{debug, info, warn};

use crate::optimizer::PoseGraphOptimizer;

const SOURCE: &str = "posetree-runtime::merge";

/// Counters kept by a [`MergeCoordinator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Rounds that committed at least one pose.
    pub rounds_merged: usize,
    /// Rounds in which no pose could be staged.
    pub rounds_skipped: usize,
    /// Poses made authoritative across all merged rounds.
    pub poses_committed: usize,
}

/// Applies optimizer rounds to a [`SharedPoseForest`] and announces them.
pub struct MergeCoordinator {
    forest: SharedPoseForest,
    bus: EventBus,
    stats: MergeStats,
}

impl MergeCoordinator {
    pub fn new(forest: SharedPoseForest, bus: EventBus) -> Self {
        Self {
            forest,
            bus,
            stats: MergeStats::default(),
        }
    }

    pub fn forest(&self) -> &SharedPoseForest {
        &self.forest
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Apply one round.  Returns `None` when none of its poses belonged to
    /// nodes in the graph; the epoch is then unchanged.
    pub fn merge(&mut self, round: &OptimizationRound) -> Option<MergeSummary> {
        let Some(summary) = self.forest.apply_round(round) else {
            self.stats.rounds_skipped += 1;
            debug!(round = %round.id, offered = round.len(), "optimizer round had nothing to merge");
            return None;
        };

        self.stats.rounds_merged += 1;
        self.stats.poses_committed += summary.committed.len();
        info!(
            round = %round.id,
            epoch = %summary.epoch,
            committed = summary.committed.len(),
            "optimizer round merged"
        );
        self.announce(
            Topic::Merges,
            EventPayload::RoundCommitted {
                round: round.id,
                epoch: summary.epoch,
                nodes: summary.committed.clone(),
            },
        );
        Some(summary)
    }

    /// Merge rounds until `optimizer` shuts down.  Returns the number of
    /// rounds that committed something.
    pub async fn run<O>(&mut self, optimizer: &mut O) -> usize
    where
        O: PoseGraphOptimizer + ?Sized,
    {
        let before = self.stats.rounds_merged;
        while let Some(round) = optimizer.next_round().await {
            self.merge(&round);
        }
        info!(stats = ?self.stats, "optimizer closed; merge loop finished");
        self.stats.rounds_merged - before
    }

    /// Admit `node` to the optimizer's graph and announce it.
    pub fn admit<F>(&self, node: NodeId, make_vertex: F) -> Result<VertexHandle, PoseTreeError>
    where
        F: FnOnce(FrameId) -> VertexHandle,
    {
        let vertex = self.forest.register_in_graph(node, make_vertex)?;
        self.announce(Topic::Structure, EventPayload::NodeAdmitted { node, vertex });
        Ok(vertex)
    }

    /// Remove a leaf node whose frame was dropped and announce it.
    pub fn retire(&self, node: NodeId) -> Result<(), PoseTreeError> {
        let frame = self
            .forest
            .with_forest(|f| f.remove(node))
            .map(|removed| removed.frame_id())?;
        self.announce(Topic::Structure, EventPayload::NodeRemoved { node, frame });
        Ok(())
    }

    /// Drop cached poses of `root` and its descendants and announce it.
    pub fn invalidate_subtree(&self, root: NodeId) -> Result<usize, PoseTreeError> {
        let count = self.forest.invalidate_subtree(root)?;
        self.announce(Topic::Structure, EventPayload::SubtreeInvalidated { root, count });
        Ok(count)
    }

    fn announce(&self, topic: Topic, payload: EventPayload) {
        if self.bus.subscriber_count(topic) == 0 {
            return;
        }
        if let Err(e) = self.bus.emit(topic, SOURCE, payload) {
            warn!(error = %e, ?topic, "failed to publish forest event");
        }
    }
}
