//! [`SharedPoseForest`] – the forest behind a single coarse lock.
//!
//! Resolution memoises into the nodes it visits, so even "reads" mutate.
//! Every operation therefore takes the one forest-wide mutex; batch commits
//! hold it across staging, applying and the epoch bump so no resolver sees
//! a pose from the new round paired with a stamp from the old one.

use std::sync::Arc;

use parking_lot::Mutex;
use posetree_geometry::Sim3;
use posetree_types::{Epoch, FrameId, NodeId, PoseTreeError, VertexHandle};

use crate::forest::{ForestConfig, PoseForest};
use crate::merge::{MergeSummary, OptimizationRound};

/// Clonable handle to a [`PoseForest`] shared between threads.
///
/// # Example
///
/// ```
/// use posetree_core::{OptimizationRound, SharedPoseForest};
/// use posetree_geometry::{Sim3, Vec3};
/// use posetree_types::{FrameId, VertexHandle};
///
/// let forest = SharedPoseForest::default();
/// let root = forest.insert_root(FrameId(0), Sim3::identity());
/// let step = Sim3::from_translation(Vec3::new(1.0, 0.0, 0.0));
/// let kf = forest.insert_child(FrameId(1), root, step, step).unwrap();
/// forest.register_in_graph(kf, |f| VertexHandle(f.0)).unwrap();
///
/// let mut round = OptimizationRound::new();
/// round.push(kf, Sim3::from_translation(Vec3::new(0.9, 0.0, 0.0)));
/// let summary = forest.apply_round(&round).unwrap();
///
/// assert_eq!(summary.committed, vec![kf]);
/// assert!((forest.resolve(kf).unwrap().translation.x - 0.9).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedPoseForest {
    inner: Arc<Mutex<PoseForest>>,
}

impl SharedPoseForest {
    pub fn new(config: ForestConfig) -> Self {
        Self::from_forest(PoseForest::new(config))
    }

    pub fn from_forest(forest: PoseForest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(forest)),
        }
    }

    /// Run `f` with exclusive access to the forest, for multi-step work
    /// that must see one consistent epoch.
    pub fn with_forest<R>(&self, f: impl FnOnce(&mut PoseForest) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn epoch(&self) -> Epoch {
        self.inner.lock().epoch()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn insert_root(&self, frame_id: FrameId, initial_pose: Sim3) -> NodeId {
        self.inner.lock().insert_root(frame_id, initial_pose)
    }

    pub fn insert_child(
        &self,
        frame_id: FrameId,
        parent: NodeId,
        parent_relative: Sim3,
        initial_pose: Sim3,
    ) -> Result<NodeId, PoseTreeError> {
        self.inner
            .lock()
            .insert_child(frame_id, parent, parent_relative, initial_pose)
    }

    pub fn remove(&self, id: NodeId) -> Result<(), PoseTreeError> {
        self.inner.lock().remove(id).map(drop)
    }

    /// See [`PoseForest::resolve`].
    pub fn resolve(&self, id: NodeId) -> Result<Sim3, PoseTreeError> {
        self.inner.lock().resolve(id)
    }

    /// Resolve `id` and report the epoch the pose belongs to.
    pub fn resolve_with_epoch(&self, id: NodeId) -> Result<(Sim3, Epoch), PoseTreeError> {
        let mut forest = self.inner.lock();
        let pose = forest.resolve(id)?;
        Ok((pose, forest.epoch()))
    }

    pub fn force_invalidate(&self, id: NodeId) -> Result<(), PoseTreeError> {
        self.inner.lock().force_invalidate(id)
    }

    pub fn invalidate_subtree(&self, root: NodeId) -> Result<usize, PoseTreeError> {
        self.inner.lock().invalidate_subtree(root)
    }

    pub fn register_in_graph<F>(&self, id: NodeId, make_vertex: F) -> Result<VertexHandle, PoseTreeError>
    where
        F: FnOnce(FrameId) -> VertexHandle,
    {
        self.inner.lock().register_in_graph(id, make_vertex)
    }

    pub fn remove_from_graph(&self, id: NodeId) -> Result<(), PoseTreeError> {
        self.inner.lock().remove_from_graph(id)
    }

    pub fn stage_optimized_pose(&self, id: NodeId, pose: Sim3) -> bool {
        self.inner.lock().stage_optimized_pose(id, pose)
    }

    pub fn commit_optimized_pose(&self, id: NodeId) -> bool {
        self.inner.lock().commit_optimized_pose(id)
    }

    pub fn commit_pending(&self) -> Option<MergeSummary> {
        self.inner.lock().commit_pending()
    }

    /// Stage and commit `round` under one lock acquisition.
    pub fn apply_round(&self, round: &OptimizationRound) -> Option<MergeSummary> {
        self.inner.lock().apply_round(round)
    }
}
