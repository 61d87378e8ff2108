//! [`PoseForest`] – arena of pose nodes with lazy absolute-pose resolution.
//!
//! Nodes live in a `Vec` indexed by [`NodeId`]; a child refers to its
//! tracking parent by index.  Removing a node is refused while children
//! still point at it, so parent links never dangle.
//!
//! # Cache coherence
//!
//! The forest owns one [`Epoch`] counter.  Each node stamps the epoch at
//! which it last computed its absolute pose; a stamp equal to the current
//! epoch is a cache hit.  Advancing the epoch (done once per optimizer
//! commit, see [`merge`][crate::merge]) makes every stamp stale without
//! touching a single node.
//!
//! # Example
//!
//! ```rust
//! use posetree_core::PoseForest;
//! use posetree_geometry::{Sim3, Vec3};
//! use posetree_types::FrameId;
//!
//! let mut forest = PoseForest::default();
//! let root = forest.insert_root(FrameId(0), Sim3::identity());
//! let step = Sim3::from_translation(Vec3::new(1.0, 0.0, 0.0));
//! let a = forest.insert_child(FrameId(1), root, step, step).unwrap();
//! let b = forest.insert_child(FrameId(2), a, step, step).unwrap();
//!
//! let pose = forest.resolve(b).unwrap();
//! assert!((pose.translation.x - 2.0).abs() < 1e-12);
//! ```

use posetree_geometry::Sim3;
use posetree_types::{CacheStamp, Epoch, FrameId, NodeId, PoseTreeError};
use tracing::{debug, error, warn};

use crate::node::PoseNode;

/// Parent chains deeper than this abort resolution.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 5000;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for a [`PoseForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestConfig {
    /// Maximum parent-walk depth of a single resolution.  Reaching it means
    /// the parent links are cyclic or corrupted and resolution panics.
    pub max_recursion_depth: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

/// Where an upward walk stopped.
enum ChainBase {
    /// A node whose pose can be used as is.
    Cached(Sim3),
    /// An unresolved root.
    Root(NodeId),
}

// ────────────────────────────────────────────────────────────────────────────
// PoseForest
// ────────────────────────────────────────────────────────────────────────────

/// Owner of all pose nodes and of the epoch their caches are checked
/// against.
///
/// Not synchronised; wrap it in a
/// [`SharedPoseForest`][crate::shared::SharedPoseForest] to share it
/// between tracking and optimizer threads.
#[derive(Debug, Default)]
pub struct PoseForest {
    config: ForestConfig,
    pub(crate) nodes: Vec<Option<PoseNode>>,
    pub(crate) epoch: Epoch,
    live: usize,
    traversals: u64,
}

impl PoseForest {
    /// Create an empty forest.
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> ForestConfig {
        self.config
    }

    /// The current cache epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of parent-chain steps taken by all resolutions so far.
    /// A cache hit adds nothing.
    pub fn traversals(&self) -> u64 {
        self.traversals
    }

    pub fn node(&self, id: NodeId) -> Option<&PoseNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Children of `id`, in insertion order.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], PoseTreeError> {
        self.node(id)
            .map(PoseNode::children)
            .ok_or(PoseTreeError::UnknownNode(id))
    }

    /// Iterate over all live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PoseNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeId(i), n)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut PoseNode, PoseTreeError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(PoseTreeError::UnknownNode(id))
    }

    // ── Construction / destruction ──────────────────────────────────────────

    /// Add a parentless node; it defines the world origin and always
    /// resolves to identity until an optimizer result is committed for it.
    pub fn insert_root(&mut self, frame_id: FrameId, initial_pose: Sim3) -> NodeId {
        self.push(PoseNode::new(frame_id, None, Sim3::identity(), initial_pose))
    }

    /// Add a node linked to an existing `parent` by the raw tracking
    /// transform `parent_relative` (this frame into the parent's frame).
    ///
    /// `initial_pose` is kept as the seed cache value; the first
    /// resolution recomputes it from the chain.
    pub fn insert_child(
        &mut self,
        frame_id: FrameId,
        parent: NodeId,
        parent_relative: Sim3,
        initial_pose: Sim3,
    ) -> Result<NodeId, PoseTreeError> {
        if !self.contains(parent) {
            warn!(%parent, %frame_id, "refusing to attach pose node to unknown parent");
            return Err(PoseTreeError::UnknownNode(parent));
        }
        let id = self.push(PoseNode::new(
            frame_id,
            Some(parent),
            parent_relative,
            initial_pose,
        ));
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Drop a node whose frame is gone.
    ///
    /// Refused with [`PoseTreeError::HasChildren`] while any child still
    /// refers to it.  The slot is not reused.
    pub fn remove(&mut self, id: NodeId) -> Result<PoseNode, PoseTreeError> {
        let node = self.node(id).ok_or(PoseTreeError::UnknownNode(id))?;
        if !node.children.is_empty() {
            warn!(node = %id, children = node.children.len(), "refusing to remove pose node with live children");
            return Err(PoseTreeError::HasChildren {
                node: id,
                children: node.children.len(),
            });
        }
        if let Some(parent) = node.tracking_parent {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        let removed = self.nodes[id.0].take().ok_or(PoseTreeError::UnknownNode(id))?;
        self.live -= 1;
        debug!(node = %id, frame = %removed.frame_id, "pose node removed");
        Ok(removed)
    }

    fn push(&mut self, node: PoseNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        self.live += 1;
        id
    }

    // ── Resolution ──────────────────────────────────────────────────────────

    /// Absolute (camera-to-world) pose of `id`.
    ///
    /// Optimized nodes return their committed pose.  Otherwise the cached
    /// pose is returned when stamped with the current epoch, and recomputed
    /// as `parent ∘ parent_relative` when not.
    ///
    /// # Panics
    ///
    /// When the parent chain is deeper than
    /// [`ForestConfig::max_recursion_depth`]; the forest is corrupted and
    /// no pose derived from it can be trusted.
    pub fn resolve(&mut self, id: NodeId) -> Result<Sim3, PoseTreeError> {
        let epoch = self.epoch;
        let (base, stale) = self.stale_chain(id)?;

        let mut pose = match base {
            ChainBase::Cached(pose) => pose,
            ChainBase::Root(root) => {
                let node = self.node_mut(root)?;
                node.absolute_pose = Sim3::identity();
                node.cache_stamp = CacheStamp::At(epoch);
                node.absolute_pose
            }
        };

        self.traversals += stale.len() as u64;
        for &link in stale.iter().rev() {
            let node = self.node_mut(link)?;
            pose = pose.compose(node.parent_relative);
            node.absolute_pose = pose;
            node.cache_stamp = CacheStamp::At(epoch);
        }
        Ok(pose)
    }

    /// Walk up from `id` without touching any node.  Returns where the walk
    /// stopped and the non-root nodes that need recomputing, leaf first.
    ///
    /// The depth bound is enforced here, before anything is written, so an
    /// aborted resolution leaves every cache as it was.
    fn stale_chain(&self, id: NodeId) -> Result<(ChainBase, Vec<NodeId>), PoseTreeError> {
        let max_depth = self.config.max_recursion_depth;
        let mut stale = Vec::new();
        let mut cursor = id;
        loop {
            let node = self.node(cursor).ok_or(PoseTreeError::UnknownNode(cursor))?;
            let depth = stale.len();
            if depth >= max_depth {
                error!(node = %id, at = %cursor, depth, "pose chain exceeds depth bound");
                panic!(
                    "pose chain exceeds {max_depth} links at {cursor} ({}) resolving {id}; parent links are cyclic or corrupted",
                    node.frame_id
                );
            }

            if node.is_optimized || node.cache_stamp.is_valid_for(self.epoch) {
                return Ok((ChainBase::Cached(node.absolute_pose), stale));
            }
            match node.tracking_parent {
                None => return Ok((ChainBase::Root(cursor), stale)),
                Some(parent) => {
                    stale.push(cursor);
                    cursor = parent;
                }
            }
        }
    }

    // ── Invalidation ────────────────────────────────────────────────────────

    /// Force the next resolution of `id` to recompute, whatever the epoch.
    pub fn force_invalidate(&mut self, id: NodeId) -> Result<(), PoseTreeError> {
        self.node_mut(id)?.cache_stamp = CacheStamp::Unset;
        Ok(())
    }

    /// [`force_invalidate`][Self::force_invalidate] `root` and all of its
    /// descendants.  Returns the number of nodes touched.
    ///
    /// For collaborators that correct a node's links outside the merge
    /// path: a descendant whose stamp is still current would otherwise keep
    /// serving a pose derived from the old chain.
    pub fn invalidate_subtree(&mut self, root: NodeId) -> Result<usize, PoseTreeError> {
        let mut stack = vec![root];
        let mut count = 0;
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id)?;
            node.cache_stamp = CacheStamp::Unset;
            stack.extend_from_slice(&node.children);
            count += 1;
        }
        debug!(%root, count, "pose subtree invalidated");
        Ok(count)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use posetree_geometry::{Quaternion, Vec3};

    const TOL: f64 = 1e-9;

    fn step(x: f64, y: f64, yaw: f64) -> Sim3 {
        Sim3::from_rotation_translation(
            Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw),
            Vec3::new(x, y, 0.0),
        )
    }

    /// root ← 1 ← 2 ← … ← `len`, each link `link`.
    fn chain(forest: &mut PoseForest, len: usize, link: Sim3) -> Vec<NodeId> {
        let mut ids = vec![forest.insert_root(FrameId(0), Sim3::identity())];
        for i in 1..=len {
            let parent = *ids.last().unwrap();
            ids.push(
                forest
                    .insert_child(FrameId(i as u64), parent, link, Sim3::identity())
                    .unwrap(),
            );
        }
        ids
    }

    // ── Construction ────────────────────────────────────────────────────────

    #[test]
    fn insert_child_of_unknown_parent_fails() {
        let mut forest = PoseForest::default();
        let err = forest
            .insert_child(FrameId(1), NodeId(9), Sim3::identity(), Sim3::identity())
            .unwrap_err();
        assert_eq!(err, PoseTreeError::UnknownNode(NodeId(9)));
        assert!(forest.is_empty());
    }

    #[test]
    fn insert_links_children() {
        let mut forest = PoseForest::default();
        let root = forest.insert_root(FrameId(0), Sim3::identity());
        let a = forest
            .insert_child(FrameId(1), root, Sim3::identity(), Sim3::identity())
            .unwrap();
        let b = forest
            .insert_child(FrameId(2), root, Sim3::identity(), Sim3::identity())
            .unwrap();
        assert_eq!(forest.children(root).unwrap(), &[a, b]);
        assert_eq!(forest.node(a).unwrap().tracking_parent(), Some(root));
        assert_eq!(forest.len(), 3);
    }

    // ── Resolution ──────────────────────────────────────────────────────────

    #[test]
    fn root_resolves_to_identity_regardless_of_seed() {
        let mut forest = PoseForest::default();
        let seed = step(4.0, -2.0, 0.7);
        let root = forest.insert_root(FrameId(0), seed);
        assert_eq!(forest.node(root).unwrap().cached_pose(), seed);
        assert_eq!(forest.resolve(root).unwrap(), Sim3::identity());

        forest.force_invalidate(root).unwrap();
        assert_eq!(forest.resolve(root).unwrap(), Sim3::identity());
    }

    #[test]
    fn chain_composes_parent_first() {
        let mut forest = PoseForest::default();
        let root = forest.insert_root(FrameId(0), Sim3::identity());
        let t1 = step(1.0, 0.0, std::f64::consts::FRAC_PI_2);
        let t2 = step(1.0, 0.0, 0.0);
        let a = forest.insert_child(FrameId(1), root, t1, Sim3::identity()).unwrap();
        let b = forest.insert_child(FrameId(2), a, t2, Sim3::identity()).unwrap();

        let pose = forest.resolve(b).unwrap();
        assert!(pose.approx_eq(&t1.compose(t2), TOL));
        // b sits 1 m along a's rotated +X, i.e. world +Y.
        assert!((pose.translation.x - 1.0).abs() < TOL);
        assert!((pose.translation.y - 1.0).abs() < TOL);
    }

    #[test]
    fn second_resolution_is_memoised() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 10, step(0.5, 0.1, 0.05));
        let leaf = *ids.last().unwrap();

        let first = forest.resolve(leaf).unwrap();
        let walked = forest.traversals();
        assert_eq!(walked, 10);

        let second = forest.resolve(leaf).unwrap();
        assert_eq!(first, second, "memoised pose must be bit-identical");
        assert_eq!(forest.traversals(), walked, "cache hit must not walk the chain");

        // ancestors were cached on the way up, too.
        forest.resolve(ids[5]).unwrap();
        assert_eq!(forest.traversals(), walked);
    }

    #[test]
    fn resolution_stops_at_cached_ancestor() {
        let mut forest = PoseForest::default();
        let link = step(1.0, 0.0, 0.0);
        let ids = chain(&mut forest, 4, link);
        forest.resolve(ids[2]).unwrap();
        let before = forest.traversals();

        forest.resolve(ids[4]).unwrap();
        assert_eq!(forest.traversals() - before, 2);
    }

    #[test]
    fn resolving_unknown_node_fails() {
        let mut forest = PoseForest::default();
        assert_eq!(
            forest.resolve(NodeId(0)),
            Err(PoseTreeError::UnknownNode(NodeId(0)))
        );
    }

    #[test]
    #[should_panic(expected = "cyclic or corrupted")]
    fn chain_deeper_than_bound_panics() {
        let mut forest = PoseForest::new(ForestConfig {
            max_recursion_depth: 8,
        });
        let ids = chain(&mut forest, 10, step(1.0, 0.0, 0.0));
        let _ = forest.resolve(*ids.last().unwrap());
    }

    #[test]
    fn chain_at_bound_resolves() {
        let mut forest = PoseForest::new(ForestConfig {
            max_recursion_depth: 8,
        });
        // leaf at depth 0, root at depth 7.
        let ids = chain(&mut forest, 7, step(1.0, 0.0, 0.0));
        let pose = forest.resolve(*ids.last().unwrap()).unwrap();
        assert!((pose.translation.x - 7.0).abs() < TOL);
    }

    #[test]
    fn default_bound_handles_long_chain() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 1000, step(0.01, 0.0, 0.0));
        let pose = forest.resolve(*ids.last().unwrap()).unwrap();
        assert!((pose.translation.x - 10.0).abs() < 1e-6);
    }

    #[test]
    fn chain_just_under_default_bound_resolves() {
        let mut forest = PoseForest::default();
        let len = DEFAULT_MAX_RECURSION_DEPTH - 1;
        let ids = chain(&mut forest, len, step(0.001, 0.0, 0.0));
        let pose = forest.resolve(*ids.last().unwrap()).unwrap();
        assert!((pose.translation.x - len as f64 * 0.001).abs() < 1e-6);
        assert_eq!(forest.traversals(), len as u64);
    }

    #[test]
    #[should_panic(expected = "cyclic or corrupted")]
    fn chain_longer_than_default_bound_panics() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 6000, step(0.001, 0.0, 0.0));
        let _ = forest.resolve(*ids.last().unwrap());
    }

    #[test]
    #[should_panic(expected = "cyclic or corrupted")]
    fn cyclic_parent_links_panic() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 3, step(1.0, 0.0, 0.0));
        // corrupt: root ← 3 closes the loop.
        forest.node_mut(ids[0]).unwrap().tracking_parent = Some(ids[3]);
        let _ = forest.resolve(ids[3]);
    }

    #[test]
    fn aborted_resolution_leaves_caches_untouched() {
        let mut forest = PoseForest::new(ForestConfig {
            max_recursion_depth: 3,
        });
        let ids = chain(&mut forest, 5, step(1.0, 0.0, 0.0));
        let leaf = ids[5];

        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| forest.resolve(leaf)));
        assert!(outcome.is_err());
        for id in &ids {
            assert_eq!(forest.node(*id).unwrap().cache_stamp(), CacheStamp::Unset);
        }
        assert_eq!(forest.traversals(), 0);

        // shorter walks still work, and build a cached base for deeper ones.
        let mid = forest.resolve(ids[2]).unwrap();
        assert!((mid.translation.x - 2.0).abs() < TOL);
        let deep = forest.resolve(ids[4]).unwrap();
        assert!((deep.translation.x - 4.0).abs() < TOL);
    }

    // ── Invalidation ────────────────────────────────────────────────────────

    #[test]
    fn force_invalidate_recomputes_only_that_node() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 3, step(1.0, 0.0, 0.0));
        let leaf = ids[3];
        let first = forest.resolve(leaf).unwrap();
        let before = forest.traversals();

        forest.force_invalidate(leaf).unwrap();
        assert_eq!(forest.node(leaf).unwrap().cache_stamp(), CacheStamp::Unset);
        let again = forest.resolve(leaf).unwrap();

        assert_eq!(first, again);
        // one step to the parent, which is still cached.
        assert_eq!(forest.traversals() - before, 1);
    }

    #[test]
    fn invalidate_subtree_touches_all_descendants() {
        let mut forest = PoseForest::default();
        let root = forest.insert_root(FrameId(0), Sim3::identity());
        let a = forest.insert_child(FrameId(1), root, step(1.0, 0.0, 0.0), Sim3::identity()).unwrap();
        let b = forest.insert_child(FrameId(2), a, step(1.0, 0.0, 0.0), Sim3::identity()).unwrap();
        let c = forest.insert_child(FrameId(3), a, step(0.0, 1.0, 0.0), Sim3::identity()).unwrap();
        let d = forest.insert_child(FrameId(4), c, step(0.0, 1.0, 0.0), Sim3::identity()).unwrap();
        for id in [b, d] {
            forest.resolve(id).unwrap();
        }

        assert_eq!(forest.invalidate_subtree(a).unwrap(), 4);
        for id in [a, b, c, d] {
            assert_eq!(forest.node(id).unwrap().cache_stamp(), CacheStamp::Unset);
        }
        assert_ne!(forest.node(root).unwrap().cache_stamp(), CacheStamp::Unset);

        let before = forest.traversals();
        forest.resolve(d).unwrap();
        // d → c → a → root (root itself still cached).
        assert_eq!(forest.traversals() - before, 3);
    }

    #[test]
    fn invalidate_unknown_node_fails() {
        let mut forest = PoseForest::default();
        assert!(forest.force_invalidate(NodeId(3)).is_err());
        assert!(forest.invalidate_subtree(NodeId(3)).is_err());
    }

    // ── Removal ─────────────────────────────────────────────────────────────

    #[test]
    fn remove_with_children_is_rejected() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 2, step(1.0, 0.0, 0.0));
        let err = forest.remove(ids[1]).unwrap_err();
        assert_eq!(
            err,
            PoseTreeError::HasChildren {
                node: ids[1],
                children: 1
            }
        );
        assert!(forest.contains(ids[1]));
    }

    #[test]
    fn remove_leaf_detaches_and_never_reuses_slot() {
        let mut forest = PoseForest::default();
        let ids = chain(&mut forest, 2, step(1.0, 0.0, 0.0));
        let removed = forest.remove(ids[2]).unwrap();
        assert_eq!(removed.frame_id(), FrameId(2));
        assert!(forest.children(ids[1]).unwrap().is_empty());
        assert_eq!(forest.len(), 2);

        let fresh = forest
            .insert_child(FrameId(9), ids[1], Sim3::identity(), Sim3::identity())
            .unwrap();
        assert_ne!(fresh, ids[2]);
        assert_eq!(forest.resolve(ids[2]), Err(PoseTreeError::UnknownNode(ids[2])));

        // the parent is now removable once its last child goes.
        forest.remove(fresh).unwrap();
        forest.remove(ids[1]).unwrap();
        assert_eq!(forest.iter().count(), 1);
    }
}
