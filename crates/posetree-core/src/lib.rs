//! `posetree-core` – pose caching and optimizer merging.
//!
//! Every tracked camera frame owns a pose node that stores only its raw,
//! tracking-derived transform to a parent node.  Absolute poses are derived
//! lazily by walking the parent chain and memoised against a single
//! forest-wide epoch, so one counter increment invalidates every cached pose
//! at once.  A background pose-graph optimizer overwrites absolute poses
//! through a two-phase stage/commit protocol.
//!
//! # Modules
//!
//! - [`node`] – [`PoseNode`][node::PoseNode]: per-frame record (raw relative
//!   transform, cached absolute pose, cache stamp, optimizer flags) and its
//!   [`MergeState`][node::MergeState].
//! - [`forest`] – [`PoseForest`][forest::PoseForest]: arena of nodes with
//!   the bounded, memoised absolute-pose resolution and cache
//!   invalidation hooks.
//! - [`merge`] – graph admission plus
//!   [`stage_optimized_pose`][forest::PoseForest::stage_optimized_pose] /
//!   [`commit_optimized_pose`][forest::PoseForest::commit_optimized_pose]
//!   and batched [`OptimizationRound`][merge::OptimizationRound]s.
//! - [`shared`] – [`SharedPoseForest`][shared::SharedPoseForest]: the
//!   forest behind one coarse lock so tracking and optimizer threads can
//!   share it.

pub mod forest;
pub mod merge;
pub mod node;
pub mod shared;

pub use forest::{ForestConfig, PoseForest, DEFAULT_MAX_RECURSION_DEPTH};
pub use merge::{MergeSummary, OptimizationRound};
pub use node::{MergeState, PoseNode};
pub use shared::SharedPoseForest;
