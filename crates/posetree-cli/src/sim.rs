//! Simulated tracking session.
//!
//! A camera drives along a circle.  The tracker links every frame to the
//! latest keyframe with a relative pose that carries a small translation
//! bias, so absolute poses derived from the chain drift.  Periodically a
//! simulated optimizer "solves" the keyframe graph (it returns ground truth)
//! and the merge coordinator folds the result back into the forest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use posetree_core::{ForestConfig, OptimizationRound, SharedPoseForest};
use posetree_geometry::{Quaternion, Sim3, Vec3};
use posetree_middleware::{EventBus, Topic, TopicReceiver};
use posetree_runtime::{ChannelOptimizer, MergeCoordinator, MergeStats};
use posetree_types::{Epoch, EventPayload, FrameId, NodeId, PoseTreeError, VertexHandle};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;

/// Keyframes handed to the optimizer for one pass.
type GraphSnapshot = Vec<(NodeId, FrameId)>;

// ─────────────────────────────────────────────────────────────────────────────
// Ground truth
// ─────────────────────────────────────────────────────────────────────────────

/// Circular ground-truth trajectory, expressed relative to frame 0 so the
/// root node's identity pose is exact.
#[derive(Debug, Clone, Copy)]
pub struct Trajectory {
    radius: f64,
    step_rad: f64,
}

impl Trajectory {
    pub fn new(radius: f64, step_rad: f64) -> Self {
        Self { radius, step_rad }
    }

    fn on_circle(&self, frame: FrameId) -> Sim3 {
        let theta = self.step_rad * frame.0 as f64;
        Sim3::from_rotation_translation(
            Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), theta),
            Vec3::new(self.radius * theta.cos(), self.radius * theta.sin(), 0.0),
        )
    }

    /// True camera-to-world pose of `frame`.
    pub fn pose(&self, frame: FrameId) -> Sim3 {
        self.on_circle(FrameId(0))
            .inverse()
            .compose(self.on_circle(frame))
    }
}

fn position_error(estimate: Sim3, truth: Sim3) -> f64 {
    Vec3::new(
        estimate.translation.x - truth.translation.x,
        estimate.translation.y - truth.translation.y,
        estimate.translation.z - truth.translation.z,
    )
    .norm()
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a [`Simulation`] run.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub frames_tracked: u64,
    pub keyframes: usize,
    pub live_nodes: usize,
    pub epoch: Epoch,
    pub merge: MergeStats,
    /// Worst position error of a freshly tracked frame (metres).
    pub max_tracking_error: f64,
    /// Position error of the last frame once every round is merged.
    pub final_error: f64,
    /// Set when the run was cut short.
    pub interrupted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulation
// ─────────────────────────────────────────────────────────────────────────────

pub struct Simulation {
    config: Config,
    trajectory: Trajectory,
    shutdown: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(config: Config, shutdown: Arc<AtomicBool>) -> Self {
        let trajectory = Trajectory::new(config.trajectory_radius, config.angular_step_rad);
        Self {
            config,
            trajectory,
            shutdown,
        }
    }

    /// Track every configured frame, then wait for the optimizer to drain.
    pub async fn run(self) -> Result<SimReport, PoseTreeError> {
        let cfg = &self.config;
        let forest = SharedPoseForest::new(ForestConfig {
            max_recursion_depth: cfg.max_recursion_depth,
        });
        let bus = EventBus::default();
        let watcher = tokio::spawn(log_merges(bus.subscribe_to(Topic::Merges)));

        let (round_tx, mut optimizer) = ChannelOptimizer::channel(8);
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<GraphSnapshot>(8);
        let solver = tokio::spawn(solve(snapshot_rx, round_tx, self.trajectory));

        let mut merger = MergeCoordinator::new(forest.clone(), bus.clone());
        let merging = tokio::spawn(async move {
            merger.run(&mut optimizer).await;
            merger.stats()
        });

        // Structural operations are announced through their own coordinator
        // so the merge task keeps exclusive use of its stats.
        let structure = MergeCoordinator::new(forest.clone(), bus.clone());

        let bias = Sim3::from_translation(Vec3::new(cfg.drift_per_frame, 0.0, 0.0));
        let root = forest.insert_root(FrameId(0), Sim3::identity());
        let mut keyframe = (root, FrameId(0));
        let mut graph: GraphSnapshot = Vec::new();
        let mut last = root;
        let mut pending_leaf: Option<NodeId> = None;
        let mut max_tracking_error: f64 = 0.0;
        let mut frames_tracked = 0;
        let mut interrupted = false;

        for i in 1..cfg.frames {
            if self.shutdown.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            let frame = FrameId(i);
            let (parent, parent_frame) = keyframe;

            let true_relative = self
                .trajectory
                .pose(parent_frame)
                .inverse()
                .compose(self.trajectory.pose(frame));
            let measured = true_relative.compose(bias);
            let estimate = forest.resolve(parent)?.compose(measured);
            let node = forest.insert_child(frame, parent, measured, estimate)?;

            let tracked = forest.resolve(node)?;
            max_tracking_error =
                max_tracking_error.max(position_error(tracked, self.trajectory.pose(frame)));

            // Non-keyframes are never parents; only the newest one is kept.
            if let Some(leaf) = pending_leaf.take() {
                structure.retire(leaf)?;
            }
            if i % cfg.keyframe_interval == 0 {
                structure.admit(node, |f| VertexHandle(f.0))?;
                graph.push((node, frame));
                keyframe = (node, frame);
            } else {
                pending_leaf = Some(node);
            }
            last = node;
            frames_tracked += 1;

            if i % cfg.optimize_every == 0 {
                debug!(frame = i, keyframes = graph.len(), "requesting optimizer pass");
                send_snapshot(&snapshot_tx, graph.clone()).await?;
            }
            if cfg.frame_interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(cfg.frame_interval_ms)).await;
            }
        }

        send_snapshot(&snapshot_tx, graph.clone()).await?;
        drop(snapshot_tx);
        solver
            .await
            .map_err(|e| PoseTreeError::Channel(format!("optimizer task failed: {e}")))?;
        let merge = merging
            .await
            .map_err(|e| PoseTreeError::Channel(format!("merge task failed: {e}")))?;
        watcher.abort();

        let last_frame = forest.with_forest(|f| f.node(last).map(|n| n.frame_id()));
        let last_frame = last_frame.ok_or(PoseTreeError::UnknownNode(last))?;
        let final_error = position_error(forest.resolve(last)?, self.trajectory.pose(last_frame));

        let report = SimReport {
            frames_tracked,
            keyframes: graph.len(),
            live_nodes: forest.len(),
            epoch: forest.epoch(),
            merge,
            max_tracking_error,
            final_error,
            interrupted,
        };
        info!(?report, "simulation finished");
        Ok(report)
    }
}

async fn send_snapshot(
    tx: &mpsc::Sender<GraphSnapshot>,
    snapshot: GraphSnapshot,
) -> Result<(), PoseTreeError> {
    tx.send(snapshot)
        .await
        .map_err(|_| PoseTreeError::Channel("optimizer stopped accepting work".into()))
}

/// Stand-in optimizer: every keyframe is solved to its true pose.
async fn solve(
    mut snapshots: mpsc::Receiver<GraphSnapshot>,
    rounds: mpsc::Sender<OptimizationRound>,
    trajectory: Trajectory,
) {
    while let Some(snapshot) = snapshots.recv().await {
        let round: OptimizationRound = snapshot
            .into_iter()
            .map(|(node, frame)| (node, trajectory.pose(frame)))
            .collect();
        if rounds.send(round).await.is_err() {
            break;
        }
    }
}

async fn log_merges(mut merges: TopicReceiver) {
    while let Some(event) = merges.next().await {
        if let EventPayload::RoundCommitted { epoch, nodes, .. } = event.payload {
            info!(%epoch, nodes = nodes.len(), "poses refreshed by optimizer");
        }
    }
}
