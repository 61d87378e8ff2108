//! The optimizer seam.
//!
//! A pose-graph optimizer runs on its own schedule (loop closures, periodic
//! bundle adjustment) and produces one [`OptimizationRound`] per pass.  The
//! runtime never looks inside the optimizer; it only pulls finished rounds
//! through [`PoseGraphOptimizer`].

use async_trait::async_trait;
use posetree_core::OptimizationRound;
use tokio::sync::mpsc;

/// Source of finished optimizer passes.
///
/// # Contract
///
/// * A round is complete when it is returned: every pose of one pass is in
///   the same [`OptimizationRound`], so the consumer can stage all of them
///   before committing any.
/// * `None` means the optimizer has shut down.
#[async_trait]
pub trait PoseGraphOptimizer: Send {
    async fn next_round(&mut self) -> Option<OptimizationRound>;
}

/// [`PoseGraphOptimizer`] fed through a bounded Tokio channel, for
/// optimizers that run on their own thread or task.
///
/// # Example
///
/// ```rust
/// use posetree_core::OptimizationRound;
/// use posetree_runtime::optimizer::{ChannelOptimizer, PoseGraphOptimizer};
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let (tx, mut optimizer) = ChannelOptimizer::channel(4);
///     tx.send(OptimizationRound::new()).await.unwrap();
///     drop(tx);
///     assert!(optimizer.next_round().await.is_some());
///     assert!(optimizer.next_round().await.is_none());
/// });
/// ```
pub struct ChannelOptimizer {
    rounds: mpsc::Receiver<OptimizationRound>,
}

impl ChannelOptimizer {
    pub fn new(rounds: mpsc::Receiver<OptimizationRound>) -> Self {
        Self { rounds }
    }

    /// Create a connected sender / optimizer pair holding up to
    /// `capacity` unmerged rounds.
    pub fn channel(capacity: usize) -> (mpsc::Sender<OptimizationRound>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl PoseGraphOptimizer for ChannelOptimizer {
    async fn next_round(&mut self) -> Option<OptimizationRound> {
        self.rounds.recv().await
    }
}
