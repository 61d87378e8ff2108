//! `posetree-runtime` – drives the pose forest from live collaborators.
//!
//! # Modules
//!
//! - [`optimizer`] – [`PoseGraphOptimizer`][optimizer::PoseGraphOptimizer]:
//!   the seam through which a pose-graph optimizer hands back
//!   [`OptimizationRound`][posetree_core::OptimizationRound]s, plus the
//!   channel-backed [`ChannelOptimizer`][optimizer::ChannelOptimizer].
//! - [`merge_loop`] – [`MergeCoordinator`][merge_loop::MergeCoordinator]:
//!   applies each round to the shared forest (all stages before any commit,
//!   one epoch bump per round) and announces the new epoch on the
//!   [`EventBus`][posetree_middleware::EventBus].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.

pub mod merge_loop;
pub mod optimizer;
pub mod telemetry;

pub use merge_loop::{MergeCoordinator, MergeStats};
pub use optimizer::{ChannelOptimizer, PoseGraphOptimizer};
pub use telemetry::{init_tracing, TracerProviderGuard};
