//! `posetree-geometry` – rigid and similarity transforms for camera poses.
//!
//! # Modules
//!
//! - [`sim3`] – [`Sim3`][sim3::Sim3]: 7-DoF similarity transform (rotation,
//!   translation, scale) used for every absolute and relative pose in the
//!   pose forest, together with the [`Vec3`][sim3::Vec3] and
//!   [`Quaternion`][sim3::Quaternion] primitives it is built from.

pub mod sim3;

pub use sim3::{Quaternion, Sim3, Vec3};
