//! `posetree-middleware` – notification plumbing.
//!
//! Lets tracking, rendering and bookkeeping components learn when the pose
//! forest changed underneath them without polling its epoch.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
