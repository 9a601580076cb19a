//! # Tidemark Core
//!
//! Event-time windowing with watermark tracking and incremental checkpoints.
//!
//! - [`types`]: event time, watermarks, punctuations and tuples.
//! - [`time`]: the [`WatermarkReceiver`](time::WatermarkReceiver) that merges
//!   per-connection watermarks, and the per-operator
//!   [`EventTimeContext`](time::EventTimeContext).
//! - [`window`]: sliding [`TimeIntervalWindow`](window::TimeIntervalWindow)s
//!   and their pane state machine.
//! - [`checkpoint`]: checkpoint buffers, incremental containers, the
//!   [`CheckpointContext`](checkpoint::CheckpointContext) and the background
//!   [`CheckpointThread`](checkpoint::CheckpointThread).
//! - [`config`]: TOML configuration.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod time;
pub mod types;
pub mod window;

pub use error::{Error, Result};
