//! Checkpointing: byte buffers sealed with chain metadata, incremental
//! containers, consistent-region batches and the worker pool that runs
//! checkpoint work off the tuple path.
//!
//! # Storage layout
//!
//! Every checkpoint `id` of an entry owns up to three keys:
//!
//! ```text
//! {entry}/ckpt-{id}        normal data, sealed with CheckpointMetadata
//! {entry}/ckpt-{id}.delta  base and delta records of incremental containers
//! {entry}/ckpt-{id}.index  previous id of the chain plus (key, kind, offset)
//! ```
//!
//! Writes go to `.tmp` keys first and are renamed into place, data key last.

use crate::error::{Error, Result};
use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Checkpoint sequence id, assigned by the consistent-region coordinator.
pub type CheckpointId = i64;

mod batch;
mod buffer;
mod ckpt;
mod context;
mod incremental;
mod metadata;
mod store;
mod thread;

pub use batch::*;
pub use buffer::*;
pub use ckpt::*;
pub use context::*;
pub use incremental::*;
pub use metadata::*;
pub use store::*;
pub use thread::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/incremental_tests.rs"]
mod incremental_tests;

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod store_tests;

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod context_tests;

#[cfg(test)]
#[path = "tests/thread_tests.rs"]
mod thread_tests;
