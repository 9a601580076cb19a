//! Sliding time-interval windows driven by event time.
//!
//! A [`TimeIntervalWindow`] maps each tuple's event time to the intervals
//! that cover it, keeps one [`TimeIntervalWindowPane`] per interval, and
//! advances the panes through `Incomplete -> Complete -> Closed` as the
//! watermark moves past their end and then past the discard age.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::checkpoint::{Checkpoint, IncrDeque, StateHandler};
use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::time::watermark_payload;
use crate::types::{EventTime, Punctuation, StreamData, Watermark};

mod events;
mod interval;
mod pane;
mod time_interval;

pub use events::*;
pub use interval::*;
pub use pane::*;
pub use time_interval::*;

#[cfg(test)]
#[path = "tests/interval_tests.rs"]
mod interval_tests;

#[cfg(test)]
#[path = "tests/pane_tests.rs"]
mod pane_tests;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
