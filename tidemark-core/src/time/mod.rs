use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::EventTimeConfig;
use crate::error::{Error, Result};
use crate::types::{
    ConnectionId, EVENT_TIME_MAX, EVENT_TIME_MIN, EventTime, Punctuation, Tuple, Value, Watermark,
    WatermarkPayload,
};

mod event_time;
mod receiver;

pub use event_time::*;
pub use receiver::*;

#[cfg(test)]
#[path = "tests/receiver_tests.rs"]
mod receiver_tests;

#[cfg(test)]
#[path = "tests/event_time_tests.rs"]
mod event_time_tests;
