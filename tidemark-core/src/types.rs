use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. Marks a port that will never carry event time again.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// Watermark indicates that no elements with a timestamp below this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// "No information yet".
    pub const MIN: Watermark = Watermark {
        timestamp: EVENT_TIME_MIN,
    };

    /// Port permanently inactive for event time.
    pub const MAX: Watermark = Watermark {
        timestamp: EVENT_TIME_MAX,
    };

    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::MIN
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::MIN
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::MIN => f.write_str("Watermark(MIN)"),
            Self::MAX => f.write_str("Watermark(MAX)"),
            _ => write!(f, "Watermark({}ms)", self.timestamp),
        }
    }
}

/// Identifies one logical producer -> consumer edge.
///
/// Two watermarks coming from the same upstream output port but arriving on
/// different local input ports belong to different connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    pub job_id: u64,
    pub operator_index: u32,
    pub oport_index: u32,
    pub iport_index: u32,
}

impl ConnectionId {
    pub fn new(job_id: u64, operator_index: u32, oport_index: u32, iport_index: u32) -> Self {
        Self {
            job_id,
            operator_index,
            oport_index,
            iport_index,
        }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job={} op={} oport={} iport={}",
            self.job_id, self.operator_index, self.oport_index, self.iport_index
        )
    }
}

/// Payload carried by a `WatermarkMarker` punctuation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatermarkPayload {
    pub job_id: u64,
    pub operator_instance_id: u32,
    pub oport_index: u32,
    pub value: Watermark,
}

impl WatermarkPayload {
    pub fn new(job_id: u64, operator_instance_id: u32, oport_index: u32, value: Watermark) -> Self {
        Self {
            job_id,
            operator_instance_id,
            oport_index,
            value,
        }
    }

    /// The connection this payload arrived on, given the local input port.
    pub fn connection(&self, iport_index: u32) -> ConnectionId {
        ConnectionId::new(
            self.job_id,
            self.operator_instance_id,
            self.oport_index,
            iport_index,
        )
    }
}

/// Out-of-band markers interleaved with tuples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Punctuation {
    WindowMarker,
    FinalMarker,
    /// A watermark marker; `None` means the payload is missing (malformed).
    WatermarkMarker(Option<WatermarkPayload>),
}

impl Punctuation {
    pub fn watermark(payload: WatermarkPayload) -> Self {
        Self::WatermarkMarker(Some(payload))
    }

    pub fn is_watermark(&self) -> bool {
        matches!(self, Self::WatermarkMarker(_))
    }
}

/// A wall-clock style timestamp as carried in tuple attributes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Milliseconds since epoch, saturating at the event-time range.
    pub fn as_millis(&self) -> EventTime {
        self.secs
            .saturating_mul(1_000)
            .saturating_add(i64::from(self.nanos / 1_000_000))
    }

    pub fn from_millis(ms: EventTime) -> Self {
        Self {
            secs: ms.div_euclid(1_000),
            nanos: (ms.rem_euclid(1_000) as u32) * 1_000_000,
        }
    }
}

/// Dynamically typed attribute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Str(String),
    Timestamp(Timestamp),
    Tuple(Tuple),
}

/// An ordered list of attributes. Attributes may themselves be tuples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tuple {
    pub attributes: Vec<Value>,
}

impl Tuple {
    pub fn new(attributes: Vec<Value>) -> Self {
        Self { attributes }
    }

    pub fn attribute(&self, index: usize) -> Option<&Value> {
        self.attributes.get(index)
    }

    /// Walk a path of attribute indices into nested tuples.
    pub fn attribute_at(&self, path: &[usize]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for &idx in parents {
            match current.attribute(idx)? {
                Value::Tuple(inner) => current = inner,
                _ => return None,
            }
        }
        current.attribute(*last)
    }
}

/// Trait bound for types that can be stored in window panes and checkpoints.
pub trait StreamData: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

// Blanket implementation: any type satisfying the bounds is StreamData.
impl<T> StreamData for T where T: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
