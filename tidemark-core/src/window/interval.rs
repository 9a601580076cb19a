use super::*;

/// A half-open event-time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    start: EventTime,
    end: EventTime,
}

impl Interval {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> EventTime {
        self.start
    }

    pub fn end(&self) -> EventTime {
        self.end
    }

    pub fn duration(&self) -> EventTime {
        self.end - self.start
    }

    /// Return true if `t` falls inside this interval.
    pub fn contains(&self, t: EventTime) -> bool {
        t >= self.start && t < self.end
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Computes the sliding intervals covering an event time.
///
/// Interval starts are the points `offset + k * period`; every interval is
/// `duration` long, so a time belongs to about `duration / period` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalAssigner {
    duration: EventTime,
    period: EventTime,
    offset: EventTime,
}

impl IntervalAssigner {
    pub fn new(duration: EventTime, period: EventTime, offset: EventTime) -> Result<Self> {
        if duration <= 0 {
            return Err(Error::illegal(format!(
                "interval duration must be positive, got {duration}"
            )));
        }
        if period <= 0 {
            return Err(Error::illegal(format!(
                "creation period must be positive, got {period}"
            )));
        }
        Ok(Self {
            duration,
            period,
            offset,
        })
    }

    pub fn from_config(config: &WindowConfig) -> Result<Self> {
        Self::new(
            config.interval_duration,
            config.creation_period,
            config.interval_offset,
        )
    }

    pub fn duration(&self) -> EventTime {
        self.duration
    }

    pub fn period(&self) -> EventTime {
        self.period
    }

    pub fn offset(&self) -> EventTime {
        self.offset
    }

    /// The latest interval start not after `t`, or `None` when the
    /// computation leaves the event-time range.
    pub fn last_start_for(&self, t: EventTime) -> Option<EventTime> {
        let shifted = t.checked_sub(self.offset)?.checked_add(self.period)?;
        t.checked_sub(shifted.rem_euclid(self.period))
    }

    /// All intervals `[s, s + duration)` with `s <= t < s + duration`, latest
    /// start first. Intervals whose end cannot be represented are skipped.
    pub fn assign(&self, t: EventTime) -> Vec<Interval> {
        let Some(mut start) = self.last_start_for(t) else {
            warn!(event_time = t, "cannot assign event time to an interval");
            return Vec::new();
        };
        let lower = t.saturating_sub(self.duration);
        let mut intervals = Vec::with_capacity((self.duration / self.period).clamp(1, 64) as usize);
        while start > lower {
            match start.checked_add(self.duration) {
                Some(end) => intervals.push(Interval::new(start, end)),
                None => warn!(start, duration = self.duration, "interval end overflows, skipping"),
            }
            match start.checked_sub(self.period) {
                Some(prev) => start = prev,
                None => break,
            }
        }
        intervals
    }
}
