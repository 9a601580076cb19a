use super::*;

/// Unit of integer event-time attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTimeResolution {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl EventTimeResolution {
    /// Convert a tick count in this resolution to event-time milliseconds.
    ///
    /// Sub-millisecond resolutions round toward negative infinity. Values
    /// outside the event-time range saturate.
    pub fn to_event_time(self, ticks: i128) -> EventTime {
        let ms = match self {
            Self::Seconds => ticks.saturating_mul(1_000),
            Self::Milliseconds => ticks,
            Self::Microseconds => ticks.div_euclid(1_000),
            Self::Nanoseconds => ticks.div_euclid(1_000_000),
        };
        ms.clamp(i128::from(EVENT_TIME_MIN), i128::from(EVENT_TIME_MAX)) as EventTime
    }
}

/// Declared type of the event-time attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTimeType {
    Timestamp,
    Int64,
    UInt64,
}

/// Locates and converts the event-time attribute of an output tuple.
///
/// `path` holds attribute indices, outermost first; every index but the
/// last must select a nested tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimeAttribute {
    pub path: Vec<usize>,
    pub kind: EventTimeType,
    pub resolution: EventTimeResolution,
}

impl EventTimeAttribute {
    pub fn new(path: Vec<usize>, kind: EventTimeType, resolution: EventTimeResolution) -> Self {
        Self {
            path,
            kind,
            resolution,
        }
    }

    /// Extract the event time of `tuple`.
    pub fn event_time(&self, tuple: &Tuple) -> Result<EventTime> {
        let value = tuple.attribute_at(&self.path).ok_or_else(|| {
            Error::illegal(format!("no event-time attribute at path {:?}", self.path))
        })?;
        match (self.kind, value) {
            (EventTimeType::Timestamp, Value::Timestamp(ts)) => Ok(ts.as_millis()),
            (EventTimeType::Int64, Value::Int64(v)) => {
                Ok(self.resolution.to_event_time(i128::from(*v)))
            }
            (EventTimeType::UInt64, Value::UInt64(v)) => {
                Ok(self.resolution.to_event_time(i128::from(*v)))
            }
            (kind, value) => Err(Error::illegal(format!(
                "event-time attribute declared {kind:?} but holds {value:?}"
            ))),
        }
    }
}

/// How the operator produces its output watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkMode {
    /// Forward the merged input watermark.
    InputWatermark,
    /// Derive the watermark from the event time of submitted tuples.
    OutputEventTime,
    /// The operator calls `set_watermark` itself.
    Manual,
}

/// Downstream surface used to emit watermark punctuations.
pub trait OutputSink: Send + Sync {
    fn submit_punctuation(&self, punct: Punctuation, port: u32) -> Result<()>;
}

#[derive(Debug)]
struct ContextState {
    mode: Option<WatermarkMode>,
    current: Watermark,
    /// Last watermark submitted per output port; disabled ports hold `MAX`.
    sent: Vec<Watermark>,
}

/// Per-operator event-time facade.
///
/// Wires the input `WatermarkReceiver` to the output ports, extracts event
/// time from tuples and generates watermarks for event-time sources.
pub struct EventTimeContext {
    job_id: u64,
    operator_index: u32,
    input_port_count: usize,
    receiver: WatermarkReceiver,
    getters: Vec<Option<EventTimeAttribute>>,
    sink: Arc<dyn OutputSink>,
    lag: EventTime,
    min_gap: EventTime,
    state: Mutex<ContextState>,
}

impl EventTimeContext {
    /// Create a context for operator `operator_index` of job `job_id`
    /// with no input connections and no output ports.
    pub fn new(job_id: u64, operator_index: u32, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            job_id,
            operator_index,
            input_port_count: 0,
            receiver: WatermarkReceiver::new(job_id, []),
            getters: Vec::new(),
            sink,
            lag: 0,
            min_gap: 0,
            state: Mutex::new(ContextState {
                mode: None,
                current: Watermark::MIN,
                sent: Vec::new(),
            }),
        }
    }

    /// Set the upstream connections feeding this operator.
    pub fn with_input_connections(mut self, connections: Vec<ConnectionId>) -> Self {
        self.input_port_count = connections
            .iter()
            .map(|c| c.iport_index as usize + 1)
            .max()
            .unwrap_or(0);
        self.receiver = WatermarkReceiver::new(self.job_id, connections);
        self
    }

    /// Append an output port. `None` leaves the port disabled for event time.
    pub fn with_output_port(mut self, attribute: Option<EventTimeAttribute>) -> Self {
        let initial = if attribute.is_some() {
            Watermark::MIN
        } else {
            Watermark::MAX
        };
        self.getters.push(attribute);
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .sent
            .push(initial);
        self
    }

    /// Apply lag and minimum gap from configuration.
    pub fn with_generation(mut self, config: &EventTimeConfig) -> Self {
        self.lag = config.lag;
        self.min_gap = config.min_gap;
        self
    }

    pub fn receiver(&self) -> &WatermarkReceiver {
        &self.receiver
    }

    pub fn output_port_count(&self) -> usize {
        self.getters.len()
    }

    /// Pick the default mode once. Event-time annotated operators become
    /// sources, everything else forwards its input watermark.
    ///
    /// Input watermarks received before a forwarding mode was set are
    /// published here. [`current_watermark`](Self::current_watermark)
    /// reports the result.
    pub fn initialize_mode(&self, annotated: bool) -> Result<WatermarkMode> {
        let mut state = self.lock()?;
        let mode = *state.mode.get_or_insert(if annotated {
            WatermarkMode::OutputEventTime
        } else {
            WatermarkMode::InputWatermark
        });
        if self.input_port_count == 0 && mode == WatermarkMode::InputWatermark {
            warn!(
                operator = self.operator_index,
                "operator forwards input watermarks but has no input ports"
            );
        } else if annotated && mode != WatermarkMode::OutputEventTime {
            warn!(
                operator = self.operator_index,
                ?mode,
                "event-time lag is ignored in this watermark mode"
            );
        }
        info!(operator = self.operator_index, ?mode, "event-time context initialized");
        self.catch_up_locked(&mut state)?;
        Ok(mode)
    }

    /// Override the mode chosen at initialization.
    pub fn set_mode(&self, mode: WatermarkMode) -> Result<()> {
        let mut state = self.lock()?;
        state.mode = Some(mode);
        self.catch_up_locked(&mut state)
    }

    /// Forward the merged input watermark if it got ahead while the mode
    /// did not relay it.
    fn catch_up_locked(&self, state: &mut ContextState) -> Result<()> {
        if state.mode != Some(WatermarkMode::InputWatermark) || self.input_port_count == 0 {
            return Ok(());
        }
        let wm = self.receiver.watermark()?;
        if wm.is_unset() || wm <= state.current {
            return Ok(());
        }
        debug!(watermark = %wm, "publishing input watermark received before the mode was set");
        state.current = wm;
        self.submit_locked(state, wm)
    }

    pub fn mode(&self) -> Result<Option<WatermarkMode>> {
        Ok(self.lock()?.mode)
    }

    /// Feed a watermark punctuation from input port `port`.
    ///
    /// Returns the new operator watermark when this call advanced it; the
    /// caller propagates it to its windows. Without a mode the receiver
    /// still advances and the watermark is forwarded once the mode is set.
    pub fn process_watermark(&self, punct: &Punctuation, port: u32) -> Result<Option<Watermark>> {
        let Some(wm) = self.receiver.receive(punct, port)? else {
            return Ok(None);
        };
        trace!(watermark = %wm, port, "input watermark advanced");
        if self.mode()? == Some(WatermarkMode::InputWatermark) && self.set_watermark(wm)? {
            return Ok(Some(wm));
        }
        Ok(None)
    }

    /// Raise the operator watermark and forward it to every output port.
    ///
    /// Returns `false` when `wm` does not advance the current watermark.
    pub fn set_watermark(&self, wm: Watermark) -> Result<bool> {
        let mut state = self.lock()?;
        if wm <= state.current {
            return Ok(false);
        }
        state.current = wm;
        self.submit_locked(&mut state, wm)?;
        Ok(true)
    }

    /// Submit `wm` on every event-time enabled output port that is behind.
    pub fn submit(&self, wm: Watermark) -> Result<()> {
        let mut state = self.lock()?;
        self.submit_locked(&mut state, wm)
    }

    /// Submit `wm` on one output port. Returns whether a punctuation was sent.
    pub fn submit_to(&self, wm: Watermark, port: u32) -> Result<bool> {
        let mut state = self.lock()?;
        self.submit_port(&mut state, wm, port)
    }

    fn submit_locked(&self, state: &mut ContextState, wm: Watermark) -> Result<()> {
        for port in 0..self.getters.len() as u32 {
            self.submit_port(state, wm, port)?;
        }
        Ok(())
    }

    fn submit_port(&self, state: &mut ContextState, wm: Watermark, port: u32) -> Result<bool> {
        let sent = state
            .sent
            .get_mut(port as usize)
            .ok_or_else(|| Error::illegal(format!("output port {port} does not exist")))?;
        // Disabled ports hold MAX and never pass this check.
        if wm <= *sent {
            return Ok(false);
        }
        *sent = wm;
        let punct = Punctuation::watermark(WatermarkPayload::new(
            self.job_id,
            self.operator_index,
            port,
            wm,
        ));
        debug!(watermark = %wm, port, "submitting watermark");
        self.sink.submit_punctuation(punct, port)?;
        Ok(true)
    }

    /// The watermark an event-time source emits after submitting a tuple
    /// with `event_time`: trails it by the lag and only moves forward in
    /// steps of at least the minimum gap.
    pub fn watermark_for(&self, event_time: EventTime) -> Result<Watermark> {
        let state = self.lock()?;
        let lag = match state.mode {
            Some(WatermarkMode::OutputEventTime) => self.lag,
            _ => 0,
        };
        let candidate = event_time.saturating_sub(lag);
        let current = state.current;
        if candidate <= current.timestamp {
            return Ok(current);
        }
        if !current.is_unset() && candidate - current.timestamp < self.min_gap {
            return Ok(current);
        }
        Ok(Watermark::new(candidate))
    }

    /// Convenience for sources: derive the watermark for `tuple` leaving on
    /// `port` and apply it. Returns the new watermark if it advanced.
    pub fn on_tuple_submitted(&self, tuple: &Tuple, port: u32) -> Result<Option<Watermark>> {
        let ts = self.event_time_for_output(tuple, port)?;
        let wm = self.watermark_for(ts)?;
        Ok(self.set_watermark(wm)?.then_some(wm))
    }

    /// Extract the event time of a tuple submitted on `port`.
    pub fn event_time_for_output(&self, tuple: &Tuple, port: u32) -> Result<EventTime> {
        match self.getters.get(port as usize) {
            Some(Some(getter)) => getter.event_time(tuple),
            Some(None) => Err(Error::illegal(format!(
                "output port {port} is not event-time enabled"
            ))),
            None => Err(Error::illegal(format!("output port {port} does not exist"))),
        }
    }

    pub fn is_output_port_enabled(&self, port: u32) -> bool {
        matches!(self.getters.get(port as usize), Some(Some(_)))
    }

    /// The operator watermark.
    pub fn current_watermark(&self) -> Result<Watermark> {
        Ok(self.lock()?.current)
    }

    /// The merged input watermark.
    pub fn input_watermark(&self) -> Result<Watermark> {
        self.receiver.watermark()
    }

    /// Last watermark submitted on `port`.
    pub fn output_watermark(&self, port: u32) -> Result<Watermark> {
        self.lock()?
            .sent
            .get(port as usize)
            .copied()
            .ok_or_else(|| Error::illegal(format!("output port {port} does not exist")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ContextState>> {
        self.state
            .lock()
            .map_err(|_| Error::invalid_state("event-time context lock poisoned"))
    }
}

/// Overwrite the watermark value carried by a punctuation.
pub fn set_punctuation_watermark(punct: &mut Punctuation, wm: Watermark) -> Result<()> {
    match punct {
        Punctuation::WatermarkMarker(Some(payload)) => {
            payload.value = wm;
            Ok(())
        }
        Punctuation::WatermarkMarker(None) => Err(Error::illegal(
            "watermark punctuation has no payload",
        )),
        other => Err(Error::illegal(format!(
            "cannot set a watermark on {other:?}"
        ))),
    }
}
