use super::*;

/// How a tuple was handled by [`TimeIntervalWindow::insert_tuple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored in every covering pane.
    Inserted,
    /// Older than the watermark but within the discard age; stored.
    Late,
    /// Older than the drop point; discarded.
    Dropped,
    /// No interval could be computed for the event time.
    Unassigned,
}

// ── TimeIntervalWindow ────────────────────────────────────────────────────────

/// Sliding time-interval window.
///
/// Panes are created lazily on the first tuple of their interval and removed
/// by the watermark sweep once they are closed.
pub struct TimeIntervalWindow<T, P, H = ()> {
    assigner: IntervalAssigner,
    discard_age: EventTime,
    watermark: Watermark,
    panes: BTreeMap<Interval, TimeIntervalWindowPane<T, P>>,
    handler: H,
}

impl<T, P, H> TimeIntervalWindow<T, P, H>
where
    T: StreamData,
    P: StreamData + Ord,
    H: WindowEventHandler<T, P>,
{
    pub fn new(assigner: IntervalAssigner, discard_age: EventTime, handler: H) -> Result<Self> {
        if discard_age < 0 {
            return Err(Error::illegal(format!(
                "discard age must not be negative, got {discard_age}"
            )));
        }
        Ok(Self {
            assigner,
            discard_age,
            watermark: Watermark::MIN,
            panes: BTreeMap::new(),
            handler,
        })
    }

    pub fn from_config(config: &WindowConfig, handler: H) -> Result<Self> {
        Self::new(
            IntervalAssigner::from_config(config)?,
            config.discard_age,
            handler,
        )
    }

    pub fn assigner(&self) -> &IntervalAssigner {
        &self.assigner
    }

    pub fn discard_age(&self) -> EventTime {
        self.discard_age
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Tuples with an event time before this point are dropped.
    pub fn drop_point(&self) -> EventTime {
        self.watermark.timestamp.saturating_sub(self.discard_age)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn pane(&self, interval: &Interval) -> Option<&TimeIntervalWindowPane<T, P>> {
        self.panes.get(interval)
    }

    pub fn pane_mut(&mut self, interval: &Interval) -> Option<&mut TimeIntervalWindowPane<T, P>> {
        self.panes.get_mut(interval)
    }

    /// Live panes, ordered by interval.
    pub fn panes(&self) -> impl Iterator<Item = &TimeIntervalWindowPane<T, P>> {
        self.panes.values()
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Insert `tuple` into every pane covering `event_time`.
    ///
    /// Insertion is not atomic over panes: if a later pane fails, earlier
    /// panes keep the tuple. A pane created for this tuple is removed again.
    pub fn insert_tuple(
        &mut self,
        tuple: T,
        event_time: EventTime,
        partition: P,
    ) -> Result<InsertOutcome> {
        if event_time < self.drop_point() {
            debug!(
                event_time,
                drop_point = self.drop_point(),
                "dropping tuple older than the discard age"
            );
            return Ok(InsertOutcome::Dropped);
        }
        let late = event_time < self.watermark.timestamp;
        if late {
            debug!(event_time, watermark = %self.watermark, "late tuple");
        }

        let intervals = self.assigner.assign(event_time);
        if intervals.is_empty() {
            return Ok(InsertOutcome::Unassigned);
        }
        for interval in intervals {
            let created = !self.panes.contains_key(&interval);
            let pane = self
                .panes
                .entry(interval)
                .or_insert_with(|| TimeIntervalWindowPane::new(interval, self.discard_age));
            if let Err(e) = pane.insert_tuple(tuple.clone(), partition.clone(), &mut self.handler) {
                if created {
                    self.panes.remove(&interval);
                }
                return Err(e);
            }
        }
        Ok(if late {
            InsertOutcome::Late
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Only watermark markers move the window; other punctuations are ignored.
    pub fn insert_punctuation(&mut self, punct: &Punctuation) -> Result<()> {
        if !punct.is_watermark() {
            trace!(?punct, "ignoring punctuation");
            return Ok(());
        }
        let payload = watermark_payload(punct)?;
        self.insert_watermark(payload.value)
    }

    /// Advance all panes to `wm` and erase the ones that closed.
    pub fn insert_watermark(&mut self, wm: Watermark) -> Result<()> {
        if wm <= self.watermark {
            if wm < self.watermark {
                warn!(watermark = %wm, current = %self.watermark, "ignoring retrograde watermark");
            }
            return Ok(());
        }
        self.watermark = wm;

        let mut closed = Vec::new();
        for (interval, pane) in self.panes.iter_mut() {
            pane.insert_watermark(wm, &mut self.handler)?;
            if pane.state() == PaneState::Closed {
                closed.push(*interval);
            }
        }
        for interval in &closed {
            self.panes.remove(interval);
        }
        if !closed.is_empty() {
            debug!(
                watermark = %wm,
                closed = closed.len(),
                live = self.panes.len(),
                "erased closed panes"
            );
        }
        Ok(())
    }
}

impl<T, P, H> StateHandler for TimeIntervalWindow<T, P, H>
where
    T: StreamData,
    P: StreamData + Ord,
    H: WindowEventHandler<T, P>,
{
    fn checkpoint(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        ckpt.add_i64(self.watermark.timestamp)?;
        ckpt.add_u64(self.panes.len() as u64)?;
        for pane in self.panes.values_mut() {
            pane.checkpoint(ckpt)?;
        }
        self.handler.on_checkpoint(ckpt)
    }

    fn reset(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        let watermark = Watermark::new(ckpt.get_i64()?);
        let count = ckpt.get_u64()?;
        let mut panes = BTreeMap::new();
        for _ in 0..count {
            let pane = TimeIntervalWindowPane::restore(ckpt, self.discard_age)?;
            panes.insert(pane.interval(), pane);
        }
        self.watermark = watermark;
        self.panes = panes;
        self.handler.on_reset(ckpt)?;
        debug!(watermark = %self.watermark, panes = self.panes.len(), "window restored");
        Ok(())
    }

    fn reset_to_initial_state(&mut self) -> Result<()> {
        self.panes.clear();
        self.watermark = Watermark::MIN;
        self.handler.on_reset_to_initial_state()
    }
}
