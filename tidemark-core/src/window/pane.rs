use super::*;

/// The window state of one interval: tuples per partition plus the pane
/// state machine.
///
/// A pane becomes `Complete` when the watermark reaches its end and
/// `Closed` once the watermark reaches `end + discard_age`. Tuples arriving
/// while complete trigger immediately for their partition; a closed pane
/// drops everything.
#[derive(Debug, Clone)]
pub struct TimeIntervalWindowPane<T, P> {
    interval: Interval,
    discard_age: EventTime,
    state: PaneState,
    timing: PaneTiming,
    pane_index: u64,
    /// Tuples arrived since the last trigger.
    fresh: bool,
    partitions: BTreeMap<P, IncrDeque<T>>,
    updated: BTreeSet<P>,
}

impl<T, P> TimeIntervalWindowPane<T, P> {
    pub fn new(interval: Interval, discard_age: EventTime) -> Self {
        Self {
            interval,
            discard_age,
            state: PaneState::Incomplete,
            timing: PaneTiming::Early,
            pane_index: 0,
            fresh: false,
            partitions: BTreeMap::new(),
            updated: BTreeSet::new(),
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn start(&self) -> EventTime {
        self.interval.start()
    }

    pub fn end(&self) -> EventTime {
        self.interval.end()
    }

    pub fn state(&self) -> PaneState {
        self.state
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn trigger_info(&self) -> TriggerInfo {
        TriggerInfo {
            start_time: self.interval.start(),
            end_time: self.interval.end(),
            pane_timing: self.timing,
            pane_index: self.pane_index,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&P, &IncrDeque<T>)> {
        self.partitions.iter()
    }

    /// Total number of tuples over all partitions.
    pub fn len(&self) -> usize {
        self.partitions.values().map(IncrDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(IncrDeque::is_empty)
    }
}

impl<T, P: Ord + Clone> TimeIntervalWindowPane<T, P> {
    pub fn partition(&self, partition: &P) -> Option<&IncrDeque<T>> {
        self.partitions.get(partition)
    }

    pub fn partition_mut(&mut self, partition: &P) -> Option<&mut IncrDeque<T>> {
        self.partitions.get_mut(partition)
    }

    /// Remove a partition. The pane state is not affected.
    pub fn evict_partition(&mut self, partition: &P) -> Option<IncrDeque<T>> {
        self.updated.remove(partition);
        self.partitions.remove(partition)
    }

    /// Store `tuple` in `partition`. Returns false if the pane is closed and
    /// the tuple was dropped.
    pub fn insert_tuple<H>(&mut self, tuple: T, partition: P, handler: &mut H) -> Result<bool>
    where
        H: WindowEventHandler<T, P> + ?Sized,
    {
        if self.state == PaneState::Closed {
            debug!(pane = %self.interval, "pane is closed, dropping tuple");
            return Ok(false);
        }
        handler.before_tuple_insertion(self, &tuple, &partition)?;
        self.partitions
            .entry(partition.clone())
            .or_default()
            .push_back(tuple);
        self.updated.insert(partition.clone());
        self.fresh = true;
        if let Some(stored) = self.partitions.get(&partition).and_then(IncrDeque::back) {
            handler.after_tuple_insertion(self, stored, &partition)?;
        }
        if self.state == PaneState::Complete {
            self.trigger_if_pending(handler)?;
        }
        Ok(true)
    }

    /// Move the pane forward to watermark `wm`.
    pub fn insert_watermark<H>(&mut self, wm: Watermark, handler: &mut H) -> Result<()>
    where
        H: WindowEventHandler<T, P> + ?Sized,
    {
        let t = wm.timestamp;
        if self.state == PaneState::Incomplete && t >= self.interval.end() {
            self.state = PaneState::Complete;
            self.timing = PaneTiming::OnComplete;
            trace!(pane = %self.interval, watermark = t, "pane complete");
            for partition in self.partitions.keys() {
                handler.on_window_initial_full(self, partition)?;
            }
            self.trigger_if_pending(handler)?;
            self.timing = PaneTiming::Late;
        }
        if self.state == PaneState::Complete
            && t >= self.interval.end().saturating_add(self.discard_age)
        {
            for partition in self.partitions.keys() {
                handler.before_window_close(self, partition)?;
            }
            self.state = PaneState::Closed;
            trace!(pane = %self.interval, watermark = t, "pane closed");
        }
        Ok(())
    }

    fn trigger_if_pending<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: WindowEventHandler<T, P> + ?Sized,
    {
        if self.state != PaneState::Complete || !self.fresh {
            return Ok(());
        }
        let updated = std::mem::take(&mut self.updated);
        for partition in &updated {
            handler.on_window_trigger(self, partition)?;
        }
        self.fresh = false;
        self.pane_index += 1;
        Ok(())
    }
}

impl<T: StreamData, P: StreamData + Ord> TimeIntervalWindowPane<T, P> {
    fn partition_key(interval: &Interval, partition: &P) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(interval.start(), interval.end(), partition))?)
    }

    pub(crate) fn checkpoint(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        ckpt.add_i64(self.interval.start())?;
        ckpt.add_i64(self.interval.end())?;
        ckpt.add_value(&self.state)?;
        ckpt.add_value(&self.timing)?;
        ckpt.add_u64(self.pane_index)?;
        ckpt.add_bool(self.fresh)?;
        ckpt.add_u64(self.partitions.len() as u64)?;
        for (partition, tuples) in self.partitions.iter_mut() {
            ckpt.add_value(partition)?;
            ckpt.add_bool(self.updated.contains(partition))?;
            let key = Self::partition_key(&self.interval, partition)?;
            ckpt.add_incremental(&key, tuples)?;
        }
        Ok(())
    }

    pub(crate) fn restore(ckpt: &mut Checkpoint, discard_age: EventTime) -> Result<Self> {
        let start = ckpt.get_i64()?;
        let end = ckpt.get_i64()?;
        let mut pane = Self::new(Interval::new(start, end), discard_age);
        pane.state = ckpt.get_value()?;
        pane.timing = ckpt.get_value()?;
        pane.pane_index = ckpt.get_u64()?;
        pane.fresh = ckpt.get_bool()?;
        let count = ckpt.get_u64()?;
        for _ in 0..count {
            let partition: P = ckpt.get_value()?;
            if ckpt.get_bool()? {
                pane.updated.insert(partition.clone());
            }
            let key = Self::partition_key(&pane.interval, &partition)?;
            let mut tuples = IncrDeque::new();
            ckpt.get_incremental(&key, &mut tuples)?;
            pane.partitions.insert(partition, tuples);
        }
        Ok(pane)
    }
}
