use super::*;

/// A container whose state can be checkpointed as a base record or as a
/// delta against the previous checkpoint.
///
/// Every mutation that is not a plain append must be logged so that
/// [`serialize_delta`](Incremental::serialize_delta) can describe it.
pub trait Incremental {
    /// Write the full contents.
    fn serialize_base(&self, ckpt: &mut Checkpoint) -> Result<()>;

    /// Write the mutation log since the last checkpoint.
    fn serialize_delta(&self, ckpt: &mut Checkpoint) -> Result<()>;

    /// Replace the contents with a base record.
    fn restore_base(&mut self, ckpt: &mut Checkpoint) -> Result<()>;

    /// Replay one delta record on top of the current contents.
    fn apply_delta(&mut self, ckpt: &mut Checkpoint) -> Result<()>;

    /// True until the container has been written or restored once.
    fn needs_base(&self) -> bool;

    /// Forget the mutation log; the current contents become the reference
    /// for the next delta.
    fn reset_log(&mut self);

    /// Turn mutation logging on or off. A container that stops logging
    /// must write a base record next time.
    fn set_logging(&mut self, enabled: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DequeLog {
    /// Length at the last checkpoint.
    old_len: usize,
    /// Front pops of old elements since then.
    popped: usize,
    /// Offsets, relative to the old contents, of erased old elements.
    erased: BTreeSet<usize>,
}

impl DequeLog {
    /// Old elements still present; they always form a prefix of the deque.
    fn old_alive(&self) -> usize {
        self.old_len - self.popped - self.erased.len()
    }

    /// Offset within the old contents of the old element now at `pos`.
    fn old_offset(&self, pos: usize) -> usize {
        let mut candidate = self.popped + pos;
        for &e in &self.erased {
            if e <= candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        candidate
    }
}

/// Double-ended queue that logs its removals for incremental checkpoints.
///
/// Elements are appended at the back only, so everything that survived the
/// last checkpoint sits in front of everything pushed since.
///
/// Delta record layout: `u64 len, u64 popped, u64 erase count, u64 offsets...,
/// u64 push count, values...`.
#[derive(Debug, Clone)]
pub struct IncrDeque<T> {
    items: VecDeque<T>,
    log: DequeLog,
    logging: bool,
    needs_base: bool,
}

impl<T> Default for IncrDeque<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            log: DequeLog::default(),
            logging: true,
            needs_base: true,
        }
    }
}

impl<T: PartialEq> PartialEq for IncrDeque<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T> IncrDeque<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&T> {
        self.items.get(pos)
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn push_back(&mut self, value: T) {
        self.items.push_back(value);
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let value = self.items.pop_front()?;
        if !self.logging {
            return Some(value);
        }
        // With no old elements left the front was pushed since the last
        // checkpoint and simply never makes it into the delta.
        if self.log.old_alive() > 0 {
            self.log.popped += 1;
        }
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let last = self.items.len().checked_sub(1)?;
        self.erase(last)
    }

    /// Remove the element at `pos`.
    pub fn erase(&mut self, pos: usize) -> Option<T> {
        if pos >= self.items.len() {
            return None;
        }
        if self.logging && pos < self.log.old_alive() {
            let offset = self.log.old_offset(pos);
            self.log.erased.insert(offset);
        }
        self.items.remove(pos)
    }

    pub fn clear(&mut self) {
        if self.logging {
            self.log.popped += self.log.old_alive();
        }
        self.items.clear();
    }

    pub fn is_logging(&self) -> bool {
        self.logging
    }

    /// Number of old elements removed since the last checkpoint.
    pub fn logged_removals(&self) -> usize {
        self.log.popped + self.log.erased.len()
    }
}

impl<T> FromIterator<T> for IncrDeque<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl<T> Extend<T> for IncrDeque<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T: Serialize + DeserializeOwned> Incremental for IncrDeque<T> {
    fn serialize_base(&self, ckpt: &mut Checkpoint) -> Result<()> {
        ckpt.add_u64(self.items.len() as u64)?;
        for item in &self.items {
            ckpt.add_value(item)?;
        }
        Ok(())
    }

    fn serialize_delta(&self, ckpt: &mut Checkpoint) -> Result<()> {
        let old_alive = self.log.old_alive();
        ckpt.add_u64(self.items.len() as u64)?;
        ckpt.add_u64(self.log.popped as u64)?;
        ckpt.add_u64(self.log.erased.len() as u64)?;
        for &offset in &self.log.erased {
            ckpt.add_u64(offset as u64)?;
        }
        ckpt.add_u64((self.items.len() - old_alive) as u64)?;
        for item in self.items.iter().skip(old_alive) {
            ckpt.add_value(item)?;
        }
        Ok(())
    }

    fn restore_base(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        let len = ckpt.get_u64()?;
        let mut items = VecDeque::new();
        for _ in 0..len {
            items.push_back(ckpt.get_value()?);
        }
        self.items = items;
        self.needs_base = false;
        self.reset_log();
        Ok(())
    }

    fn apply_delta(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        let expected_len = ckpt.get_u64()? as usize;
        let popped = ckpt.get_u64()? as usize;
        let erase_count = ckpt.get_u64()?;
        let mut erased = Vec::new();
        for _ in 0..erase_count {
            erased.push(ckpt.get_u64()? as usize);
        }
        let push_count = ckpt.get_u64()?;
        let mut pushed = Vec::new();
        for _ in 0..push_count {
            pushed.push(ckpt.get_value()?);
        }

        // Ascending offsets; the i-th erase sees i earlier removals.
        for (i, offset) in erased.into_iter().enumerate() {
            let pos = offset.checked_sub(i).filter(|&p| p < self.items.len());
            let pos = pos.ok_or_else(|| {
                Error::corrupt(format!("erase offset {offset} out of range in delta"))
            })?;
            self.items.remove(pos);
        }
        if popped > self.items.len() {
            return Err(Error::corrupt(format!(
                "delta pops {popped} of {} elements",
                self.items.len()
            )));
        }
        self.items.drain(..popped);
        self.items.extend(pushed);

        if self.items.len() != expected_len {
            return Err(Error::corrupt(format!(
                "delta replay produced {} elements, expected {expected_len}",
                self.items.len()
            )));
        }
        self.needs_base = false;
        self.reset_log();
        Ok(())
    }

    fn needs_base(&self) -> bool {
        self.needs_base
    }

    fn reset_log(&mut self) {
        self.log = DequeLog {
            old_len: self.items.len(),
            popped: 0,
            erased: BTreeSet::new(),
        };
        self.needs_base = false;
    }

    fn set_logging(&mut self, enabled: bool) {
        if enabled && !self.logging {
            self.log = DequeLog {
                old_len: self.items.len(),
                ..DequeLog::default()
            };
        }
        if !enabled {
            self.needs_base = true;
        }
        self.logging = enabled;
    }
}
