use super::*;

/// Operator state that can be saved to and restored from a checkpoint.
pub trait StateHandler {
    fn checkpoint(&mut self, ckpt: &mut Checkpoint) -> Result<()>;
    fn reset(&mut self, ckpt: &mut Checkpoint) -> Result<()>;
    fn reset_to_initial_state(&mut self) -> Result<()>;
}

/// Decides where each checkpoint sits in its incremental chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSetter {
    interval: u32,
}

impl IntervalSetter {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Metadata for checkpoint `id`, given the chain position of the last
    /// checkpoint (`None` starts a new chain).
    pub fn next(&self, id: CheckpointId, last: Option<(CheckpointId, i64)>) -> CheckpointMetadata {
        match last {
            Some((base_id, counter)) if counter + 1 < i64::from(self.interval) => {
                CheckpointMetadata {
                    has_incremental: false,
                    base_id,
                    counter: counter + 1,
                    incremental_interval: self.interval,
                }
            }
            _ => CheckpointMetadata::base(id, self.interval),
        }
    }
}

/// Checkpoint bookkeeping of one operator: chain position, retry policy and
/// lazy deletion of checkpoints that later deltas still depend on.
pub struct CheckpointContext {
    store: Arc<dyn DataStore>,
    keys: CheckpointKeys,
    retry: RetryPolicy,
    setter: IntervalSetter,
    last_id: Option<CheckpointId>,
    current_base: Option<CheckpointId>,
    counter: i64,
    force_base: bool,
    deleted: BTreeSet<CheckpointId>,
}

impl CheckpointContext {
    pub fn new(store: Arc<dyn DataStore>, entry: impl Into<String>) -> Self {
        Self {
            store,
            keys: CheckpointKeys::new(entry),
            retry: RetryPolicy::none(),
            setter: IntervalSetter::new(1),
            last_id: None,
            current_base: None,
            counter: 0,
            force_base: true,
            deleted: BTreeSet::new(),
        }
    }

    pub fn with_incremental_interval(mut self, interval: u32) -> Self {
        self.setter = IntervalSetter::new(interval);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn keys(&self) -> &CheckpointKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn last_checkpoint_id(&self) -> Option<CheckpointId> {
        self.last_id
    }

    pub fn current_base(&self) -> Option<CheckpointId> {
        self.current_base
    }

    pub fn incremental_interval(&self) -> u32 {
        self.setter.interval()
    }

    /// Checkpoint `handler` as checkpoint `id`.
    pub fn create_checkpoint<H: StateHandler + ?Sized>(
        &mut self,
        id: CheckpointId,
        handler: &mut H,
        batch: Option<Arc<CheckpointBatch>>,
    ) -> Result<CheckpointMetadata> {
        let last = match (self.force_base, self.current_base) {
            (false, Some(base)) => Some((base, self.counter)),
            _ => None,
        };
        let metadata = self.setter.next(id, last);
        let mut ckpt = Checkpoint::create(
            self.store.clone(),
            self.keys.clone(),
            id,
            metadata,
            self.last_id,
        )
        .with_retry(self.retry)
        .with_batch(batch);

        let res = handler
            .checkpoint(&mut ckpt)
            .and_then(|_| ckpt.finish_checkpointing());
        if let Err(e) = res {
            self.force_base = true;
            return Err(e);
        }

        self.last_id = Some(id);
        self.current_base = Some(metadata.base_id);
        self.counter = metadata.counter;
        self.force_base = false;
        info!(
            entry = self.keys.entry(),
            id,
            base_id = metadata.base_id,
            counter = metadata.counter,
            "checkpoint created"
        );

        if !self.deleted.is_empty() {
            if let Err(e) = self.collect_garbage() {
                warn!(entry = self.keys.entry(), error = %e, "deferred checkpoint deletion failed");
            }
        }
        Ok(ckpt.metadata())
    }

    /// Restore `handler` from checkpoint `id`; the next checkpoint continues
    /// the chain from there.
    pub fn restore_checkpoint<H: StateHandler + ?Sized>(
        &mut self,
        id: CheckpointId,
        handler: &mut H,
    ) -> Result<CheckpointMetadata> {
        let mut ckpt = Checkpoint::open(self.store.clone(), self.keys.clone(), id, self.retry)?;
        handler.reset(&mut ckpt)?;
        let metadata = ckpt.metadata();
        self.last_id = Some(id);
        self.current_base = Some(metadata.base_id);
        self.counter = metadata.counter;
        self.force_base = false;
        info!(entry = self.keys.entry(), id, base_id = metadata.base_id, "checkpoint restored");
        Ok(metadata)
    }

    pub fn reset_to_initial_state<H: StateHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<()> {
        handler.reset_to_initial_state()?;
        self.last_id = None;
        self.current_base = None;
        self.counter = 0;
        self.force_base = true;
        info!(entry = self.keys.entry(), "reset to initial state");
        Ok(())
    }

    pub fn read_metadata(&self, id: CheckpointId) -> Result<CheckpointMetadata> {
        let key = self.keys.data_key(id);
        let stored = self.retry.run("read checkpoint metadata", || self.store.get(&key))?;
        CheckpointMetadata::decode(&stored.metadata)
    }

    /// Committed checkpoints with their sealed metadata, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<(CheckpointId, CheckpointMetadata)>> {
        let keys = self
            .retry
            .run("list checkpoints", || self.store.list(&self.keys.prefix()))?;
        let mut ids: Vec<CheckpointId> = keys
            .iter()
            .filter_map(|k| self.keys.parse_data_key(k))
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| Ok((id, self.read_metadata(id)?)))
            .collect()
    }

    /// Newest committed checkpoint that has not been deleted.
    pub fn latest_checkpoint_id(&self) -> Result<Option<CheckpointId>> {
        Ok(self
            .list_checkpoints()?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !self.deleted.contains(id))
            .max())
    }

    /// Mark checkpoint `id` deleted. Its buffers are removed once every
    /// member of its chain is deleted and the chain is no longer extended.
    pub fn delete_checkpoint(&mut self, id: CheckpointId) -> Result<()> {
        match self.read_metadata(id) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => {
                debug!(entry = self.keys.entry(), id, "checkpoint to delete does not exist");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.deleted.insert(id);
        self.collect_garbage()
    }

    pub fn delete_checkpoints_prior_to(&mut self, id: CheckpointId) -> Result<()> {
        for (existing, _) in self.list_checkpoints()? {
            if existing < id {
                self.deleted.insert(existing);
            }
        }
        self.collect_garbage()
    }

    /// Ids marked deleted whose buffers are still retained.
    pub fn pending_deletions(&self) -> Vec<CheckpointId> {
        self.deleted.iter().copied().collect()
    }

    fn collect_garbage(&mut self) -> Result<()> {
        let mut chains: BTreeMap<CheckpointId, Vec<CheckpointId>> = BTreeMap::new();
        for (id, metadata) in self.list_checkpoints()? {
            chains.entry(metadata.base_id).or_default().push(id);
        }
        self.deleted
            .retain(|id| chains.values().any(|members| members.contains(id)));
        for (base_id, members) in chains {
            if Some(base_id) == self.current_base {
                continue;
            }
            if !members.iter().all(|id| self.deleted.contains(id)) {
                continue;
            }
            // Data key first, so a half-deleted chain is no longer listed.
            for id in members {
                for key in self.keys.all_keys(id) {
                    self.retry
                        .run("delete checkpoint buffer", || self.store.remove(&key))?;
                }
                self.deleted.remove(&id);
                debug!(entry = self.keys.entry(), id, base_id, "checkpoint deleted");
            }
        }
        Ok(())
    }
}
