use super::*;

/// Whether a [`Checkpoint`] is being written or restored from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Write,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    Open,
    Finished,
    Error,
}

/// Delta buffers and decoded index tables of the checkpoints visited while
/// restoring an incremental chain.
///
/// One cache is shared by the checkpoint being restored and every chained
/// checkpoint derived from it, so each buffer is fetched from the store once.
#[derive(Default)]
pub struct CheckpointBufferCache {
    deltas: Mutex<AHashMap<CheckpointId, ByteBuffer>>,
    indexes: Mutex<AHashMap<CheckpointId, Arc<IndexTable>>>,
}

impl CheckpointBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(
        &self,
        store: &dyn DataStore,
        keys: &CheckpointKeys,
        id: CheckpointId,
        retry: &RetryPolicy,
    ) -> Result<ByteBuffer> {
        let mut deltas = self
            .deltas
            .lock()
            .map_err(|_| Error::invalid_state("delta cache lock poisoned"))?;
        if let Some(buf) = deltas.get(&id) {
            return Ok(buf.clone());
        }
        let key = keys.delta_key(id);
        let stored = retry.run("load delta buffer", || store.get(&key))?;
        let buf = ByteBuffer::from_vec(stored.data);
        deltas.insert(id, buf.clone());
        Ok(buf)
    }

    pub fn index(
        &self,
        store: &dyn DataStore,
        keys: &CheckpointKeys,
        id: CheckpointId,
        retry: &RetryPolicy,
    ) -> Result<Arc<IndexTable>> {
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|_| Error::invalid_state("index cache lock poisoned"))?;
        if let Some(table) = indexes.get(&id) {
            return Ok(table.clone());
        }
        let key = keys.index_key(id);
        let stored = match retry.run("load index buffer", || store.get(&key)) {
            Ok(stored) => stored,
            Err(Error::NotFound { .. }) => {
                return Err(Error::corrupt(format!(
                    "checkpoint {id} of {} has no index buffer",
                    keys.entry()
                )));
            }
            Err(e) => return Err(e),
        };
        let table = Arc::new(IndexTable::decode(ByteBuffer::from_vec(stored.data))?);
        indexes.insert(id, table.clone());
        Ok(table)
    }

    /// Number of cached delta and index buffers.
    pub fn len(&self) -> usize {
        let deltas = self.deltas.lock().map(|d| d.len()).unwrap_or(0);
        let indexes = self.indexes.lock().map(|i| i.len()).unwrap_or(0);
        deltas + indexes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut deltas) = self.deltas.lock() {
            deltas.clear();
        }
        if let Ok(mut indexes) = self.indexes.lock() {
            indexes.clear();
        }
    }
}

/// One checkpoint of one entry.
///
/// In write mode `add_*` calls append to the normal buffer, or to the delta
/// buffer while incremental mode is on; [`finish_checkpointing`] seals and
/// persists them. In read mode the matching `get_*` calls consume the same
/// sequence.
///
/// [`finish_checkpointing`]: Checkpoint::finish_checkpointing
pub struct Checkpoint {
    store: Arc<dyn DataStore>,
    keys: CheckpointKeys,
    id: CheckpointId,
    mode: CheckpointMode,
    state: CheckpointState,
    metadata: CheckpointMetadata,
    previous: Option<CheckpointId>,
    norm: ByteBuffer,
    delta: Option<ByteBuffer>,
    index_entries: Vec<IndexEntry>,
    incremental_mode: bool,
    batch: Option<Arc<CheckpointBatch>>,
    cache: Arc<CheckpointBufferCache>,
    owns_cache: bool,
    retry: RetryPolicy,
}

impl Checkpoint {
    /// Start writing checkpoint `id`. `previous` is the checkpoint this one
    /// extends; it must be `None` for a base (`metadata.counter == 0`).
    pub fn create(
        store: Arc<dyn DataStore>,
        keys: CheckpointKeys,
        id: CheckpointId,
        metadata: CheckpointMetadata,
        previous: Option<CheckpointId>,
    ) -> Self {
        let previous = if metadata.counter == 0 { None } else { previous };
        Self {
            store,
            keys,
            id,
            mode: CheckpointMode::Write,
            state: CheckpointState::Open,
            metadata,
            previous,
            norm: ByteBuffer::new(),
            delta: Some(ByteBuffer::new()),
            index_entries: Vec::new(),
            incremental_mode: false,
            batch: None,
            cache: Arc::new(CheckpointBufferCache::new()),
            owns_cache: true,
            retry: RetryPolicy::none(),
        }
    }

    /// Open the committed checkpoint `id` for restore.
    pub fn open(
        store: Arc<dyn DataStore>,
        keys: CheckpointKeys,
        id: CheckpointId,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let key = keys.data_key(id);
        let stored = retry.run("open checkpoint", || store.get(&key))?;
        let metadata = CheckpointMetadata::decode(&stored.metadata)?;
        trace!(entry = keys.entry(), id, ?metadata, "opened checkpoint");
        Ok(Self {
            store,
            keys,
            id,
            mode: CheckpointMode::Read,
            state: CheckpointState::Open,
            metadata,
            previous: None,
            norm: ByteBuffer::from_vec(stored.data),
            delta: None,
            index_entries: Vec::new(),
            incremental_mode: false,
            batch: None,
            cache: Arc::new(CheckpointBufferCache::new()),
            owns_cache: true,
            retry,
        })
    }

    /// Stage the buffers into `batch` on finish instead of writing them.
    pub fn with_batch(mut self, batch: Option<Arc<CheckpointBatch>>) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Preallocate the normal and delta buffers.
    pub fn with_capacity(mut self, norm: usize, delta: usize) -> Self {
        if self.mode == CheckpointMode::Write {
            self.norm = ByteBuffer::with_capacity(norm);
            self.delta = Some(ByteBuffer::with_capacity(delta));
        }
        self
    }

    pub fn id(&self) -> CheckpointId {
        self.id
    }

    pub fn entry(&self) -> &str {
        self.keys.entry()
    }

    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    pub fn metadata(&self) -> CheckpointMetadata {
        self.metadata
    }

    pub fn base_id(&self) -> CheckpointId {
        self.metadata.base_id
    }

    pub fn counter(&self) -> i64 {
        self.metadata.counter
    }

    pub fn incremental_interval(&self) -> u32 {
        self.metadata.incremental_interval
    }

    /// A base checkpoint carries full state for every container.
    pub fn is_base(&self) -> bool {
        self.metadata.counter == 0
    }

    pub fn has_incremental(&self) -> bool {
        self.metadata.has_incremental
    }

    /// Containers only need to keep a mutation log when deltas can follow.
    pub fn should_enable_logging(&self) -> bool {
        self.metadata.incremental_interval > 1
    }

    pub fn norm_size(&self) -> usize {
        self.norm.len()
    }

    pub fn delta_size(&self) -> usize {
        self.delta.as_ref().map_or(0, ByteBuffer::len)
    }

    pub fn index_len(&self) -> usize {
        self.index_entries.len()
    }

    pub fn set_incremental_mode(&mut self, on: bool) {
        self.incremental_mode = on;
    }

    pub fn is_incremental_mode(&self) -> bool {
        self.incremental_mode
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.state != CheckpointState::Error {
            debug!(entry = self.keys.entry(), id = self.id, error = %err, "checkpoint failed");
        }
        self.state = CheckpointState::Error;
        if let Some(batch) = &self.batch {
            batch.mark_error();
        }
        err
    }

    fn ensure(&mut self, mode: CheckpointMode) -> Result<()> {
        if self.mode != mode {
            let err = Error::invalid_state(format!(
                "checkpoint {} is opened for {:?}",
                self.id, self.mode
            ));
            return Err(self.fail(err));
        }
        if self.state != CheckpointState::Open {
            return Err(Error::invalid_state(format!(
                "checkpoint {} is {:?}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn write(&mut self, f: impl FnOnce(&mut ByteBuffer) -> Result<()>) -> Result<()> {
        self.ensure(CheckpointMode::Write)?;
        let res = if self.incremental_mode {
            f(self.delta.get_or_insert_with(ByteBuffer::new))
        } else {
            f(&mut self.norm)
        };
        res.map_err(|e| self.fail(e))
    }

    fn read<T>(&mut self, f: impl FnOnce(&mut ByteBuffer) -> Result<T>) -> Result<T> {
        self.ensure(CheckpointMode::Read)?;
        let res = if self.incremental_mode {
            match self.delta.as_mut() {
                Some(delta) => f(delta),
                None => Err(Error::invalid_state(
                    "incremental reads outside a chained checkpoint",
                )),
            }
        } else {
            f(&mut self.norm)
        };
        res.map_err(|e| self.fail(e))
    }

    // ── Typed accessors ─────────────────────────────────────────────────

    pub fn add_bool(&mut self, v: bool) -> Result<()> {
        self.write(|b| {
            b.put_bool(v);
            Ok(())
        })
    }

    pub fn add_u8(&mut self, v: u8) -> Result<()> {
        self.write(|b| {
            b.put_u8(v);
            Ok(())
        })
    }

    pub fn add_i32(&mut self, v: i32) -> Result<()> {
        self.write(|b| {
            b.put_i32(v);
            Ok(())
        })
    }

    pub fn add_u32(&mut self, v: u32) -> Result<()> {
        self.write(|b| {
            b.put_u32(v);
            Ok(())
        })
    }

    pub fn add_i64(&mut self, v: i64) -> Result<()> {
        self.write(|b| {
            b.put_i64(v);
            Ok(())
        })
    }

    pub fn add_u64(&mut self, v: u64) -> Result<()> {
        self.write(|b| {
            b.put_u64(v);
            Ok(())
        })
    }

    pub fn add_f64(&mut self, v: f64) -> Result<()> {
        self.write(|b| {
            b.put_f64(v);
            Ok(())
        })
    }

    pub fn add_string(&mut self, v: &str) -> Result<()> {
        self.write(|b| {
            b.put_string(v);
            Ok(())
        })
    }

    pub fn add_blob(&mut self, v: &[u8]) -> Result<()> {
        self.write(|b| {
            b.put_blob(v);
            Ok(())
        })
    }

    /// Any serde value, bincode encoded.
    pub fn add_value<T: Serialize + ?Sized>(&mut self, v: &T) -> Result<()> {
        self.write(|b| b.put_value(v))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.read(ByteBuffer::get_bool)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.read(ByteBuffer::get_u8)
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.read(ByteBuffer::get_i32)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.read(ByteBuffer::get_u32)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.read(ByteBuffer::get_i64)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.read(ByteBuffer::get_u64)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.read(ByteBuffer::get_f64)
    }

    pub fn get_string(&mut self) -> Result<String> {
        self.read(ByteBuffer::get_string)
    }

    pub fn get_blob(&mut self) -> Result<Vec<u8>> {
        self.read(ByteBuffer::get_blob)
    }

    pub fn get_value<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.read(ByteBuffer::get_value)
    }

    // ── Incremental containers ──────────────────────────────────────────

    /// Write `container` under `key`: full contents on a base checkpoint or
    /// when the container has never been written, its mutation log otherwise.
    pub fn add_incremental<C: Incremental + ?Sized>(
        &mut self,
        key: &[u8],
        container: &mut C,
    ) -> Result<()> {
        self.ensure(CheckpointMode::Write)?;
        let kind = if self.is_base() || container.needs_base() {
            RecordKind::Base
        } else {
            RecordKind::Delta
        };
        let offset = self.delta_size() as u64;
        let saved_mode = self.incremental_mode;
        self.incremental_mode = true;
        let res = match kind {
            RecordKind::Base => container.serialize_base(self),
            RecordKind::Delta => container.serialize_delta(self),
        };
        self.incremental_mode = saved_mode;
        res.map_err(|e| self.fail(e))?;
        self.index_entries.push(IndexEntry {
            key: key.to_vec(),
            kind,
            offset,
        });
        container.reset_log();
        container.set_logging(self.should_enable_logging());
        Ok(())
    }

    /// Restore `container` from the record stored under `key`: the most
    /// recent base record in the chain, then every later delta in order.
    pub fn get_incremental<C: Incremental + ?Sized>(
        &mut self,
        key: &[u8],
        container: &mut C,
    ) -> Result<()> {
        self.ensure(CheckpointMode::Read)?;
        let res = self.restore_container(key, container);
        res.map_err(|e| self.fail(e))
    }

    fn restore_container<C: Incremental + ?Sized>(
        &self,
        key: &[u8],
        container: &mut C,
    ) -> Result<()> {
        if !self.metadata.has_incremental {
            return Err(Error::corrupt(format!(
                "checkpoint {} has no incremental data",
                self.id
            )));
        }
        let mut records = Vec::new();
        let mut cursor = Some(self.id);
        loop {
            let id = cursor.ok_or_else(|| {
                Error::corrupt(format!("no base record for key {key:?} before {}", self.id))
            })?;
            if id < self.metadata.base_id {
                return Err(Error::corrupt(format!(
                    "chain of {} walked past its base {}",
                    self.id, self.metadata.base_id
                )));
            }
            let index = self
                .cache
                .index(self.store.as_ref(), &self.keys, id, &self.retry)?;
            let (kind, offset) = index.get(key).ok_or_else(|| {
                Error::corrupt(format!("checkpoint {id} has no record for key {key:?}"))
            })?;
            records.push((id, kind, offset));
            if kind == RecordKind::Base {
                break;
            }
            cursor = index.previous;
        }

        for (id, kind, offset) in records.into_iter().rev() {
            let mut link = self.chained(id, offset)?;
            match kind {
                RecordKind::Base => container.restore_base(&mut link)?,
                RecordKind::Delta => container.apply_delta(&mut link)?,
            }
        }
        container.reset_log();
        container.set_logging(self.should_enable_logging());
        Ok(())
    }

    /// Read-mode checkpoint positioned at `offset` of the delta buffer of
    /// `id`, sharing this checkpoint's buffer cache.
    fn chained(&self, id: CheckpointId, offset: u64) -> Result<Checkpoint> {
        let mut delta = self
            .cache
            .delta(self.store.as_ref(), &self.keys, id, &self.retry)?;
        let offset = usize::try_from(offset)
            .map_err(|_| Error::corrupt("record offset exceeds address space"))?;
        delta.set_read_pos(offset)?;
        Ok(Checkpoint {
            store: self.store.clone(),
            keys: self.keys.clone(),
            id,
            mode: CheckpointMode::Read,
            state: CheckpointState::Open,
            metadata: self.metadata,
            previous: None,
            norm: ByteBuffer::new(),
            delta: Some(delta),
            index_entries: Vec::new(),
            incremental_mode: true,
            batch: None,
            cache: self.cache.clone(),
            owns_cache: false,
            retry: self.retry,
        })
    }

    // ── Finish ──────────────────────────────────────────────────────────

    /// Seal the normal buffer with the checkpoint metadata and persist all
    /// buffers, or stage them into the batch when one is attached.
    pub fn finish_checkpointing(&mut self) -> Result<()> {
        self.ensure(CheckpointMode::Write)?;
        let res = self.persist();
        res.map_err(|e| self.fail(e))?;
        self.state = CheckpointState::Finished;
        debug!(
            entry = self.keys.entry(),
            id = self.id,
            base_id = self.metadata.base_id,
            counter = self.metadata.counter,
            norm = self.norm.len(),
            delta = self.delta_size(),
            "checkpoint finished"
        );
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let has_incremental =
            self.metadata.incremental_interval > 1 || !self.index_entries.is_empty();
        self.metadata.has_incremental = has_incremental;

        let mut buffers = Vec::with_capacity(3);
        if has_incremental {
            let delta = self
                .delta
                .as_ref()
                .map(ByteBuffer::to_vec)
                .unwrap_or_default();
            buffers.push((
                self.keys.delta_key(self.id),
                StoredBuffer::new(Vec::new(), delta),
            ));
            let index = IndexTable::encode(self.previous, &self.index_entries);
            buffers.push((
                self.keys.index_key(self.id),
                StoredBuffer::new(Vec::new(), index.to_vec()),
            ));
        }
        buffers.push((
            self.keys.data_key(self.id),
            StoredBuffer::new(self.metadata.encode().to_vec(), self.norm.to_vec()),
        ));

        if let Some(batch) = &self.batch {
            for (key, buffer) in buffers {
                batch.stage(key, buffer)?;
            }
            return Ok(());
        }

        for (key, buffer) in &buffers {
            let tmp = CheckpointKeys::temporary(key);
            self.retry
                .run("write checkpoint buffer", || self.store.put(&tmp, buffer.clone()))?;
        }
        for (key, _) in &buffers {
            let tmp = CheckpointKeys::temporary(key);
            self.retry
                .run("commit checkpoint buffer", || self.store.rename(&tmp, key))?;
        }
        Ok(())
    }
}

impl Drop for Checkpoint {
    fn drop(&mut self) {
        if self.mode == CheckpointMode::Write && self.state != CheckpointState::Finished {
            if let Some(batch) = &self.batch {
                batch.mark_error();
            } else {
                for key in self.keys.all_keys(self.id) {
                    let tmp = CheckpointKeys::temporary(&key);
                    if let Err(e) = self.store.remove(&tmp) {
                        debug!(key = %tmp, error = %e, "failed to remove temporary checkpoint key");
                    }
                }
            }
        }
        if self.owns_cache {
            self.cache.clear();
        }
    }
}
