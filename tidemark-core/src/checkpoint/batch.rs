use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Error,
}

struct BatchInner {
    state: BatchState,
    seq_id: CheckpointId,
    staged: Vec<(String, StoredBuffer)>,
}

/// Checkpoint writes of one consistent-region cut, committed or aborted
/// together.
pub struct CheckpointBatch {
    store: Arc<dyn DataStore>,
    retry: RetryPolicy,
    inner: Mutex<BatchInner>,
}

impl CheckpointBatch {
    pub fn new(store: Arc<dyn DataStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            inner: Mutex::new(BatchInner {
                state: BatchState::Open,
                seq_id: 0,
                staged: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BatchInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::invalid_state("checkpoint batch lock poisoned"))
    }

    /// Start collecting writes for `seq_id`, discarding anything staged before.
    pub fn begin(&self, seq_id: CheckpointId) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.staged.is_empty() {
            warn!(
                seq_id = inner.seq_id,
                staged = inner.staged.len(),
                "discarding uncommitted batch writes"
            );
        }
        inner.state = BatchState::Open;
        inner.seq_id = seq_id;
        inner.staged.clear();
        Ok(())
    }

    pub fn stage(&self, key: String, buffer: StoredBuffer) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == BatchState::Error {
            return Err(Error::invalid_state(format!(
                "batch {} is in error state",
                inner.seq_id
            )));
        }
        inner.staged.push((key, buffer));
        Ok(())
    }

    pub fn mark_error(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = BatchState::Error;
        }
    }

    /// Write every staged buffer under a temporary key, then rename them all
    /// into place. Data keys are renamed last.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == BatchState::Error {
            return Err(Error::invalid_state(format!(
                "cannot commit batch {} in error state",
                inner.seq_id
            )));
        }
        let mut staged = std::mem::take(&mut inner.staged);
        staged.sort_by_key(|(key, _)| !(key.ends_with(".delta") || key.ends_with(".index")));

        match self.write_all(&staged) {
            Ok(()) => {
                debug!(seq_id = inner.seq_id, buffers = staged.len(), "batch committed");
                Ok(())
            }
            Err(e) => {
                for (key, _) in &staged {
                    let tmp = CheckpointKeys::temporary(key);
                    if let Err(rm) = self.store.remove(&tmp) {
                        debug!(key = %tmp, error = %rm, "failed to remove temporary batch key");
                    }
                }
                inner.state = BatchState::Error;
                Err(e)
            }
        }
    }

    fn write_all(&self, staged: &[(String, StoredBuffer)]) -> Result<()> {
        for (key, buffer) in staged {
            let tmp = CheckpointKeys::temporary(key);
            self.retry
                .run("stage batch buffer", || self.store.put(&tmp, buffer.clone()))?;
        }
        for (key, _) in staged {
            let tmp = CheckpointKeys::temporary(key);
            self.retry
                .run("commit batch buffer", || self.store.rename(&tmp, key))?;
        }
        Ok(())
    }

    /// Drop all staged writes.
    pub fn abort(&self) -> Result<()> {
        let mut inner = self.lock()?;
        debug!(seq_id = inner.seq_id, dropped = inner.staged.len(), "batch aborted");
        inner.staged.clear();
        Ok(())
    }

    pub fn state(&self) -> BatchState {
        self.inner
            .lock()
            .map(|i| i.state)
            .unwrap_or(BatchState::Error)
    }

    pub fn seq_id(&self) -> CheckpointId {
        self.inner.lock().map(|i| i.seq_id).unwrap_or(0)
    }

    pub fn staged_len(&self) -> usize {
        self.inner.lock().map(|i| i.staged.len()).unwrap_or(0)
    }
}
