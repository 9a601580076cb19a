use super::*;

// ── Collaborator interfaces ─────────────────────────────────────────────

/// Coordinator of a consistent region, consulted before each checkpoint and
/// reset and told when they complete.
pub trait ConsistentRegionService: Send + Sync {
    fn should_proceed_with_checkpoint(&self, region_id: u32, seq_id: CheckpointId) -> bool;
    fn checkpoint_completed(&self, region_id: u32, seq_id: CheckpointId);
    fn should_proceed_with_reset(&self, region_id: u32, seq_id: CheckpointId, attempt: u32) -> bool;
    fn reset_completed(&self, region_id: u32, seq_id: CheckpointId, attempt: u32);
}

/// The processing element hosting the operators.
pub trait ProcessingElement: Send + Sync {
    fn is_shutdown_requested(&self) -> bool;
    fn handle_operator_failure(&self, message: &str);
    fn shutdown_from_within_operators(&self);
}

/// An operator that checkpoint work items can act on.
pub trait CheckpointTarget: Send + Sync {
    fn name(&self) -> &str;
    fn region_id(&self) -> u32;
    fn create_checkpoint(
        &self,
        seq_id: CheckpointId,
        batch: Option<Arc<CheckpointBatch>>,
    ) -> Result<()>;
    /// Restore checkpoint `seq_id`, or the initial state when `seq_id` is 0.
    fn reset(&self, seq_id: CheckpointId, attempt: u32) -> Result<()>;
}

/// Operator state plus its checkpoint context behind one lock.
pub struct OperatorHandle<S> {
    name: String,
    region_id: u32,
    inner: Mutex<(CheckpointContext, S)>,
}

impl<S: StateHandler> OperatorHandle<S> {
    pub fn new(
        name: impl Into<String>,
        region_id: u32,
        context: CheckpointContext,
        state: S,
    ) -> Self {
        Self {
            name: name.into(),
            region_id,
            inner: Mutex::new((context, state)),
        }
    }

    /// Run `f` with the operator state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::invalid_state("operator lock poisoned"))?;
        Ok(f(&mut inner.1))
    }

    pub fn with_context<R>(&self, f: impl FnOnce(&mut CheckpointContext) -> R) -> Result<R> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::invalid_state("operator lock poisoned"))?;
        Ok(f(&mut inner.0))
    }
}

impl<S: StateHandler + Send> CheckpointTarget for OperatorHandle<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn region_id(&self) -> u32 {
        self.region_id
    }

    fn create_checkpoint(
        &self,
        seq_id: CheckpointId,
        batch: Option<Arc<CheckpointBatch>>,
    ) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::invalid_state("operator lock poisoned"))?;
        let (context, state) = &mut *inner;
        context.create_checkpoint(seq_id, state, batch)?;
        Ok(())
    }

    fn reset(&self, seq_id: CheckpointId, _attempt: u32) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::invalid_state("operator lock poisoned"))?;
        let (context, state) = &mut *inner;
        if seq_id == 0 {
            context.reset_to_initial_state(state)
        } else {
            context.restore_checkpoint(seq_id, state).map(|_| ())
        }
    }
}

// ── Work items ──────────────────────────────────────────────────────────

/// Everything a worker needs besides its own [`WorkerContext`].
#[derive(Clone)]
pub struct Services {
    pub region: Arc<dyn ConsistentRegionService>,
    pub pe: Arc<dyn ProcessingElement>,
    pub store: Arc<dyn DataStore>,
    pub retry: RetryPolicy,
}

/// Per-worker state: one batch per consistent region and the sequence id it
/// was last begun for.
#[derive(Default)]
pub struct WorkerContext {
    regions: AHashMap<u32, (Arc<CheckpointBatch>, CheckpointId)>,
}

impl WorkerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch of `region_id`, if it is currently collecting for `seq_id`.
    pub fn batch(&self, region_id: u32, seq_id: CheckpointId) -> Option<Arc<CheckpointBatch>> {
        self.regions
            .get(&region_id)
            .filter(|(_, current)| *current == seq_id)
            .map(|(batch, _)| batch.clone())
    }

    pub fn current_seq_id(&self, region_id: u32) -> Option<CheckpointId> {
        self.regions.get(&region_id).map(|(_, seq)| *seq)
    }
}

#[derive(Clone)]
pub enum WorkItem {
    Creation {
        target: Arc<dyn CheckpointTarget>,
        seq_id: CheckpointId,
    },
    Reset {
        target: Arc<dyn CheckpointTarget>,
        seq_id: CheckpointId,
        attempt: u32,
    },
    Begin {
        region_id: u32,
        seq_id: CheckpointId,
    },
    Commit {
        region_id: u32,
        seq_id: CheckpointId,
    },
    Abort {
        region_id: u32,
        seq_id: CheckpointId,
    },
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creation { target, seq_id } => {
                write!(f, "Creation({}, {seq_id})", target.name())
            }
            Self::Reset {
                target,
                seq_id,
                attempt,
            } => write!(f, "Reset({}, {seq_id}, attempt {attempt})", target.name()),
            Self::Begin { region_id, seq_id } => write!(f, "Begin({region_id}, {seq_id})"),
            Self::Commit { region_id, seq_id } => write!(f, "Commit({region_id}, {seq_id})"),
            Self::Abort { region_id, seq_id } => write!(f, "Abort({region_id}, {seq_id})"),
        }
    }
}

impl WorkItem {
    /// Region-wide items go to every worker so each flushes its own batch.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::Begin { .. } | Self::Commit { .. } | Self::Abort { .. }
        )
    }

    pub fn satisfy(&self, worker: &mut WorkerContext, services: &Services) {
        match self {
            Self::Creation { target, seq_id } => {
                let region_id = target.region_id();
                if !services
                    .region
                    .should_proceed_with_checkpoint(region_id, *seq_id)
                {
                    debug!(operator = target.name(), seq_id, "checkpoint skipped by region");
                    return;
                }
                let batch = worker.batch(region_id, *seq_id);
                match target.create_checkpoint(*seq_id, batch) {
                    Ok(()) => services.region.checkpoint_completed(region_id, *seq_id),
                    Err(e) => operator_failed(services, target.name(), "checkpoint", *seq_id, e),
                }
            }
            Self::Reset {
                target,
                seq_id,
                attempt,
            } => {
                let region_id = target.region_id();
                if !services
                    .region
                    .should_proceed_with_reset(region_id, *seq_id, *attempt)
                {
                    debug!(operator = target.name(), seq_id, attempt, "reset skipped by region");
                    return;
                }
                match target.reset(*seq_id, *attempt) {
                    Ok(()) => services.region.reset_completed(region_id, *seq_id, *attempt),
                    Err(e) => operator_failed(services, target.name(), "reset", *seq_id, e),
                }
            }
            Self::Begin { region_id, seq_id } => {
                let (batch, current) = worker.regions.entry(*region_id).or_insert_with(|| {
                    (
                        Arc::new(CheckpointBatch::new(services.store.clone(), services.retry)),
                        0,
                    )
                });
                if *current >= *seq_id {
                    trace!(region_id, seq_id, current = *current, "batch already begun");
                    return;
                }
                match batch.begin(*seq_id) {
                    Ok(()) => *current = *seq_id,
                    Err(e) => batch_failed(services, "begin", *region_id, *seq_id, &e),
                }
            }
            Self::Commit { region_id, seq_id } => {
                let Some(batch) = worker.batch(*region_id, *seq_id) else {
                    batch_failed(services, "commit", *region_id, *seq_id, &"the batch is invalid");
                    return;
                };
                match batch.commit() {
                    Ok(()) => debug!(region_id, seq_id, "checkpoint batch committed"),
                    Err(e) => batch_failed(services, "commit", *region_id, *seq_id, &e),
                }
            }
            Self::Abort { region_id, seq_id } => {
                let Some(batch) = worker.batch(*region_id, *seq_id) else {
                    batch_failed(services, "abort", *region_id, *seq_id, &"the batch is invalid");
                    return;
                };
                if let Err(e) = batch.abort() {
                    batch_failed(services, "abort", *region_id, *seq_id, &e);
                }
            }
        }
    }
}

fn batch_failed(
    services: &Services,
    what: &str,
    region_id: u32,
    seq_id: CheckpointId,
    reason: &dyn std::fmt::Display,
) {
    error!(region_id, seq_id, error = %reason, "cannot {what} checkpoint batch");
    if !services.pe.is_shutdown_requested() {
        services.pe.shutdown_from_within_operators();
    }
}

fn operator_failed(
    services: &Services,
    operator: &str,
    what: &str,
    seq_id: CheckpointId,
    e: Error,
) {
    if matches!(e, Error::Shutdown) {
        info!(operator, seq_id, "{what} interrupted by shutdown");
        return;
    }
    error!(operator, seq_id, error = %e, "{what} failed");
    if !services.pe.is_shutdown_requested() {
        services
            .pe
            .handle_operator_failure(&format!("{what} of {operator} at {seq_id} failed: {e}"));
        services.pe.shutdown_from_within_operators();
    }
}

// ── Worker pool ─────────────────────────────────────────────────────────

/// Pool of checkpoint worker threads, each with its own queue and
/// [`WorkerContext`].
pub struct CheckpointThread {
    senders: Vec<Sender<WorkItem>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl CheckpointThread {
    pub fn new(worker_threads: usize, services: Services) -> Result<Self> {
        let workers = worker_threads.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = unbounded();
            let services = services.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tidemark-ckpt-{index}"))
                .spawn(move || worker_loop(index, rx, services))
                .map_err(|e| Error::invalid_state(format!("cannot spawn checkpoint worker: {e}")))?;
            senders.push(tx);
            handles.push(handle);
        }
        info!(workers, "checkpoint thread pool started");
        Ok(Self {
            senders,
            handles,
            next: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        if self.senders.is_empty() {
            return Err(Error::Shutdown);
        }
        if item.is_broadcast() {
            for tx in &self.senders {
                tx.send(item.clone()).map_err(|_| Error::Shutdown)?;
            }
            return Ok(());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index].send(item).map_err(|_| Error::Shutdown)
    }

    /// Close the queues and wait for queued items to drain.
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("checkpoint worker panicked");
            }
        }
    }
}

impl Drop for CheckpointThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, rx: Receiver<WorkItem>, services: Services) {
    let mut worker = WorkerContext::new();
    for item in rx.iter() {
        trace!(worker = index, ?item, "satisfying work item");
        item.satisfy(&mut worker, &services);
    }
    debug!(worker = index, "checkpoint worker stopped");
}
