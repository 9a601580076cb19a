use super::*;

/// The latest watermark observed from one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WmEntry {
    pub connection: ConnectionId,
    pub watermark: Watermark,
}

impl WmEntry {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            watermark: Watermark::MIN,
        }
    }
}

/// Per-connection storage, specialised by stream count.
///
/// Up to two connections live inline; `Two` keeps the smaller watermark in
/// slot 0. Beyond that an indexed min-heap gives O(log n) updates.
#[derive(Debug)]
enum WmStorage {
    Zero,
    One(WmEntry),
    Two([WmEntry; 2]),
    Many(WmHeap),
}

impl WmStorage {
    fn min(&self) -> Watermark {
        match self {
            Self::Zero => Watermark::MAX,
            Self::One(e) => e.watermark,
            Self::Two(entries) => entries[0].watermark,
            Self::Many(heap) => heap.min(),
        }
    }

    /// Returns the stored watermark for `conn`, or `None` for an unknown connection.
    fn get(&self, conn: &ConnectionId) -> Option<Watermark> {
        match self {
            Self::Zero => None,
            Self::One(e) => (e.connection == *conn).then_some(e.watermark),
            Self::Two(entries) => entries
                .iter()
                .find(|e| e.connection == *conn)
                .map(|e| e.watermark),
            Self::Many(heap) => heap.get(conn),
        }
    }

    /// Raise the watermark for a known connection.
    fn raise(&mut self, conn: &ConnectionId, wm: Watermark) {
        match self {
            Self::Zero => {}
            Self::One(e) => e.watermark = wm,
            Self::Two(entries) => {
                let idx = if entries[0].connection == *conn { 0 } else { 1 };
                entries[idx].watermark = wm;
                if entries[0].watermark > entries[1].watermark {
                    entries.swap(0, 1);
                }
            }
            Self::Many(heap) => heap.raise(conn, wm),
        }
    }
}

/// Indexed binary min-heap keyed by connection.
#[derive(Debug)]
struct WmHeap {
    heap: Vec<WmEntry>,
    positions: AHashMap<ConnectionId, usize>,
}

impl WmHeap {
    fn new(connections: Vec<ConnectionId>) -> Self {
        // All entries start at MIN, so insertion order is already a valid heap.
        let positions = connections
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, i))
            .collect();
        let heap = connections.into_iter().map(WmEntry::new).collect();
        Self { heap, positions }
    }

    fn min(&self) -> Watermark {
        self.heap
            .first()
            .map(|e| e.watermark)
            .unwrap_or(Watermark::MAX)
    }

    fn get(&self, conn: &ConnectionId) -> Option<Watermark> {
        self.positions.get(conn).map(|&i| self.heap[i].watermark)
    }

    fn raise(&mut self, conn: &ConnectionId, wm: Watermark) {
        let Some(&pos) = self.positions.get(conn) else {
            return;
        };
        self.heap[pos].watermark = wm;
        self.sift_down(pos);
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.heap[left].watermark < self.heap[smallest].watermark {
                smallest = left;
            }
            if right < len && self.heap[right].watermark < self.heap[smallest].watermark {
                smallest = right;
            }
            if smallest == pos {
                return;
            }
            self.heap.swap(pos, smallest);
            self.positions.insert(self.heap[pos].connection, pos);
            self.positions
                .insert(self.heap[smallest].connection, smallest);
            pos = smallest;
        }
    }
}

#[derive(Debug)]
struct ReceiverState {
    storage: WmStorage,
    /// The merged input watermark last published.
    published: Watermark,
}

/// Merges per-connection watermarks into one monotonic input watermark.
///
/// `receive` may be called concurrently from several input-port threads;
/// every call runs under one short mutex held by the receiver.
#[derive(Debug)]
pub struct WatermarkReceiver {
    job_id: u64,
    state: Mutex<ReceiverState>,
}

impl WatermarkReceiver {
    /// Create a receiver for the given upstream connections of job `job_id`.
    ///
    /// Duplicate connections are collapsed.
    pub fn new(job_id: u64, connections: impl IntoIterator<Item = ConnectionId>) -> Self {
        let mut conns: Vec<ConnectionId> = Vec::new();
        for c in connections {
            if !conns.contains(&c) {
                conns.push(c);
            }
        }
        let storage = match conns.as_slice() {
            [] => WmStorage::Zero,
            [a] => WmStorage::One(WmEntry::new(*a)),
            [a, b] => WmStorage::Two([WmEntry::new(*a), WmEntry::new(*b)]),
            _ => WmStorage::Many(WmHeap::new(conns)),
        };
        let published = match storage {
            WmStorage::Zero => Watermark::MAX,
            _ => Watermark::MIN,
        };
        Self {
            job_id,
            state: Mutex::new(ReceiverState { storage, published }),
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Number of upstream connections tracked.
    pub fn stream_count(&self) -> Result<usize> {
        let state = self.lock()?;
        Ok(match &state.storage {
            WmStorage::Zero => 0,
            WmStorage::One(_) => 1,
            WmStorage::Two(_) => 2,
            WmStorage::Many(heap) => heap.heap.len(),
        })
    }

    /// Merge a watermark punctuation that arrived on input port `port`.
    ///
    /// Returns `Some(wm)` when the merged input watermark advanced to `wm`,
    /// `None` when it did not change.
    pub fn receive(&self, punct: &Punctuation, port: u32) -> Result<Option<Watermark>> {
        let payload = watermark_payload(punct)?;
        let mut state = self.lock()?;
        if matches!(state.storage, WmStorage::Zero) {
            return Ok(None);
        }
        if payload.job_id != self.job_id {
            debug!(
                job_id = payload.job_id,
                own_job_id = self.job_id,
                "ignoring watermark imported from another job"
            );
            return Ok(None);
        }

        let conn = payload.connection(port);
        let Some(stored) = state.storage.get(&conn) else {
            return Err(Error::InvalidWatermarkSource {
                connection: conn,
                port,
            });
        };

        let wm = payload.value;
        if wm < stored {
            warn!(
                connection = %conn,
                received = %wm,
                stored = %stored,
                "ignoring retrograde watermark"
            );
            return Ok(None);
        }
        if wm == stored {
            return Ok(None);
        }

        state.storage.raise(&conn, wm);
        let min = state.storage.min();
        if min > state.published {
            state.published = min;
            trace!(connection = %conn, watermark = %min, "input watermark advanced");
            Ok(Some(min))
        } else {
            Ok(None)
        }
    }

    /// The merged input watermark last published.
    pub fn watermark(&self) -> Result<Watermark> {
        Ok(self.lock()?.published)
    }

    /// Minimum across the currently stored per-connection watermarks.
    pub fn min_watermark(&self) -> Result<Watermark> {
        Ok(self.lock()?.storage.min())
    }

    /// Stored watermark for one connection.
    pub fn watermark_of(&self, connection: &ConnectionId) -> Result<Option<Watermark>> {
        Ok(self.lock()?.storage.get(connection))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReceiverState>> {
        self.state
            .lock()
            .map_err(|_| Error::invalid_state("watermark receiver lock poisoned"))
    }
}

/// Extract the watermark payload, rejecting anything but a well-formed marker.
pub fn watermark_payload(punct: &Punctuation) -> Result<&WatermarkPayload> {
    match punct {
        Punctuation::WatermarkMarker(Some(payload)) => Ok(payload),
        Punctuation::WatermarkMarker(None) => Err(Error::illegal(
            "watermark punctuation carries no watermark payload",
        )),
        other => Err(Error::illegal(format!(
            "expected a watermark punctuation, got {other:?}"
        ))),
    }
}
