use super::*;

/// Size of the seal written as user metadata of every data buffer.
pub const CHECKPOINT_METADATA_LEN: usize = 21;

/// Sealed checkpoint metadata.
///
/// Layout, little-endian: `u8 has_incremental, i64 base_id, i64 counter,
/// u32 incremental_interval`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMetadata {
    /// Delta and index buffers exist for this checkpoint.
    pub has_incremental: bool,
    /// Id of the base checkpoint this one builds on; equals the id for a base.
    pub base_id: CheckpointId,
    /// Position within the incremental chain, `0` for a base.
    pub counter: i64,
    /// Number of checkpoints per chain.
    pub incremental_interval: u32,
}

impl CheckpointMetadata {
    /// Metadata for a standalone base checkpoint.
    pub fn base(id: CheckpointId, incremental_interval: u32) -> Self {
        Self {
            has_incremental: false,
            base_id: id,
            counter: 0,
            incremental_interval,
        }
    }

    pub fn encode(&self) -> [u8; CHECKPOINT_METADATA_LEN] {
        let mut out = [0u8; CHECKPOINT_METADATA_LEN];
        out[0] = u8::from(self.has_incremental);
        out[1..9].copy_from_slice(&self.base_id.to_le_bytes());
        out[9..17].copy_from_slice(&self.counter.to_le_bytes());
        out[17..21].copy_from_slice(&self.incremental_interval.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CHECKPOINT_METADATA_LEN {
            return Err(Error::corrupt(format!(
                "checkpoint metadata is {} bytes, expected {CHECKPOINT_METADATA_LEN}",
                bytes.len()
            )));
        }
        let i64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            i64::from_le_bytes(raw)
        };
        let base_id = i64_at(1);
        let counter = i64_at(9);
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[17..21]);
        Ok(Self {
            has_incremental: bytes[0] != 0,
            base_id,
            counter,
            incremental_interval: u32::from_le_bytes(raw),
        })
    }
}

/// Kind of a record in the delta buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// Full container contents.
    Base = 0,
    /// Mutation log since the previous checkpoint.
    Delta = 1,
}

impl RecordKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Base),
            1 => Ok(Self::Delta),
            other => Err(Error::corrupt(format!("unknown record kind {other}"))),
        }
    }
}

/// One entry of the index buffer: where a container's record starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub kind: RecordKind,
    pub offset: u64,
}

/// Decoded index buffer of one checkpoint.
///
/// Besides the entries it records the previous checkpoint of the chain so
/// restore can walk back to the base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTable {
    pub previous: Option<CheckpointId>,
    entries: AHashMap<Vec<u8>, (RecordKind, u64)>,
}

impl IndexTable {
    pub fn new(previous: Option<CheckpointId>) -> Self {
        Self {
            previous,
            entries: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.key, (entry.kind, entry.offset));
    }

    pub fn get(&self, key: &[u8]) -> Option<(RecordKind, u64)> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(previous: Option<CheckpointId>, entries: &[IndexEntry]) -> ByteBuffer {
        let mut buf = ByteBuffer::new();
        buf.put_i64(previous.unwrap_or(-1));
        buf.put_u64(entries.len() as u64);
        for e in entries {
            buf.put_blob(&e.key);
            buf.put_u8(e.kind as u8);
            buf.put_u64(e.offset);
        }
        buf
    }

    pub fn decode(mut buf: ByteBuffer) -> Result<Self> {
        buf.set_read_pos(0)?;
        let previous = match buf.get_i64()? {
            -1 => None,
            id => Some(id),
        };
        let count = buf.get_u64()?;
        let mut table = Self::new(previous);
        for _ in 0..count {
            let key = buf.get_blob()?;
            let kind = RecordKind::from_u8(buf.get_u8()?)?;
            let offset = buf.get_u64()?;
            table.insert(IndexEntry { key, kind, offset });
        }
        Ok(table)
    }
}
