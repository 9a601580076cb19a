use super::*;

/// One stored buffer: small user metadata plus the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredBuffer {
    pub metadata: Vec<u8>,
    pub data: Vec<u8>,
}

impl StoredBuffer {
    pub fn new(metadata: Vec<u8>, data: Vec<u8>) -> Self {
        Self { metadata, data }
    }
}

/// Key/value storage backend for checkpoint buffers.
pub trait DataStore: Send + Sync {
    fn put(&self, key: &str, buffer: StoredBuffer) -> Result<()>;
    /// Fails with `Error::NotFound` for a missing key.
    fn get(&self, key: &str) -> Result<StoredBuffer>;
    fn exists(&self, key: &str) -> Result<bool>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Deterministic key names for one checkpoint entry (typically an operator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKeys {
    entry: String,
}

const TMP_SUFFIX: &str = ".tmp";

impl CheckpointKeys {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn data_key(&self, id: CheckpointId) -> String {
        format!("{}/ckpt-{id}", self.entry)
    }

    pub fn delta_key(&self, id: CheckpointId) -> String {
        format!("{}/ckpt-{id}.delta", self.entry)
    }

    pub fn index_key(&self, id: CheckpointId) -> String {
        format!("{}/ckpt-{id}.index", self.entry)
    }

    /// All three keys of a checkpoint.
    pub fn all_keys(&self, id: CheckpointId) -> [String; 3] {
        [self.data_key(id), self.delta_key(id), self.index_key(id)]
    }

    /// Key used while a buffer is not committed yet.
    pub fn temporary(key: &str) -> String {
        format!("{key}{TMP_SUFFIX}")
    }

    pub fn prefix(&self) -> String {
        format!("{}/ckpt-", self.entry)
    }

    /// Parse the checkpoint id out of a data key, ignoring delta, index and
    /// temporary keys.
    pub fn parse_data_key(&self, key: &str) -> Option<CheckpointId> {
        key.strip_prefix(&self.prefix())?.parse().ok()
    }
}

/// Bounded retry for transient storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up.
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "storage operation failed, retrying");
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
    }
}

/// In-memory store for tests and single-process execution.
#[derive(Default)]
pub struct InMemoryDataStore {
    buffers: Mutex<BTreeMap<String, StoredBuffer>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredBuffer>>> {
        self.buffers
            .lock()
            .map_err(|_| Error::invalid_state("data store lock poisoned"))
    }
}

impl DataStore for InMemoryDataStore {
    fn put(&self, key: &str, buffer: StoredBuffer) -> Result<()> {
        self.lock()?.insert(key.to_string(), buffer);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<StoredBuffer> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut buffers = self.lock()?;
        let buffer = buffers.remove(from).ok_or_else(|| Error::NotFound {
            key: from.to_string(),
        })?;
        buffers.insert(to.to_string(), buffer);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// File-system store. A key `a/b` maps to the file `<base>/a/b`.
///
/// File layout: `u32` metadata length, metadata, data.
pub struct FsDataStore {
    base_path: PathBuf,
}

impl FsDataStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|source| Error::Storage {
            key: base_path.display().to_string(),
            source,
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.base_path.clone(), |path, part| path.join(part))
    }

    fn collect_keys(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|source| Error::Storage {
            key: dir.display().to_string(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::Storage {
                key: dir.display().to_string(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            if entry.path().is_dir() {
                self.collect_keys(&entry.path(), &key, out)?;
            } else {
                out.push(key);
            }
        }
        Ok(())
    }
}

fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Storage {
        key: key.to_string(),
        source,
    }
}

impl DataStore for FsDataStore {
    fn put(&self, key: &str, buffer: StoredBuffer) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(key))?;
        }
        let mut bytes = Vec::with_capacity(4 + buffer.metadata.len() + buffer.data.len());
        bytes.extend_from_slice(&(buffer.metadata.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&buffer.metadata);
        bytes.extend_from_slice(&buffer.data);
        fs::write(&path, bytes).map_err(io_error(key))
    }

    fn get(&self, key: &str) -> Result<StoredBuffer> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(io_error(key)(e)),
        };
        if bytes.len() < 4 {
            return Err(Error::corrupt(format!("{key}: truncated buffer header")));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        let meta_len = u32::from_le_bytes(raw) as usize;
        if bytes.len() < 4 + meta_len {
            return Err(Error::corrupt(format!("{key}: truncated buffer metadata")));
        }
        Ok(StoredBuffer {
            metadata: bytes[4..4 + meta_len].to_vec(),
            data: bytes[4 + meta_len..].to_vec(),
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key)(e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.path_for(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(to))?;
        }
        fs::rename(self.path_for(from), target).map_err(io_error(from))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.base_path, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}
