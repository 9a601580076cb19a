use super::*;

fn memory_store() -> Arc<dyn DataStore> {
    Arc::new(InMemoryDataStore::new())
}

/// Store that fails every rename, for exercising cleanup paths.
#[derive(Default)]
struct RenameFailingStore {
    inner: InMemoryDataStore,
}

impl DataStore for RenameFailingStore {
    fn put(&self, key: &str, buffer: StoredBuffer) -> Result<()> {
        self.inner.put(key, buffer)
    }
    fn get(&self, key: &str) -> Result<StoredBuffer> {
        self.inner.get(key)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }
    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
    fn rename(&self, from: &str, _to: &str) -> Result<()> {
        Err(Error::Storage {
            key: from.to_string(),
            source: std::io::Error::other("rename refused"),
        })
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }
}

#[test]
fn test_metadata_layout_is_21_bytes() {
    let meta = CheckpointMetadata {
        has_incremental: true,
        base_id: 7,
        counter: 2,
        incremental_interval: 5,
    };
    let bytes = meta.encode();
    assert_eq!(bytes.len(), CHECKPOINT_METADATA_LEN);
    assert_eq!(bytes[0], 1);
    assert_eq!(&bytes[1..9], &7i64.to_le_bytes());
    assert_eq!(&bytes[9..17], &2i64.to_le_bytes());
    assert_eq!(&bytes[17..21], &5u32.to_le_bytes());
    assert_eq!(CheckpointMetadata::decode(&bytes).unwrap(), meta);

    assert!(matches!(
        CheckpointMetadata::decode(&bytes[..20]),
        Err(Error::CorruptCheckpoint(_))
    ));
}

#[test]
fn test_index_table_encoding() {
    let entries = vec![
        IndexEntry {
            key: b"a".to_vec(),
            kind: RecordKind::Base,
            offset: 0,
        },
        IndexEntry {
            key: b"b".to_vec(),
            kind: RecordKind::Delta,
            offset: 17,
        },
    ];
    let table = IndexTable::decode(IndexTable::encode(Some(3), &entries)).unwrap();
    assert_eq!(table.previous, Some(3));
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(b"b"), Some((RecordKind::Delta, 17)));
    assert_eq!(table.get(b"c"), None);

    let empty = IndexTable::decode(IndexTable::encode(None, &[])).unwrap();
    assert_eq!(empty.previous, None);
    assert!(empty.is_empty());
}

#[test]
fn test_byte_buffer_underflow_is_corrupt() {
    let mut buf = ByteBuffer::new();
    buf.put_u32(9);
    assert_eq!(buf.get_u32().unwrap(), 9);
    assert!(matches!(buf.get_u8(), Err(Error::CorruptCheckpoint(_))));
}

#[test]
fn test_write_then_read_primitives() {
    let store = memory_store();
    let keys = CheckpointKeys::new("op");
    let mut ckpt = Checkpoint::create(
        store.clone(),
        keys.clone(),
        1,
        CheckpointMetadata::base(1, 1),
        None,
    );
    ckpt.add_bool(true).unwrap();
    ckpt.add_u8(3).unwrap();
    ckpt.add_i32(-4).unwrap();
    ckpt.add_u32(5).unwrap();
    ckpt.add_i64(i64::MIN).unwrap();
    ckpt.add_u64(u64::MAX).unwrap();
    ckpt.add_f64(1.5).unwrap();
    ckpt.add_string("pane").unwrap();
    ckpt.add_blob(&[1, 2, 3]).unwrap();
    ckpt.add_value(&vec![(1u32, "x".to_string())]).unwrap();
    ckpt.finish_checkpointing().unwrap();
    assert_eq!(ckpt.state(), CheckpointState::Finished);
    assert!(!ckpt.has_incremental());
    drop(ckpt);

    assert!(store.exists("op/ckpt-1").unwrap());
    assert!(!store.exists("op/ckpt-1.delta").unwrap());
    assert!(store.list("op/").unwrap().iter().all(|k| !k.ends_with(".tmp")));

    let mut ckpt = Checkpoint::open(store, keys, 1, RetryPolicy::none()).unwrap();
    assert!(ckpt.is_base());
    assert!(ckpt.get_bool().unwrap());
    assert_eq!(ckpt.get_u8().unwrap(), 3);
    assert_eq!(ckpt.get_i32().unwrap(), -4);
    assert_eq!(ckpt.get_u32().unwrap(), 5);
    assert_eq!(ckpt.get_i64().unwrap(), i64::MIN);
    assert_eq!(ckpt.get_u64().unwrap(), u64::MAX);
    assert_eq!(ckpt.get_f64().unwrap(), 1.5);
    assert_eq!(ckpt.get_string().unwrap(), "pane");
    assert_eq!(ckpt.get_blob().unwrap(), vec![1, 2, 3]);
    assert_eq!(
        ckpt.get_value::<Vec<(u32, String)>>().unwrap(),
        vec![(1, "x".to_string())]
    );
    assert!(ckpt.get_u8().is_err());
    assert_eq!(ckpt.state(), CheckpointState::Error);
}

#[test]
fn test_write_after_finish_is_rejected() {
    let mut ckpt = Checkpoint::create(
        memory_store(),
        CheckpointKeys::new("op"),
        1,
        CheckpointMetadata::base(1, 1),
        None,
    );
    ckpt.finish_checkpointing().unwrap();
    assert!(matches!(ckpt.add_u8(1), Err(Error::InvalidState(_))));
    assert!(matches!(ckpt.get_u8(), Err(Error::InvalidState(_))));
}

#[test]
fn test_open_missing_checkpoint_is_not_found() {
    let err = Checkpoint::open(memory_store(), CheckpointKeys::new("op"), 3, RetryPolicy::none())
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn test_open_with_bad_seal_is_corrupt() {
    let store = memory_store();
    store
        .put("op/ckpt-3", StoredBuffer::new(vec![0; 4], vec![]))
        .unwrap();
    let err = Checkpoint::open(store, CheckpointKeys::new("op"), 3, RetryPolicy::none())
        .err()
        .unwrap();
    assert!(matches!(err, Error::CorruptCheckpoint(_)));
}

#[test]
fn test_failed_commit_leaves_no_temporary_keys() {
    let store: Arc<dyn DataStore> = Arc::new(RenameFailingStore::default());
    let mut ckpt = Checkpoint::create(
        store.clone(),
        CheckpointKeys::new("op"),
        1,
        CheckpointMetadata::base(1, 2),
        None,
    );
    ckpt.add_u64(1).unwrap();
    assert!(ckpt.finish_checkpointing().is_err());
    assert_eq!(ckpt.state(), CheckpointState::Error);
    assert!(!store.list("op/").unwrap().is_empty());

    drop(ckpt);
    assert!(store.list("op/").unwrap().is_empty());
}

#[test]
fn test_incremental_mode_redirects_to_delta() {
    let store = memory_store();
    let mut ckpt = Checkpoint::create(
        store.clone(),
        CheckpointKeys::new("op"),
        1,
        CheckpointMetadata::base(1, 4),
        None,
    );
    ckpt.add_u32(1).unwrap();
    ckpt.set_incremental_mode(true);
    ckpt.add_u32(2).unwrap();
    ckpt.set_incremental_mode(false);
    assert_eq!(ckpt.norm_size(), 4);
    assert_eq!(ckpt.delta_size(), 4);
    assert!(ckpt.should_enable_logging());
    ckpt.finish_checkpointing().unwrap();
    assert!(ckpt.has_incremental());

    assert_eq!(store.get("op/ckpt-1.delta").unwrap().data, 2u32.to_le_bytes());
    let index = IndexTable::decode(ByteBuffer::from_vec(
        store.get("op/ckpt-1.index").unwrap().data,
    ))
    .unwrap();
    assert_eq!(index.previous, None);
    assert!(index.is_empty());
}

#[test]
fn test_batch_stages_until_commit() {
    let store = memory_store();
    let batch = Arc::new(CheckpointBatch::new(store.clone(), RetryPolicy::none()));
    batch.begin(5).unwrap();

    let mut ckpt = Checkpoint::create(
        store.clone(),
        CheckpointKeys::new("op"),
        5,
        CheckpointMetadata::base(5, 1),
        None,
    )
    .with_batch(Some(batch.clone()));
    ckpt.add_string("state").unwrap();
    ckpt.finish_checkpointing().unwrap();
    drop(ckpt);

    assert_eq!(batch.staged_len(), 1);
    assert!(!store.exists("op/ckpt-5").unwrap());

    batch.commit().unwrap();
    assert_eq!(batch.staged_len(), 0);
    assert!(store.exists("op/ckpt-5").unwrap());
    assert!(store.list("op/").unwrap().iter().all(|k| !k.ends_with(".tmp")));
}

#[test]
fn test_batch_abort_discards_writes() {
    let store = memory_store();
    let batch = CheckpointBatch::new(store.clone(), RetryPolicy::none());
    batch.begin(1).unwrap();
    batch
        .stage("op/ckpt-1".into(), StoredBuffer::default())
        .unwrap();
    batch.abort().unwrap();
    batch.commit().unwrap();
    assert!(store.list("").unwrap().is_empty());
}

#[test]
fn test_failed_checkpoint_marks_batch_error() {
    let store = memory_store();
    let batch = Arc::new(CheckpointBatch::new(store.clone(), RetryPolicy::none()));
    batch.begin(2).unwrap();

    let ckpt = Checkpoint::create(
        store,
        CheckpointKeys::new("op"),
        2,
        CheckpointMetadata::base(2, 1),
        None,
    )
    .with_batch(Some(batch.clone()));
    // Dropped without finishing.
    drop(ckpt);

    assert_eq!(batch.state(), BatchState::Error);
    assert!(matches!(batch.commit(), Err(Error::InvalidState(_))));
    assert!(batch
        .stage("x".into(), StoredBuffer::default())
        .is_err());

    batch.begin(3).unwrap();
    assert_eq!(batch.state(), BatchState::Open);
    assert_eq!(batch.seq_id(), 3);
}

#[test]
fn test_batch_commit_failure_cleans_up() {
    let store: Arc<dyn DataStore> = Arc::new(RenameFailingStore::default());
    let batch = CheckpointBatch::new(store.clone(), RetryPolicy::none());
    batch.begin(1).unwrap();
    batch
        .stage("op/ckpt-1".into(), StoredBuffer::default())
        .unwrap();
    assert!(batch.commit().is_err());
    assert_eq!(batch.state(), BatchState::Error);
    assert!(store.list("").unwrap().is_empty());
}
