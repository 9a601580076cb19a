use super::*;

const KEY: &[u8] = b"deque";

struct Chain {
    store: Arc<dyn DataStore>,
    keys: CheckpointKeys,
    interval: u32,
    last: Option<(CheckpointId, i64)>,
    last_id: Option<CheckpointId>,
}

impl Chain {
    fn new(interval: u32) -> Self {
        Self {
            store: Arc::new(InMemoryDataStore::new()),
            keys: CheckpointKeys::new("op"),
            interval,
            last: None,
            last_id: None,
        }
    }

    fn write(&mut self, id: CheckpointId, deque: &mut IncrDeque<String>) -> CheckpointMetadata {
        let metadata = IntervalSetter::new(self.interval).next(id, self.last);
        let mut ckpt = Checkpoint::create(
            self.store.clone(),
            self.keys.clone(),
            id,
            metadata,
            self.last_id,
        );
        ckpt.add_u32(deque.len() as u32).unwrap();
        ckpt.add_incremental(KEY, deque).unwrap();
        ckpt.finish_checkpointing().unwrap();
        self.last = Some((metadata.base_id, metadata.counter));
        self.last_id = Some(id);
        ckpt.metadata()
    }

    fn read(&self, id: CheckpointId) -> IncrDeque<String> {
        let mut ckpt =
            Checkpoint::open(self.store.clone(), self.keys.clone(), id, RetryPolicy::none())
                .unwrap();
        let len = ckpt.get_u32().unwrap();
        let mut deque = IncrDeque::new();
        ckpt.get_incremental(KEY, &mut deque).unwrap();
        assert_eq!(deque.len(), len as usize);
        deque
    }
}

fn strings(deque: &IncrDeque<String>) -> Vec<&str> {
    deque.iter().map(String::as_str).collect()
}

fn deque_of(items: &[&str]) -> IncrDeque<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_deque_basic_operations() {
    let mut d = deque_of(&["a", "b", "c", "d"]);
    assert_eq!(d.pop_front().as_deref(), Some("a"));
    assert_eq!(d.erase(1).as_deref(), Some("c"));
    assert_eq!(d.pop_back().as_deref(), Some("d"));
    assert_eq!(d.erase(5), None);
    d.push_back("e".into());
    assert_eq!(strings(&d), vec!["b", "e"]);
    assert_eq!(d.front().map(String::as_str), Some("b"));
    assert_eq!(d.back().map(String::as_str), Some("e"));
    d.clear();
    assert!(d.is_empty());
}

#[test]
fn test_push_only_chain() {
    let mut chain = Chain::new(4);
    let mut d = IncrDeque::new();
    d.push_back("a".to_string());
    let m1 = chain.write(1, &mut d);
    assert_eq!((m1.base_id, m1.counter), (1, 0));
    assert!(!d.needs_base());

    d.push_back("b".to_string());
    d.push_back("c".to_string());
    let m2 = chain.write(2, &mut d);
    assert_eq!((m2.base_id, m2.counter), (1, 1));
    assert!(m2.has_incremental);

    let restored = chain.read(2);
    assert_eq!(strings(&restored), vec!["a", "b", "c"]);
    assert_eq!(strings(&chain.read(1)), vec!["a"]);
}

#[test]
fn test_mixed_erase_and_pop_chain() {
    let mut chain = Chain::new(5);
    let mut d = deque_of(&["a", "b", "c", "d", "e", "f"]);
    chain.write(1, &mut d);

    // Erase "a", then pop "b", erase "e", push "g".
    d.erase(0);
    d.pop_front();
    d.erase(2);
    d.push_back("g".into());
    assert_eq!(d.logged_removals(), 3);
    chain.write(2, &mut d);
    assert_eq!(d.logged_removals(), 0);

    // Pop "c", erase "g", push "h", erase "f".
    d.pop_front();
    d.erase(2);
    d.push_back("h".into());
    d.erase(1);
    chain.write(3, &mut d);

    assert_eq!(strings(&chain.read(2)), vec!["c", "d", "f", "g"]);
    assert_eq!(strings(&chain.read(3)), vec!["d", "h"]);
    assert_eq!(strings(&chain.read(3)), strings(&d));
}

#[test]
fn test_clear_and_refill_chain() {
    let mut chain = Chain::new(3);
    let mut d = deque_of(&["x", "y"]);
    chain.write(10, &mut d);
    d.clear();
    d.push_back("z".into());
    chain.write(11, &mut d);
    assert_eq!(strings(&chain.read(11)), vec!["z"]);
}

#[test]
fn test_interval_rollover_starts_new_base() {
    let mut chain = Chain::new(2);
    let mut d = deque_of(&["a"]);
    let ids: Vec<_> = (1..=5)
        .map(|id| {
            d.push_back(format!("v{id}"));
            let m = chain.write(id, &mut d);
            (m.base_id, m.counter)
        })
        .collect();
    assert_eq!(ids, vec![(1, 0), (1, 1), (3, 0), (3, 1), (5, 0)]);
    assert_eq!(
        strings(&chain.read(4)),
        vec!["a", "v1", "v2", "v3", "v4"]
    );
}

#[test]
fn test_container_created_mid_chain_writes_base_record() {
    let mut chain = Chain::new(4);
    let store = chain.store.clone();
    let keys = chain.keys.clone();
    let mut first = deque_of(&["p"]);
    chain.write(1, &mut first);

    let metadata = IntervalSetter::new(4).next(2, Some((1, 0)));
    let mut ckpt = Checkpoint::create(store.clone(), keys.clone(), 2, metadata, Some(1));
    let mut late: IncrDeque<String> = deque_of(&["q"]);
    assert!(late.needs_base());
    ckpt.add_incremental(b"late", &mut late).unwrap();
    ckpt.add_incremental(KEY, &mut first).unwrap();
    ckpt.finish_checkpointing().unwrap();
    drop(ckpt);

    let index = IndexTable::decode(ByteBuffer::from_vec(
        store.get("op/ckpt-2.index").unwrap().data,
    ))
    .unwrap();
    assert_eq!(index.previous, Some(1));
    assert_eq!(index.get(b"late").map(|(k, _)| k), Some(RecordKind::Base));
    assert_eq!(index.get(KEY).map(|(k, _)| k), Some(RecordKind::Delta));

    let mut ckpt = Checkpoint::open(store, keys, 2, RetryPolicy::none()).unwrap();
    let mut restored = IncrDeque::<String>::new();
    ckpt.get_incremental(b"late", &mut restored).unwrap();
    assert_eq!(strings(&restored), vec!["q"]);
}

#[test]
fn test_missing_link_is_corrupt() {
    let mut chain = Chain::new(4);
    let mut d = deque_of(&["a"]);
    chain.write(1, &mut d);
    d.push_back("b".into());
    chain.write(2, &mut d);
    chain.store.remove("op/ckpt-1.index").unwrap();

    let mut ckpt =
        Checkpoint::open(chain.store.clone(), chain.keys.clone(), 2, RetryPolicy::none()).unwrap();
    ckpt.get_u32().unwrap();
    let mut restored = IncrDeque::<String>::new();
    assert!(matches!(
        ckpt.get_incremental(KEY, &mut restored),
        Err(Error::CorruptCheckpoint(_))
    ));
    assert_eq!(ckpt.state(), CheckpointState::Error);
}

#[test]
fn test_unknown_key_is_corrupt() {
    let mut chain = Chain::new(1);
    let mut d = deque_of(&["a"]);
    chain.write(1, &mut d);
    let mut ckpt =
        Checkpoint::open(chain.store.clone(), chain.keys.clone(), 1, RetryPolicy::none()).unwrap();
    let mut other = IncrDeque::<String>::new();
    assert!(ckpt.get_incremental(b"nope", &mut other).is_err());
}

#[test]
fn test_logging_disabled_without_deltas() {
    let mut chain = Chain::new(1);
    let mut d = deque_of(&["a", "b", "c"]);
    chain.write(1, &mut d);
    assert!(!d.is_logging());
    assert!(d.needs_base());

    assert_eq!(d.pop_front().as_deref(), Some("a"));
    d.erase(0);
    d.push_back("d".to_string());
    assert_eq!(d.logged_removals(), 0);

    let m2 = chain.write(2, &mut d);
    assert_eq!((m2.base_id, m2.counter), (2, 0));
    assert_eq!(strings(&chain.read(2)), vec!["c", "d"]);
}

#[test]
fn test_logging_resumes_with_fresh_reference() {
    let mut d = deque_of(&["a", "b"]);
    d.set_logging(false);
    d.pop_front();
    d.set_logging(true);
    assert!(d.is_logging());
    assert!(d.needs_base());
    assert_eq!(d.logged_removals(), 0);
    d.pop_front();
    assert_eq!(d.logged_removals(), 1);

    // A chain with deltas keeps the log running.
    let mut chain = Chain::new(3);
    let mut e = deque_of(&["x"]);
    chain.write(1, &mut e);
    assert!(e.is_logging());
    assert!(chain.read(1).is_logging());
}
