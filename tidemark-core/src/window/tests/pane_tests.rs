use super::*;

/// Records every callback as a short string.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    fail_before_insert: bool,
}

impl WindowEventHandler<i64, u32> for Recorder {
    fn before_tuple_insertion(
        &mut self,
        pane: &TimeIntervalWindowPane<i64, u32>,
        tuple: &i64,
        partition: &u32,
    ) -> Result<()> {
        if self.fail_before_insert {
            return Err(Error::invalid_state("rejected"));
        }
        self.events
            .push(format!("before {tuple}@{partition} {}", pane.interval()));
        Ok(())
    }

    fn on_window_initial_full(
        &mut self,
        pane: &TimeIntervalWindowPane<i64, u32>,
        partition: &u32,
    ) -> Result<()> {
        self.events.push(format!("full {partition} {}", pane.interval()));
        Ok(())
    }

    fn on_window_trigger(
        &mut self,
        pane: &TimeIntervalWindowPane<i64, u32>,
        partition: &u32,
    ) -> Result<()> {
        let info = pane.trigger_info();
        let tuples: Vec<_> = pane
            .partition(partition)
            .unwrap()
            .iter()
            .copied()
            .collect();
        self.events.push(format!(
            "trigger {partition} {:?}#{} {tuples:?}",
            info.pane_timing, info.pane_index
        ));
        Ok(())
    }

    fn before_window_close(
        &mut self,
        _pane: &TimeIntervalWindowPane<i64, u32>,
        partition: &u32,
    ) -> Result<()> {
        self.events.push(format!("close {partition}"));
        Ok(())
    }
}

fn pane(
    start: EventTime,
    end: EventTime,
    discard_age: EventTime,
) -> TimeIntervalWindowPane<i64, u32> {
    TimeIntervalWindowPane::new(Interval::new(start, end), discard_age)
}

#[test]
fn test_pane_lifecycle_order() {
    let mut h = Recorder::default();
    let mut p = pane(0, 10, 5);
    p.insert_tuple(1, 0, &mut h).unwrap();
    p.insert_tuple(2, 1, &mut h).unwrap();
    assert_eq!(p.state(), PaneState::Incomplete);
    assert_eq!(p.trigger_info().pane_timing, PaneTiming::Early);

    p.insert_watermark(Watermark::new(9), &mut h).unwrap();
    assert_eq!(p.state(), PaneState::Incomplete);

    h.events.clear();
    p.insert_watermark(Watermark::new(10), &mut h).unwrap();
    assert_eq!(p.state(), PaneState::Complete);
    assert_eq!(
        h.events,
        vec![
            "full 0 [0, 10)",
            "full 1 [0, 10)",
            "trigger 0 OnComplete#0 [1]",
            "trigger 1 OnComplete#0 [2]",
        ]
    );

    h.events.clear();
    p.insert_watermark(Watermark::new(15), &mut h).unwrap();
    assert_eq!(p.state(), PaneState::Closed);
    assert_eq!(h.events, vec!["close 0", "close 1"]);

    // Further watermarks and tuples change nothing.
    h.events.clear();
    p.insert_watermark(Watermark::new(100), &mut h).unwrap();
    assert!(!p.insert_tuple(3, 0, &mut h).unwrap());
    assert!(h.events.is_empty());
    assert_eq!(p.len(), 2);
}

#[test]
fn test_late_tuple_triggers_only_its_partition() {
    let mut h = Recorder::default();
    let mut p = pane(0, 10, 20);
    p.insert_tuple(1, 0, &mut h).unwrap();
    p.insert_tuple(2, 1, &mut h).unwrap();
    p.insert_watermark(Watermark::new(12), &mut h).unwrap();
    assert!(!p.is_fresh());

    h.events.clear();
    p.insert_tuple(3, 1, &mut h).unwrap();
    assert_eq!(
        h.events,
        vec!["before 3@1 [0, 10)", "trigger 1 Late#1 [2, 3]"]
    );
    assert_eq!(p.state(), PaneState::Complete);
    assert_eq!(p.trigger_info().pane_index, 2);
}

#[test]
fn test_zero_discard_age_completes_and_closes_together() {
    let mut h = Recorder::default();
    let mut p = pane(0, 10, 0);
    p.insert_tuple(5, 7, &mut h).unwrap();
    h.events.clear();
    p.insert_watermark(Watermark::new(10), &mut h).unwrap();
    assert_eq!(
        h.events,
        vec!["full 7 [0, 10)", "trigger 7 OnComplete#0 [5]", "close 7"]
    );
    assert_eq!(p.state(), PaneState::Closed);
}

#[test]
fn test_empty_pane_completes_without_trigger() {
    let mut h = Recorder::default();
    let mut p = pane(0, 10, 5);
    p.insert_watermark(Watermark::new(10), &mut h).unwrap();
    assert!(h.events.is_empty());
    assert_eq!(p.state(), PaneState::Complete);
    assert_eq!(p.trigger_info().pane_index, 0);
}

#[test]
fn test_close_beyond_max_saturates() {
    let mut h = Recorder::default();
    let mut p = pane(0, crate::types::EVENT_TIME_MAX - 1, 100);
    p.insert_watermark(Watermark::MAX, &mut h).unwrap();
    assert_eq!(p.state(), PaneState::Closed);
}

#[test]
fn test_evicting_a_partition_keeps_state() {
    let mut h = Recorder::default();
    let mut p = pane(0, 10, 5);
    p.insert_tuple(1, 0, &mut h).unwrap();
    p.insert_tuple(2, 1, &mut h).unwrap();
    p.insert_watermark(Watermark::new(10), &mut h).unwrap();

    let evicted = p.evict_partition(&0).unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(p.state(), PaneState::Complete);
    assert_eq!(p.partition_count(), 1);
    assert!(p.partition(&0).is_none());
}

#[test]
fn test_handler_error_propagates() {
    let mut h = Recorder {
        fail_before_insert: true,
        ..Recorder::default()
    };
    let mut p = pane(0, 10, 5);
    assert!(p.insert_tuple(1, 0, &mut h).is_err());
    assert!(p.is_empty());
    assert!(!p.is_fresh());
}
