use super::*;

fn conn(op: u32, oport: u32) -> ConnectionId {
    ConnectionId::new(0, op, oport, 0)
}

fn wm_punct(op: u32, oport: u32, ts: EventTime) -> Punctuation {
    Punctuation::watermark(WatermarkPayload::new(0, op, oport, Watermark::new(ts)))
}

fn adv(ts: EventTime) -> Option<Watermark> {
    Some(Watermark::new(ts))
}

#[test]
fn test_zero_stream_receiver_is_inactive() {
    let rec = WatermarkReceiver::new(0, []);
    assert_eq!(rec.watermark().unwrap(), Watermark::MAX);
    assert_eq!(rec.receive(&wm_punct(0, 0, 1_000_000), 0).unwrap(), None);
    assert_eq!(rec.watermark().unwrap(), Watermark::MAX);
    assert_eq!(rec.stream_count().unwrap(), 0);
}

#[test]
fn test_one_stream_advances_and_ignores_retrograde() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0)]);
    assert_eq!(rec.watermark().unwrap(), Watermark::MIN);

    assert_eq!(rec.receive(&wm_punct(0, 0, 0), 0).unwrap(), adv(0));
    assert_eq!(rec.receive(&wm_punct(0, 0, 2), 0).unwrap(), adv(2));
    // Back in time: ignored, no error.
    assert_eq!(rec.receive(&wm_punct(0, 0, 1), 0).unwrap(), None);
    assert_eq!(rec.min_watermark().unwrap(), Watermark::new(2));
    assert_eq!(rec.receive(&wm_punct(0, 0, 3), 0).unwrap(), adv(3));
    assert_eq!(rec.watermark().unwrap(), Watermark::new(3));
}

#[test]
fn test_unknown_connection_is_rejected() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0)]);

    let err = rec.receive(&wm_punct(1, 0, 5), 0).unwrap_err();
    assert!(matches!(err, Error::InvalidWatermarkSource { port: 0, .. }));

    let err = rec.receive(&wm_punct(0, 1, 5), 0).unwrap_err();
    assert!(matches!(err, Error::InvalidWatermarkSource { .. }));

    // Known operator/port but arriving on another local input port.
    let err = rec.receive(&wm_punct(0, 0, 5), 1).unwrap_err();
    assert!(matches!(err, Error::InvalidWatermarkSource { port: 1, .. }));
}

#[test]
fn test_other_job_is_ignored() {
    let rec = WatermarkReceiver::new(7, [ConnectionId::new(7, 0, 0, 0)]);
    let foreign = Punctuation::watermark(WatermarkPayload::new(8, 0, 0, Watermark::new(10)));
    assert_eq!(rec.receive(&foreign, 0).unwrap(), None);
    assert_eq!(rec.watermark().unwrap(), Watermark::MIN);
}

#[test]
fn test_malformed_punctuation_is_illegal_argument() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0)]);
    let err = rec
        .receive(&Punctuation::WatermarkMarker(None), 0)
        .unwrap_err();
    assert!(matches!(err, Error::IllegalArgument(_)));
    let err = rec.receive(&Punctuation::WindowMarker, 0).unwrap_err();
    assert!(matches!(err, Error::IllegalArgument(_)));
}

#[test]
fn test_max_watermark_is_accepted() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0)]);
    assert_eq!(
        rec.receive(&wm_punct(0, 0, EVENT_TIME_MAX), 0).unwrap(),
        Some(Watermark::MAX)
    );
}

// stream {0,0}: 0     3   4   6
// stream {1,0}:   1 4   3!  4   5 6
#[test]
fn test_two_stream_timeline() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0), conn(1, 0)]);

    assert_eq!(rec.receive(&wm_punct(0, 0, 0), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(1, 0, 1), 0).unwrap(), adv(0));
    assert_eq!(rec.receive(&wm_punct(1, 0, 4), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(0, 0, 3), 0).unwrap(), adv(3));
    assert_eq!(rec.receive(&wm_punct(1, 0, 3), 0).unwrap(), None);
    assert_eq!(rec.watermark_of(&conn(1, 0)).unwrap(), Some(Watermark::new(4)));
    assert_eq!(rec.receive(&wm_punct(0, 0, 4), 0).unwrap(), adv(4));
    assert_eq!(rec.receive(&wm_punct(1, 0, 4), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(0, 0, 6), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(1, 0, 5), 0).unwrap(), adv(5));
    assert_eq!(rec.min_watermark().unwrap(), Watermark::new(5));
    assert_eq!(rec.receive(&wm_punct(1, 0, 6), 0).unwrap(), adv(6));
    assert_eq!(rec.watermark().unwrap(), Watermark::new(6));
}

// stream {0,0}: 0         4           6
// stream {1,0}:   1         4   2!  6
// stream {2,0}:     0   3         4     7
// stream {2,1}:       1       4           7
#[test]
fn test_multi_stream_timeline() {
    let rec = WatermarkReceiver::new(0, [conn(0, 0), conn(1, 0), conn(2, 0), conn(2, 1)]);
    assert_eq!(rec.stream_count().unwrap(), 4);

    assert_eq!(rec.receive(&wm_punct(0, 0, 0), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(1, 0, 1), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(2, 0, 0), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(2, 1, 1), 0).unwrap(), adv(0));
    assert_eq!(rec.receive(&wm_punct(2, 0, 3), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(0, 0, 4), 0).unwrap(), adv(1));
    assert_eq!(rec.receive(&wm_punct(1, 0, 4), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(2, 1, 4), 0).unwrap(), adv(3));
    assert_eq!(rec.receive(&wm_punct(1, 0, 2), 0).unwrap(), None);
    assert_eq!(rec.min_watermark().unwrap(), Watermark::new(3));
    assert_eq!(rec.receive(&wm_punct(2, 0, 4), 0).unwrap(), adv(4));
    assert_eq!(rec.receive(&wm_punct(1, 0, 6), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(0, 0, 6), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(2, 0, 7), 0).unwrap(), None);
    assert_eq!(rec.receive(&wm_punct(2, 1, 7), 0).unwrap(), adv(6));
    assert_eq!(rec.watermark().unwrap(), Watermark::new(6));
}

#[test]
fn test_merged_watermark_is_min_of_latest_per_connection() {
    let conns: Vec<_> = (0..6).map(|op| conn(op, 0)).collect();
    let rec = WatermarkReceiver::new(0, conns.clone());
    let mut latest = vec![EVENT_TIME_MIN; conns.len()];
    let mut last_published = Watermark::MIN;

    // Deterministic interleaving with non-decreasing per-connection values.
    for step in 0..120i64 {
        let idx = ((step * 7 + 3) % conns.len() as i64) as usize;
        let value = step / 2 + idx as i64;
        let value = value.max(latest[idx]);
        latest[idx] = value;
        rec.receive(&wm_punct(idx as u32, 0, value), 0).unwrap();

        let published = rec.watermark().unwrap();
        assert!(published >= last_published);
        last_published = published;
        let expected = *latest.iter().min().unwrap();
        assert_eq!(rec.min_watermark().unwrap(), Watermark::new(expected));
    }
}

#[test]
fn test_concurrent_receive_converges_to_minimum() {
    let conns: Vec<_> = (0..4).map(|op| conn(op, 0)).collect();
    let rec = WatermarkReceiver::new(0, conns);

    std::thread::scope(|s| {
        for op in 0..4u32 {
            let rec = &rec;
            s.spawn(move || {
                for ts in 0..=(100 + op as i64) {
                    rec.receive(&wm_punct(op, 0, ts), 0).unwrap();
                }
            });
        }
    });

    assert_eq!(rec.watermark().unwrap(), Watermark::new(100));
}
