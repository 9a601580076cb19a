use super::*;

#[test]
fn test_defaults_are_valid() {
    let config = EngineConfig::default();
    config.validate().unwrap();
    assert_eq!(config.checkpoint.incremental_interval, 1);
    assert_eq!(config.logging.format, LogFormat::Plain);
}

#[test]
fn test_parse_full_file() {
    let config = EngineConfig::from_toml(
        r#"
        [window]
        interval_duration = 10
        creation_period = 5
        interval_offset = 1
        discard_age = 20

        [event_time]
        resolution = "seconds"
        lag = 3

        [checkpoint]
        store_path = "/tmp/tidemark"
        incremental_interval = 4
        max_retry = 2
        retry_delay_ms = 10

        [logging]
        level = "debug"
        format = "json"
        "#,
    )
    .unwrap();

    assert_eq!(config.window.interval_duration, 10);
    assert_eq!(config.window.creation_period, 5);
    assert_eq!(config.window.interval_offset, 1);
    assert_eq!(config.window.discard_age, 20);
    assert_eq!(config.event_time.resolution, EventTimeResolution::Seconds);
    assert_eq!(config.event_time.lag, 3);
    assert_eq!(config.event_time.min_gap, 0);
    assert_eq!(
        config.checkpoint.store_path,
        Some(PathBuf::from("/tmp/tidemark"))
    );
    assert_eq!(config.checkpoint.incremental_interval, 4);
    assert_eq!(config.checkpoint.worker_threads, 1);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_rejects_non_positive_period() {
    let err = EngineConfig::from_toml("[window]\ncreation_period = 0\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_rejects_zero_incremental_interval() {
    let err = EngineConfig::from_toml("[checkpoint]\nincremental_interval = 0\n").unwrap_err();
    assert!(err.to_string().contains("incremental_interval"));
}

#[test]
fn test_rejects_malformed_toml() {
    let err = EngineConfig::from_toml("[window\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
