//! `tidemark replay`: drive one windowed operator from a JSON-lines recording.
//!
//! Each input line is either
//! `{"type":"tuple","event_time":12,"partition":"a","value":"x"}` or
//! `{"type":"watermark","port":0,"value":10}`. Integer event times are in
//! the configured event-time resolution. Trigger and close events are
//! written to the output as JSON lines.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::json;
use tidemark_core::checkpoint::{
    Checkpoint, CheckpointContext, DataStore, FsDataStore, InMemoryDataStore,
};
use tidemark_core::config::{CheckpointConfig, EngineConfig};
use tidemark_core::time::{
    EventTimeAttribute, EventTimeContext, EventTimeType, OutputSink, WatermarkMode,
};
use tidemark_core::types::{
    ConnectionId, EventTime, Punctuation, Tuple, Value, Watermark, WatermarkPayload,
};
use tidemark_core::window::{
    InsertOutcome, TimeIntervalWindow, TimeIntervalWindowPane, WindowEventHandler,
};
use tidemark_core::{Error, Result};
use tracing::{debug, info};

const JOB_ID: u64 = 1;
const OPERATOR_INDEX: u32 = 0;
const CHECKPOINT_ENTRY: &str = "replay";

/// One line of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    Tuple {
        event_time: i64,
        #[serde(default)]
        partition: String,
        #[serde(default)]
        value: String,
    },
    Watermark {
        #[serde(default)]
        port: u32,
        value: EventTime,
    },
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Number of upstream ports. `0` replays an event-time source that
    /// derives its watermark from the tuples.
    pub input_ports: u32,
    pub checkpoint_every: Option<u64>,
    pub resume: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub records: u64,
    pub inserted: u64,
    pub late: u64,
    pub dropped: u64,
    pub unassigned: u64,
    pub watermarks: u64,
    pub checkpoints: u64,
    pub final_watermark: Option<EventTime>,
}

/// Writes window events as JSON lines.
struct EventPrinter<W> {
    out: W,
    triggers: u64,
}

impl<W: Write> EventPrinter<W> {
    fn emit(&mut self, line: serde_json::Value) -> Result<()> {
        writeln!(self.out, "{line}")
            .map_err(|e| Error::invalid_state(format!("writing replay output failed: {e}")))
    }
}

impl<W: Write> WindowEventHandler<String, String> for EventPrinter<W> {
    fn on_window_trigger(
        &mut self,
        pane: &TimeIntervalWindowPane<String, String>,
        partition: &String,
    ) -> Result<()> {
        let info = pane.trigger_info();
        let tuples: Vec<&String> = pane
            .partition(partition)
            .map(|d| d.iter().collect())
            .unwrap_or_default();
        self.triggers += 1;
        self.emit(json!({
            "event": "trigger",
            "start": info.start_time,
            "end": info.end_time,
            "timing": info.pane_timing,
            "pane_index": info.pane_index,
            "partition": partition,
            "tuples": tuples,
        }))
    }

    fn before_window_close(
        &mut self,
        pane: &TimeIntervalWindowPane<String, String>,
        partition: &String,
    ) -> Result<()> {
        let count = pane.partition(partition).map_or(0, |d| d.len());
        self.emit(json!({
            "event": "close",
            "start": pane.start(),
            "end": pane.end(),
            "partition": partition,
            "count": count,
        }))
    }

    fn on_checkpoint(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        ckpt.add_u64(self.triggers)
    }

    fn on_reset(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        self.triggers = ckpt.get_u64()?;
        Ok(())
    }

    fn on_reset_to_initial_state(&mut self) -> Result<()> {
        self.triggers = 0;
        Ok(())
    }
}

/// Downstream of the replayed operator; forwarded watermarks are only logged.
struct LogSink;

impl OutputSink for LogSink {
    fn submit_punctuation(&self, punct: Punctuation, port: u32) -> Result<()> {
        debug!(?punct, port, "forwarded watermark");
        Ok(())
    }
}

pub fn open_store(config: &CheckpointConfig) -> anyhow::Result<Arc<dyn DataStore>> {
    Ok(match &config.store_path {
        Some(path) => Arc::new(
            FsDataStore::new(path)
                .with_context(|| format!("opening checkpoint store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryDataStore::new()),
    })
}

/// Replay `input` and write window events to `out`.
pub fn run<W: Write>(
    config: &EngineConfig,
    options: &ReplayOptions,
    input: impl BufRead,
    out: W,
) -> anyhow::Result<ReplaySummary> {
    let attribute = EventTimeAttribute::new(
        vec![0],
        EventTimeType::Int64,
        config.event_time.resolution,
    );
    let connections: Vec<ConnectionId> = (0..options.input_ports)
        .map(|port| ConnectionId::new(JOB_ID, port, 0, port))
        .collect();
    let time = EventTimeContext::new(JOB_ID, OPERATOR_INDEX, Arc::new(LogSink))
        .with_input_connections(connections)
        .with_output_port(Some(attribute))
        .with_generation(&config.event_time);
    let mode = time.initialize_mode(options.input_ports == 0)?;

    let printer = EventPrinter { out, triggers: 0 };
    let mut window = TimeIntervalWindow::from_config(&config.window, printer)
        .context("building the window")?;

    let store = open_store(&config.checkpoint)?;
    let mut checkpoints = CheckpointContext::new(store, CHECKPOINT_ENTRY)
        .with_incremental_interval(config.checkpoint.incremental_interval)
        .with_retry(config.checkpoint.retry_policy());
    let mut next_id = 1;
    if options.resume {
        if let Some(id) = checkpoints.latest_checkpoint_id()? {
            checkpoints
                .restore_checkpoint(id, &mut window)
                .with_context(|| format!("restoring checkpoint {id}"))?;
            let restored = window.watermark();
            if !restored.is_unset() {
                time.set_watermark(restored)?;
            }
            info!(id, watermark = %restored, "resumed from checkpoint");
            next_id = id + 1;
        }
    }

    let mut summary = ReplaySummary::default();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.context("reading replay input")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {}: malformed record", lineno + 1))?;
        summary.records += 1;

        match record {
            ReplayRecord::Tuple {
                event_time,
                partition,
                value,
            } => {
                let tuple = Tuple::new(vec![
                    Value::Int64(event_time),
                    Value::Str(value.clone()),
                ]);
                let t = time.event_time_for_output(&tuple, 0)?;
                match window.insert_tuple(value, t, partition)? {
                    InsertOutcome::Inserted => summary.inserted += 1,
                    InsertOutcome::Late => summary.late += 1,
                    InsertOutcome::Dropped => summary.dropped += 1,
                    InsertOutcome::Unassigned => summary.unassigned += 1,
                }
                if mode == WatermarkMode::OutputEventTime {
                    if let Some(wm) = time.on_tuple_submitted(&tuple, 0)? {
                        summary.watermarks += 1;
                        window.insert_watermark(wm)?;
                    }
                }
            }
            ReplayRecord::Watermark { port, value } => {
                if options.input_ports == 0 {
                    bail!("line {}: watermark record for a source operator", lineno + 1);
                }
                let punct = Punctuation::watermark(WatermarkPayload::new(
                    JOB_ID,
                    port,
                    0,
                    Watermark::new(value),
                ));
                if let Some(wm) = time
                    .process_watermark(&punct, port)
                    .with_context(|| format!("line {}", lineno + 1))?
                {
                    summary.watermarks += 1;
                    window.insert_watermark(wm)?;
                }
            }
        }

        if let Some(every) = options.checkpoint_every {
            if every > 0 && summary.records % every == 0 {
                let metadata = checkpoints.create_checkpoint(next_id, &mut window, None)?;
                debug!(id = next_id, base_id = metadata.base_id, "replay checkpoint");
                next_id += 1;
                summary.checkpoints += 1;
            }
        }
    }

    let wm = window.watermark();
    summary.final_watermark = (!wm.is_unset()).then_some(wm.timestamp);
    info!(
        records = summary.records,
        inserted = summary.inserted,
        late = summary.late,
        dropped = summary.dropped,
        checkpoints = summary.checkpoints,
        "replay finished"
    );
    Ok(summary)
}

/// Resolve the input path, `-` meaning stdin.
pub fn input_reader(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening replay input {}", path.display()))?;
    Ok(Box::new(std::io::BufReader::new(file)))
}

#[cfg(test)]
#[path = "tests/replay_tests.rs"]
mod tests;
