use anyhow::Context;
use serde::Serialize;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use crate::config::RecorderConfig;
use crate::error::Result;
use crate::telemetry::recorder::EventRecorder;
use crate::telemetry::value::{Fields, Meta};
use crate::tracker::setting::{TrackerSetting, DEFAULT_REPORTER};
use crate::tracker::Tracker;

/// Root tracker for a run rooted at `result_dir`.
pub fn create(result_dir: impl Into<PathBuf>, dry_run: bool) -> Result<Tracker> {
    create_with(RecorderConfig::new(result_dir).with_dry_run(dry_run))
}

/// Root tracker: reporter `"default"`, empty meta, log events recorded.
/// Its perf clock starts now.
pub fn create_with(config: RecorderConfig) -> Result<Tracker> {
    let recorder = EventRecorder::new(config)?;
    let settings = TrackerSetting::new(DEFAULT_REPORTER, Meta::new()).with_record_log_event(true);
    Ok(Tracker::new(
        Rc::new(RefCell::new(recorder)),
        settings,
        Fields::new(),
        Instant::now(),
    ))
}

/// Local time as `YYYYmmdd-HHMMSS`, for run directory names.
pub fn str_datetime() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Artifact save function writing `data` as a YAML document.
///
/// The document is block-indented JSON, which every YAML 1.2 parser reads.
pub fn save_yaml<T: Serialize + ?Sized>(data: &T, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("encoding {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
