pub mod setting;
pub mod span;

use serde::Serialize;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, warn, Level};

use crate::error::{Result, TrackError};
use crate::run::save_yaml;
use crate::telemetry::event::{ArtifactRef, Event, EventKind};
use crate::telemetry::recorder::{ArtifactOptions, EventRecorder};
use crate::telemetry::value::{fields, merge_into, Fields, Meta};

pub use setting::TrackerSetting;
pub use span::SpanGuard;

/// Handle to the recorder shared by a family of trackers.
pub type SharedRecorder = Rc<RefCell<EventRecorder>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Name stored in `data["log.level"]`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn as_tracing(&self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn enabled(&self) -> bool {
        match self {
            LogLevel::Debug => tracing::enabled!(target: "ztrack", Level::DEBUG),
            LogLevel::Info => tracing::enabled!(target: "ztrack", Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: "ztrack", Level::WARN),
            LogLevel::Error => tracing::enabled!(target: "ztrack", Level::ERROR),
        }
    }

    fn emit(&self, line: &str) {
        match self {
            LogLevel::Debug => tracing::debug!(target: "ztrack", "{}", line),
            LogLevel::Info => tracing::info!(target: "ztrack", "{}", line),
            LogLevel::Warn => tracing::warn!(target: "ztrack", "{}", line),
            LogLevel::Error => tracing::error!(target: "ztrack", "{}", line),
        }
    }
}

/// One buffered `track()` contribution awaiting commit.
#[derive(Debug, Clone, Default)]
struct TrackItem {
    fields: Option<Fields>,
    meta: Option<Meta>,
}

/// Per-call-site recording handle.
///
/// Derived trackers (`clone`, `with_settings`, `with_fields`, spans) share
/// one recorder; each holds one share of it until finalized or dropped.
/// Settings and fields are copied, never shared, so deriving a tracker
/// does not affect its parent.
pub struct Tracker {
    recorder: SharedRecorder,
    settings: TrackerSetting,
    fields: Fields,
    perf_origin: Instant,
    pending: Vec<TrackItem>,
    released: bool,
}

impl Tracker {
    /// Takes one share of `recorder`.
    pub fn new(recorder: SharedRecorder, settings: TrackerSetting, fields: Fields, perf_origin: Instant) -> Self {
        recorder.borrow_mut().share();
        Self {
            recorder,
            settings,
            fields,
            perf_origin,
            pending: Vec::new(),
            released: false,
        }
    }

    pub fn recorder(&self) -> &SharedRecorder {
        &self.recorder
    }

    pub fn settings(&self) -> &TrackerSetting {
        &self.settings
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Number of uncommitted `track` contributions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn with_settings(&self, reporter: &str, meta: Meta, record_log_event: Option<bool>) -> Tracker {
        self.with_setting(&TrackerSetting {
            reporter: reporter.to_string(),
            meta,
            record_log_event,
        })
    }

    pub fn with_setting(&self, setting: &TrackerSetting) -> Tracker {
        let mut tracker = self.clone();
        tracker.settings = self.settings.merge(setting);
        tracker
    }

    pub fn with_reporter(&self, reporter: &str) -> Tracker {
        self.with_settings(reporter, Meta::new(), None)
    }

    pub fn with_meta(&self, meta: Meta) -> Tracker {
        self.with_settings("", meta, None)
    }

    pub fn with_fields(&self, overlay: Fields) -> Tracker {
        let mut tracker = self.clone();
        merge_into(&mut tracker.fields, &overlay);
        tracker
    }

    /// Record `fields` as one committed `z.tk` event.
    pub fn track(&mut self, fields: Fields) -> Result<&mut Self> {
        self.track_with(Some(fields), None, true)
    }

    /// Buffer a contribution; on `commit` merge the overlay and every buffered
    /// contribution (later wins) into a single `z.tk` event.
    pub fn track_with(&mut self, fields: Option<Fields>, meta: Option<Meta>, commit: bool) -> Result<&mut Self> {
        self.ensure_live()?;
        self.pending.push(TrackItem { fields, meta });
        if !commit {
            return Ok(self);
        }

        let mut data = self.fields.clone();
        let mut event_meta = self.settings.meta.clone();
        for item in self.pending.drain(..) {
            if let Some(f) = item.fields {
                merge_into(&mut data, &f);
            }
            if let Some(m) = item.meta {
                merge_into(&mut event_meta, &m);
            }
        }

        let evt = self.create_event(EventKind::Track, event_meta, data);
        self.record(evt)?;
        Ok(self)
    }

    pub fn debug(&mut self, msg: &str) -> Result<&mut Self> {
        self.log(LogLevel::Debug, msg)
    }

    pub fn info(&mut self, msg: &str) -> Result<&mut Self> {
        self.log(LogLevel::Info, msg)
    }

    pub fn warn(&mut self, msg: &str) -> Result<&mut Self> {
        self.log(LogLevel::Warn, msg)
    }

    pub fn error(&mut self, msg: &str) -> Result<&mut Self> {
        self.log(LogLevel::Error, msg)
    }

    pub fn log(&mut self, level: LogLevel, msg: &str) -> Result<&mut Self> {
        self.log_filtered(level, msg, &[], None)
    }

    pub fn debug_filtered(&mut self, msg: &str, exclude: &[&str], include: Option<&[&str]>) -> Result<&mut Self> {
        self.log_filtered(LogLevel::Debug, msg, exclude, include)
    }

    pub fn info_filtered(&mut self, msg: &str, exclude: &[&str], include: Option<&[&str]>) -> Result<&mut Self> {
        self.log_filtered(LogLevel::Info, msg, exclude, include)
    }

    pub fn warn_filtered(&mut self, msg: &str, exclude: &[&str], include: Option<&[&str]>) -> Result<&mut Self> {
        self.log_filtered(LogLevel::Warn, msg, exclude, include)
    }

    pub fn error_filtered(&mut self, msg: &str, exclude: &[&str], include: Option<&[&str]>) -> Result<&mut Self> {
        self.log_filtered(LogLevel::Error, msg, exclude, include)
    }

    /// Two independent outputs: a `z.log` event when the settings ask for it,
    /// and a `"{msg} k=v ..."` line whenever the process logger takes `level`.
    /// `exclude` drops keys from the line; a non-empty `include` keeps only those.
    pub fn log_filtered(
        &mut self,
        level: LogLevel,
        msg: &str,
        exclude: &[&str],
        include: Option<&[&str]>,
    ) -> Result<&mut Self> {
        self.ensure_live()?;

        if self.settings.records_log_events() {
            let mut data = self.fields.clone();
            data.insert("log.level".to_string(), level.as_str().into());
            data.insert("log.msg".to_string(), msg.into());
            let evt = self.create_event(EventKind::Log, self.settings.meta.clone(), data);
            self.record(evt)?;
        }

        if level.enabled() {
            let line = format!("{} {}", msg, self.format_log_fields(exclude, include));
            level.emit(&line);
        }
        Ok(self)
    }

    fn format_log_fields(&self, exclude: &[&str], include: Option<&[&str]>) -> String {
        let include = include.filter(|keys| !keys.is_empty());
        self.fields
            .iter()
            .filter(|(k, _)| !exclude.contains(&k.as_str()))
            .filter(|(k, _)| include.map_or(true, |keys| keys.contains(&k.as_str())))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Store `data` through `save` under the artifacts directory and return
    /// a reference to put in tracked fields.
    pub fn artifact<T, F>(&self, data: &T, save: F, opts: ArtifactOptions) -> Result<ArtifactRef>
    where
        T: ?Sized,
        F: FnOnce(&T, &Path) -> anyhow::Result<()>,
    {
        self.ensure_live()?;
        self.recorder.borrow_mut().save_artifact(data, save, opts)
    }

    /// Persist `data` as `{name}.yaml` and track it as `{config: <ref>}`.
    pub fn track_config<T: Serialize + ?Sized>(&mut self, data: &T, name: &str) -> Result<&mut Self> {
        let config = self.artifact(
            data,
            |d, path| save_yaml(d, path),
            ArtifactOptions::new().persist_name(name).format("yaml"),
        )?;
        self.track_with(
            Some(fields([("config", config)])),
            Some(fields([("z.type", "config")])),
            true,
        )
    }

    pub fn register_event_callback<F>(&self, cb: F) -> Result<()>
    where
        F: FnMut(&Event, &str) -> anyhow::Result<()> + 'static,
    {
        self.ensure_live()?;
        self.recorder.borrow_mut().register_callback(Box::new(cb))
    }

    /// Release this handle's share of the recorder. Idempotent; the last
    /// release across all derived trackers flushes and closes every reporter.
    pub fn finalize(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if !self.pending.is_empty() {
            debug!(items = self.pending.len(), "discarding uncommitted track items");
            self.pending.clear();
        }
        self.recorder.borrow_mut().unshare()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(TrackError::RecorderFinalized);
        }
        Ok(())
    }

    fn perf_ts(&self) -> i64 {
        self.perf_origin.elapsed().as_nanos() as i64
    }

    fn create_event(&self, kind: EventKind, meta: Meta, data: Fields) -> Event {
        Event::new(kind, self.perf_ts(), meta, data)
    }

    /// Fields overlay plus `extra`, recorded as `kind` with the settings' meta.
    fn emit(&self, kind: EventKind, extra: Fields) -> Result<()> {
        self.ensure_live()?;
        let mut data = self.fields.clone();
        merge_into(&mut data, &extra);
        let evt = self.create_event(kind, self.settings.meta.clone(), data);
        self.record(evt)
    }

    fn record(&self, evt: Event) -> Result<()> {
        let reporter = self.settings.reporter_or_default();
        self.recorder.borrow_mut().record_event(evt, reporter)
    }
}

impl Clone for Tracker {
    fn clone(&self) -> Self {
        Tracker::new(
            Rc::clone(&self.recorder),
            self.settings.clone(),
            self.fields.clone(),
            self.perf_origin,
        )
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("failed to finalize tracker: {}", e);
        }
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("settings", &self.settings)
            .field("fields", &self.fields)
            .field("pending", &self.pending.len())
            .field("released", &self.released)
            .finish()
    }
}
