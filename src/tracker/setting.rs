use crate::telemetry::value::{merge_into, Meta};

pub const DEFAULT_REPORTER: &str = "default";

/// Immutable tracker configuration. Combine with [`TrackerSetting::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSetting {
    /// Target reporter. Empty means "inherit" when merging and `"default"` when recording.
    pub reporter: String,
    pub meta: Meta,
    /// Tri-state: `None` never overrides an earlier explicit value.
    pub record_log_event: Option<bool>,
}

impl TrackerSetting {
    pub fn new(reporter: impl Into<String>, meta: Meta) -> Self {
        Self {
            reporter: reporter.into(),
            meta,
            record_log_event: None,
        }
    }

    pub fn with_record_log_event(mut self, record: bool) -> Self {
        self.record_log_event = Some(record);
        self
    }

    /// Right-biased merge: non-empty reporter wins, meta keys from `newer`
    /// win, `record_log_event` only changes when `newer` sets it.
    pub fn merge(&self, newer: &TrackerSetting) -> TrackerSetting {
        let reporter = if newer.reporter.is_empty() {
            self.reporter.clone()
        } else {
            newer.reporter.clone()
        };
        let mut meta = self.meta.clone();
        merge_into(&mut meta, &newer.meta);

        TrackerSetting {
            reporter,
            meta,
            record_log_event: newer.record_log_event.or(self.record_log_event),
        }
    }

    pub fn reporter_or_default(&self) -> &str {
        if self.reporter.is_empty() {
            DEFAULT_REPORTER
        } else {
            &self.reporter
        }
    }

    pub fn records_log_events(&self) -> bool {
        self.record_log_event.unwrap_or(false)
    }
}
