use serde::{Deserialize, Serialize};

use super::value::{Fields, Meta, Value};

/// Timestamp layout written into `Event::ts` (local timezone, second resolution).
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S %z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "z.tk")]
    Track,
    #[serde(rename = "z.log")]
    Log,
    #[serde(rename = "z.span")]
    Span,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Track => "z.tk",
            EventKind::Log => "z.log",
            EventKind::Span => "z.span",
        }
    }
}

/// One line of a reporter file.
///
/// `id` stays empty until a reporter assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub ts: String,
    /// Nanoseconds since the owning Tracker tree was created (monotonic clock).
    pub perf_ts: i64,
    pub meta: Meta,
    pub data: Fields,
}

impl Event {
    pub fn new(kind: EventKind, perf_ts: i64, meta: Meta, data: Fields) -> Self {
        Self {
            id: String::new(),
            kind,
            ts: chrono::Local::now().format(TS_FORMAT).to_string(),
            perf_ts,
            meta,
            data,
        }
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArtifactKind {
    #[default]
    #[serde(rename = "artifact")]
    Artifact,
}

/// Pointer to a payload stored under `{result_dir}/artifacts/`.
/// Never carries the payload itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// File name relative to the artifacts directory.
    pub url: String,
    pub format: String,
    #[serde(default)]
    pub meta: Meta,
}

impl ArtifactRef {
    pub fn new(url: impl Into<String>, format: impl Into<String>, meta: Meta) -> Self {
        Self {
            kind: ArtifactKind::Artifact,
            url: url.into(),
            format: format.into(),
            meta,
        }
    }
}
