pub mod config;
pub mod error;
pub mod run;
pub mod telemetry;
pub mod tracker;

// Re-export the surface most callers need
pub use config::RecorderConfig;
pub use error::{Result, TrackError};
pub use run::{create, create_with, save_yaml, str_datetime};
pub use telemetry::event::{ArtifactRef, Event, EventKind};
pub use telemetry::reader::Reader;
pub use telemetry::recorder::{ArtifactOptions, EventCallback, EventRecorder};
pub use telemetry::value::{fields, Fields, Meta, Value};
pub use tracker::{LogLevel, SpanGuard, Tracker, TrackerSetting};
