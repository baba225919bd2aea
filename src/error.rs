use thiserror::Error;

/// Errors surfaced by the recording core.
///
/// Callback failures never show up here: they are absorbed and logged at the
/// dispatch site.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The recorder's share count reached zero; it no longer owns any files.
    #[error("recorder finalized")]
    RecorderFinalized,

    /// A caller-supplied save function failed.
    #[error("failed to save artifact {name}: {source}")]
    Artifact {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, TrackError>;
