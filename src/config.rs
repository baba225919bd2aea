use std::path::PathBuf;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

/// Recorder construction parameters.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Root of the run: reporter files and the `artifacts/` directory live here.
    pub result_dir: PathBuf,
    /// No filesystem mutation at all; callbacks still fire.
    pub dry_run: bool,
    /// A reporter flushes once its buffer grows past this many events.
    pub flush_threshold: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("."),
            dry_run: false,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl RecorderConfig {
    pub fn new(result_dir: impl Into<PathBuf>) -> Self {
        Self {
            result_dir: result_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Overlay `ZTRACK_RESULT_DIR`, `ZTRACK_DRY_RUN` and `ZTRACK_FLUSH_THRESHOLD`.
    /// Unparseable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        let mut cfg = self;
        if let Ok(dir) = std::env::var("ZTRACK_RESULT_DIR") {
            if !dir.is_empty() {
                cfg.result_dir = PathBuf::from(dir);
            }
        }
        if let Ok(flag) = std::env::var("ZTRACK_DRY_RUN") {
            cfg.dry_run = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(threshold) = std::env::var("ZTRACK_FLUSH_THRESHOLD")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            cfg.flush_threshold = threshold;
        }
        cfg
    }
}
