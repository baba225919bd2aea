use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::event::{ArtifactRef, Event};
use super::recorder::ARTIFACTS_DIR;
use crate::error::Result;

const EVENT_FILE_SUFFIX: &str = ".event.json";

/// Read-only view of a finished (or in-progress) run directory.
#[derive(Debug, Clone)]
pub struct Reader {
    result_dir: PathBuf,
}

impl Reader {
    pub fn new(result_dir: impl Into<PathBuf>) -> Self {
        Self {
            result_dir: result_dir.into(),
        }
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Reporter names with a file on disk, sorted.
    pub fn reporters(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.result_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(EVENT_FILE_SUFFIX)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn event_path(&self, reporter: &str) -> PathBuf {
        self.result_dir.join(format!("{}{}", reporter, EVENT_FILE_SUFFIX))
    }

    /// Every event written by `reporter`, in file order. Blank lines are skipped.
    pub fn events(&self, reporter: &str) -> Result<Vec<Event>> {
        let file = File::open(self.event_path(reporter))?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    pub fn artifact_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.result_dir.join(ARTIFACTS_DIR).join(&artifact.url)
    }
}
