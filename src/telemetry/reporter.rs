use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::event::Event;
use crate::error::Result;

/// One named channel backed by one append-only JSON-lines file.
pub struct EventReporter {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    buffer: Vec<Event>,
    flush_threshold: usize,
    last_id: u64,
}

impl EventReporter {
    /// Opens (or creates) `path` in append mode so earlier runs are preserved.
    /// Ids continue after the highest id already in the file.
    pub fn open(name: &str, path: &Path, flush_threshold: usize) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let last_id = last_recorded_id(path)?;
        debug!(reporter = name, path = %path.display(), last_id, "opened event reporter");

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            buffer: Vec::with_capacity(flush_threshold + 1),
            flush_threshold,
            last_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Stamps `evt.id` with the next id and buffers a copy of it.
    pub fn record_event(&mut self, evt: &mut Event) -> Result<()> {
        self.last_id += 1;
        evt.id = self.last_id.to_string();
        self.buffer.push(evt.clone());

        if self.buffer.len() > self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes every buffered event as one line, in order, then syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };

        for evt in &self.buffer {
            serde_json::to_writer(&mut *writer, evt)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(reporter = %self.name, events = self.buffer.len(), "flushed events");
        self.buffer.clear();
        Ok(())
    }

    /// Final flush, then close. Later calls are no-ops.
    pub fn finalize(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        self.writer = None;
        debug!(reporter = %self.name, "closed event reporter");
        flushed
    }
}

#[derive(Deserialize)]
struct RecordedId {
    id: String,
}

/// Highest numeric id in an existing event file, 0 when empty.
/// Lines that do not parse are skipped.
fn last_recorded_id(path: &Path) -> Result<u64> {
    if path.metadata()?.len() == 0 {
        return Ok(0);
    }
    let mut last = 0;
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RecordedId>(&line) {
            Ok(rec) => {
                if let Ok(id) = rec.id.parse::<u64>() {
                    last = last.max(id);
                }
            }
            Err(e) => debug!(path = %path.display(), "skipping unreadable event line: {}", e),
        }
    }
    Ok(last)
}

impl Drop for EventReporter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!(reporter = %self.name, "failed to finalize reporter on drop: {}", e);
        }
    }
}
