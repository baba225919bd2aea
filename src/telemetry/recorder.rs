use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::event::{ArtifactRef, Event};
use super::reporter::EventReporter;
use super::value::Meta;
use crate::config::RecorderConfig;
use crate::error::{Result, TrackError};

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const DEFAULT_ARTIFACT_PREFIX: &str = "data";
pub const DEFAULT_ARTIFACT_FORMAT: &str = "bin";

const ARTIFACT_ID_BASE: u64 = 1000;

/// Observer invoked with every recorded event and the reporter it went to.
pub type EventCallback = Box<dyn FnMut(&Event, &str) -> anyhow::Result<()>>;

/// Where and how an artifact gets stored.
#[derive(Debug, Clone, Default)]
pub struct ArtifactOptions {
    pub prefix: String,
    /// Fixed file stem. When set, no artifact id is allocated.
    pub persist_name: String,
    pub format: String,
    pub meta: Meta,
}

impl ArtifactOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn persist_name(mut self, name: impl Into<String>) -> Self {
        self.persist_name = name.into();
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }
}

/// Shared owner of every reporter and the artifacts directory of one run.
///
/// Ownership is counted explicitly: each Tracker handle calls `share()` when
/// created and `unshare()` when released. The recorder finalizes its reporters
/// when the count drops to zero and refuses further work afterwards.
pub struct EventRecorder {
    result_dir: PathBuf,
    artifacts_dir: PathBuf,
    dry_run: bool,
    flush_threshold: usize,
    reporters: HashMap<String, EventReporter>,
    callbacks: Vec<EventCallback>,
    share_count: usize,
    finalized: bool,
    last_artifact_id: u64,
    last_span_id: u64,
}

impl EventRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let artifacts_dir = config.result_dir.join(ARTIFACTS_DIR);
        if !config.dry_run {
            fs::create_dir_all(&artifacts_dir)?;
        }
        debug!(
            result_dir = %config.result_dir.display(),
            dry_run = config.dry_run,
            "event recorder created"
        );

        Ok(Self {
            result_dir: config.result_dir,
            artifacts_dir,
            dry_run: config.dry_run,
            flush_threshold: config.flush_threshold,
            reporters: HashMap::new(),
            callbacks: Vec::new(),
            share_count: 0,
            finalized: false,
            last_artifact_id: ARTIFACT_ID_BASE,
            last_span_id: 0,
        })
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn share_count(&self) -> usize {
        self.share_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Names of the reporters opened so far, sorted.
    pub fn reporter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reporters.keys().cloned().collect();
        names.sort();
        names
    }

    fn ensure_live(&self) -> Result<()> {
        if self.finalized {
            return Err(TrackError::RecorderFinalized);
        }
        Ok(())
    }

    pub fn register_callback(&mut self, cb: EventCallback) -> Result<()> {
        self.ensure_live()?;
        self.callbacks.push(cb);
        Ok(())
    }

    /// Persists `evt` through `reporter` (created on first use), then fans it
    /// out to every callback. Callback failures are logged and skipped.
    pub fn record_event(&mut self, mut evt: Event, reporter: &str) -> Result<()> {
        self.ensure_live()?;

        if !self.dry_run {
            self.reporter_mut(reporter)?.record_event(&mut evt)?;
        }

        for (idx, callback) in self.callbacks.iter_mut().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&evt, reporter))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(callback = idx, reporter, "failed to run callback: {:#}", e),
                Err(_) => warn!(callback = idx, reporter, "callback panicked"),
            }
        }
        Ok(())
    }

    fn reporter_mut(&mut self, name: &str) -> Result<&mut EventReporter> {
        let reporter = match self.reporters.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let path = self.result_dir.join(format!("{}.event.json", name));
                e.insert(EventReporter::open(name, &path, self.flush_threshold)?)
            }
        };
        Ok(reporter)
    }

    fn next_artifact_id(&mut self) -> u64 {
        self.last_artifact_id += 1;
        self.last_artifact_id
    }

    /// Allocates a span id. Span ids and artifact ids are separate sequences.
    pub fn next_span_id(&mut self) -> Result<String> {
        self.ensure_live()?;
        self.last_span_id += 1;
        Ok(self.last_span_id.to_string())
    }

    /// Names the artifact, hands `save` its final path, and returns the
    /// reference to embed in an event. `save` is skipped in dry-run mode.
    /// Save errors are returned to the caller untouched.
    pub fn save_artifact<T, F>(&mut self, data: &T, save: F, opts: ArtifactOptions) -> Result<ArtifactRef>
    where
        T: ?Sized,
        F: FnOnce(&T, &Path) -> anyhow::Result<()>,
    {
        self.ensure_live()?;

        let format = if opts.format.is_empty() {
            DEFAULT_ARTIFACT_FORMAT.to_string()
        } else {
            opts.format
        };
        let name = if !opts.persist_name.is_empty() {
            format!("{}.{}", opts.persist_name, format)
        } else {
            let prefix = if opts.prefix.is_empty() {
                DEFAULT_ARTIFACT_PREFIX
            } else {
                opts.prefix.as_str()
            };
            format!("{}_{}.{}", prefix, self.next_artifact_id(), format)
        };

        if !self.dry_run {
            let path = self.artifacts_dir.join(&name);
            save(data, &path).map_err(|source| TrackError::Artifact {
                name: name.clone(),
                source,
            })?;
            debug!(artifact = %name, "saved artifact");
        }

        Ok(ArtifactRef::new(name, format, opts.meta))
    }

    pub fn share(&mut self) {
        if self.finalized {
            warn!("share() on a finalized recorder");
            return;
        }
        self.share_count += 1;
    }

    /// Drops one share. The last one finalizes every reporter exactly once.
    pub fn unshare(&mut self) -> Result<()> {
        if self.finalized {
            return Err(TrackError::RecorderFinalized);
        }
        self.share_count = self.share_count.saturating_sub(1);
        if self.share_count == 0 {
            return self.finalize();
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalized = true;
        let mut first_err = None;
        for (name, mut reporter) in self.reporters.drain() {
            if let Err(e) = reporter.finalize() {
                warn!(reporter = %name, "failed to finalize reporter: {}", e);
                first_err.get_or_insert(e);
            }
        }
        debug!(result_dir = %self.result_dir.display(), "event recorder finalized");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
