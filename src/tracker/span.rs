use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::warn;

use super::{LogLevel, Tracker};
use crate::error::{Result, TrackError};
use crate::telemetry::event::EventKind;
use crate::telemetry::value::{fields, Meta, Value};

/// Elapsed time in milliseconds, truncated to two decimals.
pub fn elapsed_ms(started: Instant) -> f64 {
    let ns = started.elapsed().as_nanos();
    (ns / 10_000) as f64 / 100.0
}

/// A live span. Derefs to the span's child tracker, whose settings carry
/// `span.id` and `span.name` in their meta.
///
/// The `stopped` event is emitted by [`SpanGuard::finish`], or on drop if
/// the guard goes out of scope first (early return, `?`, panic). It goes out
/// through the guard's own share, so finalizing or replacing the lent
/// tracker does not lose it.
pub struct SpanGuard {
    tracker: Tracker,
    owner: Tracker,
    name: String,
    span_id: String,
    started: Instant,
    log_end_span: bool,
    finished: bool,
}

impl SpanGuard {
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit the `stopped` event now and surface any recording error.
    pub fn finish(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let elapsed = elapsed_ms(self.started);
        let logged = if self.log_end_span {
            let msg = format!("span {} finished", self.name);
            self.owner
                .with_fields(fields([("span.elapsed_ms", elapsed)]))
                .log(LogLevel::Info, &msg)
                .map(|_| ())
        } else {
            Ok(())
        };
        self.owner.emit(
            EventKind::Span,
            fields([
                ("span.event", Value::from("stopped")),
                ("span.elapsed_ms", Value::from(elapsed)),
            ]),
        )?;
        logged
    }
}

impl Deref for SpanGuard {
    type Target = Tracker;

    fn deref(&self) -> &Tracker {
        &self.tracker
    }
}

impl DerefMut for SpanGuard {
    fn deref_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(span_name = %self.name, span_id = %self.span_id, "failed to stop span: {}", e);
        }
    }
}

impl Tracker {
    pub fn span(&self, name: &str) -> Result<SpanGuard> {
        self.span_with(name, false)
    }

    /// Open a span: allocate an id, derive the child tracker and emit the
    /// `started` event. With `log_end_span`, stopping also writes an info line.
    pub fn span_with(&self, name: &str, log_end_span: bool) -> Result<SpanGuard> {
        self.ensure_live()?;
        let span_id = self.recorder.borrow_mut().next_span_id()?;

        let meta: Meta = fields([
            ("span.id", span_id.as_str()),
            ("span.name", name),
        ]);
        let owner = self.with_settings("", meta, None);
        let tracker = owner.clone();
        let started = Instant::now();
        owner.emit(EventKind::Span, fields([("span.event", "started")]))?;

        Ok(SpanGuard {
            tracker,
            owner,
            name: name.to_string(),
            span_id,
            started,
            log_end_span,
            finished: false,
        })
    }

    /// Run `f` inside a span. The `stopped` event is written on every exit
    /// path; an error from `f` takes precedence over one from stopping.
    pub fn in_span<R, E, F>(&self, name: &str, log_end_span: bool, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut Tracker) -> std::result::Result<R, E>,
        E: From<TrackError>,
    {
        let mut guard = self.span_with(name, log_end_span)?;
        let out = f(&mut *guard);
        let stopped = guard.finish();
        match (out, stopped) {
            (Err(e), Err(stop_err)) => {
                warn!("failed to stop span after error: {}", stop_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(stop_err)) => Err(stop_err.into()),
            (Ok(v), Ok(())) => Ok(v),
        }
    }
}
