use anyhow::anyhow;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::Event;
use super::recorder::EventCallback;

/// What an async consumer receives: the event and its reporter name.
pub type RecordedEvent = (Event, String);

/// Callback that forwards every recorded event into `tx`.
///
/// Never blocks the recording path: a full or closed channel is reported as a
/// callback failure, which the recorder logs and skips.
pub fn channel_callback(tx: mpsc::Sender<RecordedEvent>) -> EventCallback {
    Box::new(move |evt: &Event, reporter: &str| {
        match tx.try_send((evt.clone(), reporter.to_string())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("event channel full, dropping event {}", evt.id)),
            Err(TrySendError::Closed(_)) => Err(anyhow!("event channel closed")),
        }
    })
}
