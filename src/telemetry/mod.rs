//! Event recording core.
//!
//! # ON-DISK LAYOUT
//! `{result_dir}/{reporter}.event.json` holds one JSON object per line, append-only.
//! `{result_dir}/artifacts/` holds payloads written by caller-supplied save functions.
//!
//! # INVARIANT
//! Event ids are assigned by the reporter that persists them and never repeat
//! within one file. In dry-run mode nothing touches the filesystem and ids stay empty.

pub mod event;
pub mod reader;
pub mod recorder;
pub mod reporter;
pub mod sink;
pub mod value;
