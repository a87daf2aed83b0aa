//! Recursive inotify watcher that hands new files to an ingestion command.
//!
//! This crate watches a directory tree on Linux and reacts to entries being
//! created or deleted:
//!
//! - a new **subdirectory** gets its own watch, so the whole tree stays covered
//!   as it grows;
//! - a new **file** is handed to an external handler together with its *root
//!   token*, the path component naming the category it landed in;
//! - **deletions** are only logged.
//!
//! Inotify reports events against the watch descriptor of the parent directory
//! plus a bare entry name. The [`WatchRegistry`] maps descriptors back to
//! paths, and the [`Dispatcher`] decodes raw batches, resolves parents and
//! decides what each event means.
//!
//! # Platform Support
//!
//! **Linux only** (uses inotify directly through `libc`).
//!
//! # Quick Start
//!
//! ```no_run
//! use ingest_watch::{CommandHandler, DispatchOptions, Dispatcher, Inotify};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ingest_watch::WatchError> {
//!     let handler = CommandHandler::new("bash").args(["/opt/ingester.sh"]);
//!     let mut dispatcher = Dispatcher::new(
//!         Inotify::new()?,
//!         handler,
//!         DispatchOptions::new("/home/airavata/inputData"),
//!     );
//!     dispatcher.watch_root()?;
//!     dispatcher.run().await;
//!     Ok(())
//! }
//! ```
//!
//! A file created at `/home/airavata/inputData/catA/sub/file.txt` then runs
//! `bash /opt/ingester.sh catA /home/airavata/inputData/catA/sub/file.txt`
//! without waiting for it to finish.
//!
//! # Root Tokens
//!
//! The token is purely positional: the component at
//! [`DispatchOptions::token_component`] (zero-based, default `3`) of the new
//! file's absolute path. Paths too shallow for the index have no token, and
//! the handler receives an empty argument in its place.
//!
//! | Path | Index | Token |
//! |------|-------|-------|
//! | `/home/airavata/inputData/catA/sub/file.txt` | 3 | `catA` |
//! | `/base/newdir/report.csv` | 1 | `newdir` |
//! | `/a/b/c` | 3 | none |
//!
//! # Failure Handling
//!
//! Only failing to create the inotify instance or to watch the root is fatal.
//! Read failures, truncated batches, unknown parent handles, watch
//! registration failures and handler launch failures are logged and the loop
//! carries on.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod inotify;
pub mod logging;
pub mod registry;

pub use config::Settings;
pub use dispatch::{
    classify, root_token, DispatchDecision, DispatchOptions, Dispatcher, IgnoreReason,
};
pub use error::WatchError;
pub use handler::{CommandHandler, IngestHandler, LogHandler};
pub use inotify::{EventMask, Events, Inotify, RawEvent, WatchHandle, WatchSource};
pub use registry::{WatchEntry, WatchRegistry};
