//! Event dispatcher.
//!
//! Reads raw batches from a [`WatchSource`], decodes them, resolves each
//! record's parent through the [`WatchRegistry`] and acts on it:
//!
//! ```text
//! read batch -> decode -> resolve parent -> compose path -> classify
//!                                                             |
//!        +--------------------+-------------------------------+------------+
//!        |                    |                                            |
//! NewSubdirectory          NewFile                          Deleted* / Ignored
//! add watch + insert    root token + launch handler              log only
//! ```
//!
//! Deletions never touch the registry or the watch set.
//!
//! A new directory is scanned right after its watch is added. Directories
//! found inside it are watched and regular files are handed to the handler,
//! which covers entries written before the watch existed (`mkdir -p a/b &&
//! cp f a/b/`). A file landing between the watch and the scan is seen by both
//! and reaches the handler twice. The startup scan of the root only adds
//! watches; files already present then are not ingested.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::dispatch_log;
use crate::error::WatchError;
use crate::handler::IngestHandler;
use crate::inotify::{EventMask, Events, RawEvent, WatchHandle, WatchSource, MAX_RECORD_LEN};
use crate::registry::WatchRegistry;

/// Default read buffer, room for roughly a thousand short-named records.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default position of the category component in a new file's path.
pub const DEFAULT_TOKEN_COMPONENT: usize = 3;

const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What a single raw event means for the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    /// A directory appeared under a watched parent.
    NewSubdirectory { path: PathBuf },
    /// A file appeared under a watched parent.
    NewFile { path: PathBuf },
    /// A directory was removed. `path` is set when the parent still resolves.
    DeletedDirectory {
        name: OsString,
        path: Option<PathBuf>,
    },
    DeletedFile {
        name: OsString,
        path: Option<PathBuf>,
    },
    Ignored(IgnoreReason),
}

/// Why an event was dropped without action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event carries no entry name (e.g. `IN_IGNORED` on the watch itself).
    Unnamed,
    /// The parent handle was never registered.
    UnresolvedParent(WatchHandle),
    /// The kernel queue overflowed and events were lost.
    QueueOverflow,
    /// Neither a create nor a delete.
    Unhandled(EventMask),
}

/// Classify `event` against the current registry contents.
pub fn classify(event: &RawEvent, registry: &WatchRegistry) -> DispatchDecision {
    if event.mask.contains(EventMask::Q_OVERFLOW) {
        return DispatchDecision::Ignored(IgnoreReason::QueueOverflow);
    }

    let Some(name) = event.name.as_deref() else {
        return DispatchDecision::Ignored(IgnoreReason::Unnamed);
    };

    let child = registry.child_path(event.handle, name);

    if event.mask.contains(EventMask::CREATE) {
        let Some(path) = child else {
            return DispatchDecision::Ignored(IgnoreReason::UnresolvedParent(event.handle));
        };
        if event.mask.is_dir() {
            DispatchDecision::NewSubdirectory { path }
        } else {
            DispatchDecision::NewFile { path }
        }
    } else if event.mask.contains(EventMask::DELETE) {
        let name = name.to_os_string();
        if event.mask.is_dir() {
            DispatchDecision::DeletedDirectory { name, path: child }
        } else {
            DispatchDecision::DeletedFile { name, path: child }
        }
    } else {
        DispatchDecision::Ignored(IgnoreReason::Unhandled(event.mask))
    }
}

/// The path component at `index`, counting only named components.
///
/// `/home/airavata/inputData/catA/sub/file.txt` at index 3 is `catA`. Paths
/// too shallow for the index have no token.
pub fn root_token(path: &Path, index: usize) -> Option<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .nth(index)
        .map(|part| part.to_string_lossy().into_owned())
}

/// Settings the dispatcher runs with.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Directory watched recursively.
    pub root: PathBuf,
    /// Prefix for the path handed to the handler, in place of `root`.
    pub base: PathBuf,
    /// Index of the root token component in a new file's full path.
    pub token_component: usize,
    /// Watch subdirectories that already exist when the root is registered.
    pub scan_existing: bool,
    pub buffer_size: usize,
}

impl DispatchOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DispatchOptions {
            base: root.clone(),
            root,
            token_component: DEFAULT_TOKEN_COMPONENT,
            scan_existing: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Single-consumer event loop owning the registry.
pub struct Dispatcher<S, H> {
    source: S,
    handler: H,
    registry: WatchRegistry,
    options: DispatchOptions,
    buffer: Vec<u8>,
}

impl<S: WatchSource, H: IngestHandler> Dispatcher<S, H> {
    pub fn new(source: S, handler: H, options: DispatchOptions) -> Self {
        let buffer = vec![0u8; options.buffer_size.max(MAX_RECORD_LEN)];
        Dispatcher {
            source,
            handler,
            registry: WatchRegistry::new(),
            options,
            buffer,
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Register the root watch, and its existing subdirectories if enabled.
    ///
    /// Failing to watch the root itself is fatal to the caller.
    pub fn watch_root(&mut self) -> Result<WatchHandle, WatchError> {
        let root = self.options.root.clone();
        let handle = self.add_tree_watch(root.clone())?;
        dispatch_log!(info, "watching", "{} as {}", root.display(), handle);

        if self.options.scan_existing {
            self.scan_directory(&root, false);
            dispatch_log!(
                info,
                "initial scan",
                "{} directories watched",
                self.registry.len()
            );
        }
        Ok(handle)
    }

    fn add_tree_watch(&mut self, path: PathBuf) -> Result<WatchHandle, WatchError> {
        match self.source.add_watch(&path, EventMask::TREE) {
            Ok(handle) => {
                self.registry.insert(handle, path);
                Ok(handle)
            }
            Err(source) => Err(WatchError::WatchFailed { path, source }),
        }
    }

    /// Depth-first walk below the already watched `dir`.
    ///
    /// Every directory found gets a watch. With `ingest_files`, regular files
    /// found along the way go to the handler as if just created.
    fn scan_directory(&mut self, dir: &Path, ingest_files: bool) {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let (dirs, files) = list_entries(&current);
            if ingest_files {
                for file in &files {
                    self.ingest(file);
                }
            }
            for path in dirs {
                match self.add_tree_watch(path.clone()) {
                    Ok(handle) => {
                        dispatch_log!(debug, "watch", "{} as {}", path.display(), handle);
                        stack.push(path);
                    }
                    Err(e) => dispatch_log!(warn, "watch failed", "{e}; subtree not monitored"),
                }
            }
        }
    }

    /// Derive the root token for `path` and launch the handler.
    fn ingest(&self, path: &Path) {
        let token = root_token(path, self.options.token_component);
        let target = self.handler_path(path);
        dispatch_log!(
            info,
            "new file",
            "{} (root {})",
            path.display(),
            token.as_deref().unwrap_or("<none>")
        );
        if token.is_none() {
            dispatch_log!(
                warn,
                "no root token",
                "{} has no component at index {}",
                path.display(),
                self.options.token_component
            );
        }
        if let Err(e) = self.handler.launch(token.as_deref(), &target) {
            dispatch_log!(warn, "handler failed", "{e}");
        }
    }

    /// Path handed to the handler: `base` joined with the path below `root`.
    fn handler_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.options.root) {
            Ok(relative) => self.options.base.join(relative),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Classify one event and carry out its side effect.
    pub fn dispatch(&mut self, event: &RawEvent) -> DispatchDecision {
        let decision = classify(event, &self.registry);

        match &decision {
            DispatchDecision::NewSubdirectory { path } => {
                match self.add_tree_watch(path.clone()) {
                    Ok(handle) => {
                        dispatch_log!(info, "new directory", "{} as {}", path.display(), handle);
                        self.scan_directory(path, true);
                    }
                    Err(e) => dispatch_log!(warn, "watch failed", "{e}; subtree not monitored"),
                }
            }
            DispatchDecision::NewFile { path } => self.ingest(path),
            DispatchDecision::DeletedDirectory { name, path } => {
                dispatch_log!(
                    info,
                    "directory deleted",
                    "{}",
                    display_deleted(name, path.as_deref())
                );
            }
            DispatchDecision::DeletedFile { name, path } => {
                dispatch_log!(
                    info,
                    "file deleted",
                    "{}",
                    display_deleted(name, path.as_deref())
                );
            }
            DispatchDecision::Ignored(IgnoreReason::UnresolvedParent(handle)) => {
                dispatch_log!(
                    warn,
                    "unresolved parent",
                    "event {:?} for {:?} under unknown watch {}",
                    event.mask,
                    event.name,
                    handle
                );
            }
            DispatchDecision::Ignored(IgnoreReason::QueueOverflow) => {
                dispatch_log!(warn, "queue overflow", "events were lost");
            }
            DispatchDecision::Ignored(reason) => {
                dispatch_log!(debug, "ignored", "{:?}", reason);
            }
        }

        decision
    }

    /// Read one batch and dispatch every record in it.
    ///
    /// Returns the number of records dispatched. Records ahead of a truncated
    /// tail are still dispatched before the error is returned.
    pub async fn next_batch(&mut self) -> Result<usize, WatchError> {
        let len = self
            .source
            .read_events(&mut self.buffer)
            .await
            .map_err(|source| WatchError::ReadFailed { source })?;
        if len == 0 {
            return Err(WatchError::EmptyRead);
        }

        let buffer = std::mem::take(&mut self.buffer);
        let result = self.dispatch_batch(&buffer[..len]);
        self.buffer = buffer;
        result
    }

    fn dispatch_batch(&mut self, batch: &[u8]) -> Result<usize, WatchError> {
        let mut count = 0;
        for event in Events::new(batch) {
            self.dispatch(&event?);
            count += 1;
        }
        Ok(count)
    }

    /// Process batches until the task is dropped.
    ///
    /// Read failures are logged and the next read is attempted after a short
    /// pause; nothing here ends the loop.
    pub async fn run(&mut self) {
        loop {
            match self.next_batch().await {
                Ok(count) => dispatch_log!(debug, "batch", "{} events", count),
                Err(e) => {
                    dispatch_log!(error, "read failed", "{e}");
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Subdirectories and regular files directly inside `dir`. Symlinks are skipped.
fn list_entries(dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return (dirs, files);
    };
    for entry in entries.flatten() {
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => dirs.push(entry.path()),
            Ok(ft) if ft.is_file() => files.push(entry.path()),
            _ => {}
        }
    }
    (dirs, files)
}

fn display_deleted(name: &OsString, path: Option<&Path>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => name.to_string_lossy().into_owned(),
    }
}
