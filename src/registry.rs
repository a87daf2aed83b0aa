//! Watch handle registry.
//!
//! Inotify reports events against the watch descriptor of the parent
//! directory plus a bare entry name, never a full path. The registry is the
//! translation table back to paths, grown as new subdirectories are watched.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::inotify::WatchHandle;

/// A single handle → path mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEntry<'a> {
    pub handle: WatchHandle,
    pub path: &'a Path,
}

/// Mapping from watch handle to the absolute directory path it watches.
///
/// Entries are never removed while the watcher runs; the whole table goes
/// away with the inotify instance.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: HashMap<WatchHandle, PathBuf>,
}

impl WatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `path` under `handle`, returning the path it replaced, if any.
    pub fn insert(&mut self, handle: WatchHandle, path: PathBuf) -> Option<PathBuf> {
        self.watches.insert(handle, path)
    }

    /// Look up the directory watched by `handle`.
    pub fn get(&self, handle: WatchHandle) -> Option<&Path> {
        self.watches.get(&handle).map(PathBuf::as_path)
    }

    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.watches.contains_key(&handle)
    }

    /// Compose `parent / name` where `parent` is the path behind `handle`.
    pub fn child_path(&self, handle: WatchHandle, name: &OsStr) -> Option<PathBuf> {
        self.get(handle).map(|parent| parent.join(name))
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Iterate over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = WatchEntry<'_>> {
        self.watches.iter().map(|(handle, path)| WatchEntry {
            handle: *handle,
            path: path.as_path(),
        })
    }
}
