//! Inotify wrapper and raw event decoding.
//!
//! The kernel hands back a byte stream of variable-length records: a fixed
//! `inotify_event` header (`wd`, `mask`, `cookie`, `len`) followed by `len`
//! bytes of NUL-padded file name. [`Events`] walks such a batch without
//! reinterpreting the buffer in place, so a short or corrupt read surfaces as
//! [`WatchError::TruncatedBatch`] instead of undefined behaviour.

use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use bitflags::bitflags;
use tokio::io::unix::AsyncFd;

use crate::error::WatchError;

/// Size of the fixed `inotify_event` header.
pub const HEADER_LEN: usize = std::mem::size_of::<libc::inotify_event>();

const NAME_MAX: usize = 255;

/// Largest single record the kernel can emit (header plus `NAME_MAX + 1`).
pub const MAX_RECORD_LEN: usize = HEADER_LEN + NAME_MAX + 1;

/// Opaque watch descriptor issued by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub fn new(raw: i32) -> Self {
        WatchHandle(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd{}", self.0)
    }
}

bitflags! {
    /// Event and watch flags, bit-compatible with `<sys/inotify.h>`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const MODIFY = libc::IN_MODIFY;
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        const MOVED_FROM = libc::IN_MOVED_FROM;
        const MOVED_TO = libc::IN_MOVED_TO;
        const CREATE = libc::IN_CREATE;
        const DELETE = libc::IN_DELETE;
        const DELETE_SELF = libc::IN_DELETE_SELF;
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        const IGNORED = libc::IN_IGNORED;
        const ONLYDIR = libc::IN_ONLYDIR;
        const DONT_FOLLOW = libc::IN_DONT_FOLLOW;
        const ISDIR = libc::IN_ISDIR;
    }
}

impl EventMask {
    /// Mask installed on the root and on every discovered subdirectory.
    pub const TREE: EventMask = EventMask::CREATE
        .union(EventMask::DELETE)
        .union(EventMask::ONLYDIR)
        .union(EventMask::DONT_FOLLOW);

    pub fn is_dir(self) -> bool {
        self.contains(EventMask::ISDIR)
    }
}

/// One decoded record from the notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Watch the event was reported on, i.e. the parent directory.
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    /// Entry name relative to the parent, absent for events on the watch itself.
    pub name: Option<OsString>,
}

/// Iterator over the records of one read batch.
///
/// Yields a single `Err` and then stops if the batch ends mid-record.
pub struct Events<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Events<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Events { buffer, offset: 0 }
    }

    fn truncated(&mut self) -> WatchError {
        let err = WatchError::TruncatedBatch {
            offset: self.offset,
            len: self.buffer.len(),
        };
        self.offset = self.buffer.len();
        err
    }
}

impl Iterator for Events<'_> {
    type Item = Result<RawEvent, WatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let buffer = self.buffer;
        let rest = buffer.get(self.offset..).filter(|r| !r.is_empty())?;

        if rest.len() < HEADER_LEN {
            return Some(Err(self.truncated()));
        }

        let wd = read_u32(rest, 0) as i32;
        let mask = read_u32(rest, 4);
        let cookie = read_u32(rest, 8);
        let name_len = read_u32(rest, 12) as usize;

        let Some(name_bytes) = rest.get(HEADER_LEN..HEADER_LEN + name_len) else {
            return Some(Err(self.truncated()));
        };

        // The name is NUL-terminated and padded to an alignment boundary
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let name = (end > 0).then(|| OsStr::from_bytes(&name_bytes[..end]).to_os_string());

        self.offset += HEADER_LEN + name_len;

        Some(Ok(RawEvent {
            handle: WatchHandle(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        }))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}

/// The notification primitive the dispatcher is driven by.
///
/// Implemented by [`Inotify`]; tests substitute a scripted source.
#[allow(async_fn_in_trait)]
pub trait WatchSource {
    /// Register `path` for monitoring and return its handle.
    ///
    /// Watching a path that is already watched returns the existing handle.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle>;

    /// Wait for at least one record and copy a batch into `buffer`.
    async fn read_events(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

// --- Inotify Wrapper ---

/// Non-blocking inotify instance registered with the tokio reactor.
///
/// Dropping it deregisters from the reactor and then closes the descriptor,
/// which releases every watch.
pub struct Inotify {
    fd: AsyncFd<OwnedFd>,
}

impl Inotify {
    pub fn new() -> Result<Self, WatchError> {
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(WatchError::InitFailed {
                reason: io::Error::last_os_error().to_string(),
            });
        }
        // Sole owner of a freshly created descriptor
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let fd = AsyncFd::new(owned).map_err(|e| WatchError::InitFailed {
            reason: e.to_string(),
        })?;
        Ok(Self { fd })
    }
}

impl WatchSource for Inotify {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchHandle> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let wd =
            unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchHandle(wd))
    }

    async fn read_events(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                let res = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buffer.as_mut_ptr() as *mut libc::c_void,
                        buffer.len(),
                    )
                };
                if res < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(res as usize)
                }
            });
            match result {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                // Readiness was stale, wait again
                Err(_would_block) => continue,
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::encode;
    use super::*;

    #[test]
    fn test_decode_batch_of_records() {
        let mut batch = encode(1, EventMask::CREATE | EventMask::ISDIR, "newdir");
        batch.extend(encode(2, EventMask::DELETE, "report.csv"));

        let events: Vec<_> = Events::new(&batch).collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].handle, WatchHandle::new(1));
        assert!(events[0].mask.contains(EventMask::CREATE));
        assert!(events[0].mask.is_dir());
        assert_eq!(events[0].name.as_deref(), Some(OsStr::new("newdir")));
        assert_eq!(events[1].handle, WatchHandle::new(2));
        assert_eq!(events[1].name.as_deref(), Some(OsStr::new("report.csv")));
    }

    #[test]
    fn test_nameless_record() {
        let batch = encode(5, EventMask::IGNORED, "");
        let events: Vec<_> = Events::new(&batch).collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, None);
        assert!(events[0].mask.contains(EventMask::IGNORED));
    }

    #[test]
    fn test_truncated_header_after_good_record() {
        let mut batch = encode(1, EventMask::CREATE, "a.txt");
        let good_len = batch.len();
        batch.extend_from_slice(&[0u8; 6]);

        let mut events = Events::new(&batch);
        assert!(events.next().unwrap().is_ok());
        match events.next() {
            Some(Err(WatchError::TruncatedBatch { offset, len })) => {
                assert_eq!(offset, good_len);
                assert_eq!(len, batch.len());
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        assert!(events.next().is_none());
    }

    #[test]
    fn test_truncated_name() {
        let mut batch = encode(1, EventMask::CREATE, "some-long-file-name.txt");
        batch.truncate(HEADER_LEN + 4);
        let mut events = Events::new(&batch);
        assert!(matches!(
            events.next(),
            Some(Err(WatchError::TruncatedBatch { offset: 0, .. }))
        ));
        assert!(events.next().is_none());
    }

    #[test]
    fn test_unknown_bits_are_kept() {
        let raw = libc::IN_CREATE | 0x0000_8000;
        let mask = EventMask::from_bits_retain(raw);
        assert!(mask.contains(EventMask::CREATE));
        assert_eq!(mask.bits(), raw);
    }

    #[tokio::test]
    async fn test_inotify_reports_created_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut inotify = Inotify::new().unwrap();
        let root = inotify.add_watch(dir.path(), EventMask::TREE).unwrap();

        std::fs::create_dir(dir.path().join("child")).unwrap();

        let mut buffer = vec![0u8; 4096];
        let len = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            inotify.read_events(&mut buffer),
        )
        .await
        .expect("timed out waiting for inotify")
        .unwrap();

        let events: Vec<_> = Events::new(&buffer[..len])
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(events.iter().any(|e| e.handle == root
            && e.mask.contains(EventMask::CREATE | EventMask::ISDIR)
            && e.name.as_deref() == Some(OsStr::new("child"))));
    }

    #[tokio::test]
    async fn test_watch_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut inotify = Inotify::new().unwrap();
        let err = inotify
            .add_watch(&dir.path().join("missing"), EventMask::TREE)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dropped_instance_leaves_reactor_usable() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..8 {
            let mut first = Inotify::new().unwrap();
            first.add_watch(dir.path(), EventMask::TREE).unwrap();
            drop(first);
        }

        let mut second = Inotify::new().unwrap();
        let root = second.add_watch(dir.path(), EventMask::TREE).unwrap();
        std::fs::write(dir.path().join("after-drop.txt"), "x").unwrap();

        let mut buffer = vec![0u8; 4096];
        let len = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            second.read_events(&mut buffer),
        )
        .await
        .expect("timed out waiting for inotify")
        .unwrap();

        let events: Vec<_> = Events::new(&buffer[..len])
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(events.iter().any(|e| e.handle == root
            && e.name.as_deref() == Some(OsStr::new("after-drop.txt"))));
    }
}
