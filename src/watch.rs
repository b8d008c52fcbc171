//! Filesystem change notification.
//!
//! A watcher owns one notification descriptor and a poll thread that turns create/delete
//! events into human-readable strings for the callback. Only Linux has a backend; elsewhere
//! [`FsWatcher::new`] returns [`WatchError::Unsupported`].
use std::path::Path;

use crate::error::WatchError;

/// Callback receiving rendered event descriptions on the watcher's own thread.
pub type EventCallback = Box<dyn Fn(String) + Send + 'static>;

/// Identifier returned by [`FsWatcher::add_watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[cfg(target_os = "linux")]
pub use linux::FsWatcher;

#[cfg(target_os = "linux")]
mod linux {
    use std::{
        collections::HashMap,
        ffi::OsStr,
        io,
        path::{Path, PathBuf},
        sync::{
            Arc, Mutex, MutexGuard, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    };

    use nix::{
        errno::Errno,
        sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor},
    };
    use tracing::{debug, warn};

    use super::{EventCallback, WatchId};
    use crate::error::WatchError;

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    type Watches = Arc<Mutex<HashMap<WatchDescriptor, (WatchId, PathBuf)>>>;

    /// Linux watcher on top of inotify.
    pub struct FsWatcher {
        inotify: Arc<Inotify>,
        watches: Watches,
        next_id: u64,
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    fn lock(watches: &Watches) -> MutexGuard<'_, HashMap<WatchDescriptor, (WatchId, PathBuf)>> {
        watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Renders one event as `"<KIND>: <watched dir> <name> [file|directory]"`.
    pub(super) fn describe(mask: AddWatchFlags, dir: Option<&Path>, name: Option<&OsStr>) -> String {
        let kind = if mask.contains(AddWatchFlags::IN_DELETE) {
            "IN_DELETE: "
        } else if mask.contains(AddWatchFlags::IN_CREATE) {
            "IN_CREATE: "
        } else if mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
            "IN_CLOSE_WRITE: "
        } else if mask.contains(AddWatchFlags::IN_CLOSE_NOWRITE) {
            "IN_CLOSE_NOWRITE: "
        } else if mask.contains(AddWatchFlags::IN_OPEN) {
            "IN_OPEN: "
        } else {
            ""
        };

        let mut out = String::from(kind);
        if let Some(dir) = dir {
            out.push_str(&dir.to_string_lossy());
            out.push(' ');
        }
        if let Some(name) = name {
            out.push_str(&name.to_string_lossy());
        }
        out.push_str(if mask.contains(AddWatchFlags::IN_ISDIR) {
            " [directory]"
        } else {
            " [file]"
        });
        out
    }

    fn poll_loop(inotify: Arc<Inotify>, watches: Watches, stop: Arc<AtomicBool>, callback: EventCallback) {
        while !stop.load(Ordering::SeqCst) {
            match inotify.read_events() {
                Ok(events) => {
                    for event in events {
                        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                            continue;
                        }
                        let dir = lock(&watches).get(&event.wd).map(|(_, path)| path.clone());
                        callback(describe(event.mask, dir.as_deref(), event.name.as_deref()));
                    }
                }
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    warn!("reading change notifications failed: {err}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        debug!("filesystem watcher stopped");
    }

    impl FsWatcher {
        /// Creates the notification descriptor and starts the poll thread.
        pub fn new<F>(callback: F) -> Result<Self, WatchError>
        where
            F: Fn(String) + Send + 'static,
        {
            let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
                .map_err(|errno| WatchError::Init(io::Error::from(errno)))?;
            let inotify = Arc::new(inotify);
            let watches: Watches = Arc::default();
            let stop = Arc::new(AtomicBool::new(false));

            let thread = thread::Builder::new()
                .name("sysvc-watch".into())
                .spawn({
                    let inotify = Arc::clone(&inotify);
                    let watches = Arc::clone(&watches);
                    let stop = Arc::clone(&stop);
                    let callback: EventCallback = Box::new(callback);
                    move || poll_loop(inotify, watches, stop, callback)
                })
                .map_err(WatchError::Init)?;

            Ok(Self {
                inotify,
                watches,
                next_id: 0,
                stop,
                thread: Some(thread),
            })
        }

        /// Watches `path` for entries being created or deleted.
        pub fn add_watch(&mut self, path: &Path) -> Result<WatchId, WatchError> {
            let wd = self
                .inotify
                .add_watch(path, AddWatchFlags::IN_CREATE | AddWatchFlags::IN_DELETE)
                .map_err(|errno| WatchError::Add {
                    path: path.to_path_buf(),
                    source: io::Error::from(errno),
                })?;

            let mut watches = lock(&self.watches);
            // Re-adding a path yields the same descriptor; keep its first id.
            let id = match watches.get(&wd) {
                Some((id, _)) => *id,
                None => {
                    self.next_id += 1;
                    let id = WatchId(self.next_id);
                    watches.insert(wd, (id, path.to_path_buf()));
                    id
                }
            };
            debug!(path = %path.display(), "watch added");
            Ok(id)
        }

        pub fn watch_count(&self) -> usize {
            lock(&self.watches).len()
        }

        /// Removes every watch, returning how many removals failed.
        pub fn stop_all_watch(&mut self) -> Result<(), WatchError> {
            let drained: Vec<_> = lock(&self.watches).drain().collect();
            let mut failed = 0;
            for (wd, (_, path)) in drained {
                if let Err(err) = self.inotify.rm_watch(wd) {
                    warn!(path = %path.display(), "failed to remove watch: {err}");
                    failed += 1;
                }
            }

            if failed == 0 {
                Ok(())
            } else {
                Err(WatchError::Remove { failed })
            }
        }
    }

    impl Drop for FsWatcher {
        fn drop(&mut self) {
            let _ = self.stop_all_watch();
            self.stop.store(true, Ordering::SeqCst);
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("filesystem watcher thread panicked");
            }
        }
    }
}

/// Placeholder on platforms without a change-notification backend.
#[cfg(not(target_os = "linux"))]
pub struct FsWatcher {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl FsWatcher {
    pub fn new<F>(_callback: F) -> Result<Self, WatchError>
    where
        F: Fn(String) + Send + 'static,
    {
        Err(WatchError::Unsupported)
    }

    pub fn add_watch(&mut self, _path: &Path) -> Result<WatchId, WatchError> {
        Err(WatchError::Unsupported)
    }

    pub fn watch_count(&self) -> usize {
        0
    }

    pub fn stop_all_watch(&mut self) -> Result<(), WatchError> {
        Ok(())
    }
}

/// Watches every path in `paths`, logging the ones that cannot be watched.
pub fn watch_all<'a>(
    watcher: &mut FsWatcher,
    paths: impl IntoIterator<Item = &'a Path>,
) -> Vec<WatchId> {
    paths
        .into_iter()
        .filter_map(|path| match watcher.add_watch(path) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!("{err}");
                None
            }
        })
        .collect()
}
