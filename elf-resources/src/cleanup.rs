// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Process exit safety net.

Every [crate::ResourceFile] registers itself here when opened and
unregisters when closed or dropped. Temporary directories created by
[crate::extract] are registered as well. When the process exits, anything
still registered is closed (flushing pending changes) or deleted.

Handles still open at exit that were not opened internally by this crate
are reported as leaks.
*/

use {
    crate::backend::Backend,
    log::warn,
    once_cell::sync::Lazy,
    std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex, MutexGuard, Once, Weak,
        },
    },
};

pub(crate) type SharedBackend = Arc<Mutex<Box<dyn Backend>>>;

struct HandleEntry {
    id: u64,
    internal: bool,
    path: PathBuf,
    backend: Weak<Mutex<Box<dyn Backend>>>,
}

/// What a drain of the registry did.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Paths of handles opened by callers that were never closed.
    pub leaked: Vec<PathBuf>,
    /// Paths of handles opened internally that were closed.
    pub internal_closed: Vec<PathBuf>,
    /// Temporary directories that were deleted.
    pub folders_removed: Vec<PathBuf>,
    /// Descriptions of failed flushes and deletions.
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.leaked.is_empty()
            && self.internal_closed.is_empty()
            && self.folders_removed.is_empty()
            && self.failures.is_empty()
    }
}

/// Tracks open handles and temporary directories.
#[derive(Default)]
pub struct Registry {
    handles: Vec<HandleEntry>,
    folders: Vec<PathBuf>,
}

impl Registry {
    pub(crate) fn register_handle(
        &mut self,
        id: u64,
        path: &Path,
        backend: &SharedBackend,
        internal: bool,
    ) {
        self.handles.push(HandleEntry {
            id,
            internal,
            path: path.to_path_buf(),
            backend: Arc::downgrade(backend),
        });
    }

    /// Forget a handle. Returns whether it was registered.
    pub fn unregister_handle(&mut self, id: u64) -> bool {
        let before = self.handles.len();
        self.handles.retain(|entry| entry.id != id);

        self.handles.len() != before
    }

    /// Flag a handle as opened by this crate for its own use.
    pub fn mark_internal(&mut self, id: u64) {
        for entry in self.handles.iter_mut().filter(|entry| entry.id == id) {
            entry.internal = true;
        }
    }

    pub fn register_folder(&mut self, path: &Path) {
        self.folders.push(path.to_path_buf());
    }

    pub fn unregister_folder(&mut self, path: &Path) {
        self.folders.retain(|p| p != path);
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Close every registered handle and delete every registered folder.
    ///
    /// The registry is empty afterwards.
    pub fn drain(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for entry in std::mem::take(&mut self.handles) {
            let backend = match entry.backend.upgrade() {
                Some(backend) => backend,
                None => continue,
            };

            let mut backend = backend.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = backend.flush() {
                report
                    .failures
                    .push(format!("flushing {}: {}", entry.path.display(), e));
            }

            if entry.internal {
                report.internal_closed.push(entry.path);
            } else {
                report.leaked.push(entry.path);
            }
        }

        for folder in std::mem::take(&mut self.folders) {
            match std::fs::remove_dir_all(&folder) {
                Ok(()) => report.folders_removed.push(folder),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report
                    .failures
                    .push(format!("removing {}: {}", folder.display(), e)),
            }
        }

        report
    }
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static EXIT_HOOK: Once = Once::new();

pub(crate) fn next_handle_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Obtain the process-wide registry.
pub fn registry() -> MutexGuard<'static, Registry> {
    install_exit_hook();

    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(unix)]
extern "C" fn exit_hook() {
    let _ = std::panic::catch_unwind(|| {
        if let Ok(mut registry) = REGISTRY.try_lock() {
            report(&registry.drain());
        }
    });
}

#[cfg(unix)]
fn install_exit_hook() {
    EXIT_HOOK.call_once(|| {
        if unsafe { libc::atexit(exit_hook) } != 0 {
            warn!("unable to install exit handler; leaked resources will not be cleaned up");
        }
    });
}

#[cfg(not(unix))]
fn install_exit_hook() {}

fn report(report: &CleanupReport) {
    for path in &report.leaked {
        warn!("resource handle for {} was never closed", path.display());
        eprintln!(
            "warning: resource handle for {} was not closed before exit",
            path.display()
        );
    }
    for failure in &report.failures {
        warn!("cleanup failed: {}", failure);
    }
}

/// Drain the process-wide registry now.
///
/// This is what runs at process exit.
pub fn run_cleanup() -> CleanupReport {
    let res = registry().drain();
    report(&res);

    res
}
