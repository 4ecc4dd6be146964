// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handles to binaries holding embedded resources.

use {
    crate::{
        backend::{open_backend, Access, Backend, BackendKind},
        cleanup::{self, SharedBackend},
        error::{ElfResourceError, Result},
        format::{self, StorageType},
        status,
    },
    log::debug,
    std::{
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    },
};

/// Options controlling how a [ResourceFile] is opened.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    access: Access,
    backend: Option<BackendKind>,
    internal: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            access: Access::Read,
            backend: None,
            internal: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Use a specific backend instead of the environment or default choice.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }

    /// Mark the handle as opened for the crate's own use.
    ///
    /// Internal handles left open at exit are closed without a leak warning.
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    fn resolve_backend(&self, access: Access) -> Result<BackendKind> {
        Ok(match self.backend {
            Some(kind) => kind,
            None => BackendKind::from_env()?.unwrap_or_else(|| BackendKind::default_for(access)),
        })
    }

    fn open_with(&self, path: &Path, access: Access) -> Result<ResourceFile> {
        let kind = self.resolve_backend(access)?;
        let backend: SharedBackend = Arc::new(Mutex::new(open_backend(kind, path, access)?));
        let id = cleanup::next_handle_id();

        cleanup::registry().register_handle(id, path, &backend, self.internal);

        Ok(ResourceFile {
            id,
            path: path.to_path_buf(),
            access,
            kind,
            backend,
            closed: false,
        })
    }

    /// Open a binary.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<ResourceFile> {
        status::record("open", self.open_with(path.as_ref(), self.access))
    }

    /// Open the currently running executable.
    ///
    /// The requested access mode is ignored: the handle is always read-only.
    pub fn open_self(&self) -> Result<ResourceFile> {
        let res = std::env::current_exe()
            .map_err(ElfResourceError::from)
            .and_then(|path| self.open_with(&path, Access::Read));

        status::record("open", res)
    }
}

/// An open binary whose resources can be read and written.
///
/// Dropping a handle closes it, flushing pending changes. Use
/// [ResourceFile::close] to observe flush errors.
///
/// Operations are not synchronized with other handles to the same file.
pub struct ResourceFile {
    id: u64,
    path: PathBuf,
    access: Access,
    kind: BackendKind,
    backend: SharedBackend,
    closed: bool,
}

impl std::fmt::Debug for ResourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("access", &self.access)
            .field("backend", &self.kind)
            .finish()
    }
}

impl ResourceFile {
    /// Open a binary with the default backend for the access mode.
    pub fn open(path: impl AsRef<Path>, access: Access) -> Result<Self> {
        OpenOptions::new().access(access).open(path)
    }

    /// Open the currently running executable read-only.
    pub fn open_self() -> Result<Self> {
        OpenOptions::new().open_self()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    pub(crate) fn with_backend<T>(
        &self,
        f: impl FnOnce(&mut dyn Backend) -> Result<T>,
    ) -> Result<T> {
        let mut backend = self.backend.lock().unwrap_or_else(|e| e.into_inner());

        f(&mut **backend)
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        cleanup::registry().unregister_handle(self.id);

        self.with_backend(|backend| backend.flush())
    }

    /// Close the handle, persisting all changes.
    pub fn close(mut self) -> Result<()> {
        let res = self.close_inner();

        status::record("close", res)
    }

    /// Store a resource.
    ///
    /// Fails with [ElfResourceError::Overwrite] if a region with the name
    /// exists and `overwrite` is false.
    pub fn write(
        &mut self,
        name: &str,
        data: &[u8],
        storage: StorageType,
        overwrite: bool,
    ) -> Result<()> {
        let res = self.with_backend(|backend| {
            format::write_resource(backend, name, data, storage, overwrite)
        });

        status::record("write", res)
    }

    /// Retrieve the content of a resource.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let res = self.with_backend(|backend| format::read_resource(backend, name));

        status::record("read", res)
    }

    /// Retrieve the content of a resource into `buffer`.
    ///
    /// The buffer must hold at least [ResourceFile::size] bytes. Returns the
    /// number of bytes written.
    pub fn read_into(&self, name: &str, buffer: &mut [u8]) -> Result<usize> {
        let res = self.with_backend(|backend| format::read_into(backend, name, buffer));

        status::record("read", res)
    }

    /// Uncompressed size of a resource.
    pub fn size(&self, name: &str) -> Result<u64> {
        let res = self.with_backend(|backend| format::resource_size(backend, name));

        status::record("size", res)
    }

    /// Name of the resource at `index`, if there are that many.
    pub fn list(&self, index: usize) -> Option<String> {
        let res = self.with_backend(|backend| format::list_resource(backend, index));

        status::record("list", res).ok().flatten()
    }

    /// Names of all resources.
    pub fn names(&self) -> Result<Vec<String>> {
        let res = self.with_backend(|backend| format::resource_names(backend));

        status::record("list", res)
    }

    /// Number of resources.
    pub fn resources(&self) -> usize {
        let res = self.with_backend(|backend| format::count_resources(backend));

        status::record("resources", res).unwrap_or(0)
    }

    /// Remove a resource.
    pub fn clear(&mut self, name: &str) -> Result<()> {
        let res = self.with_backend(|backend| format::clear_resource(backend, name));

        status::record("clear", res)
    }
}

impl Drop for ResourceFile {
    fn drop(&mut self) {
        if !self.closed {
            debug!("closing {} on drop", self.path.display());

            if let Err(e) = self.close_inner() {
                debug!("error closing {}: {}", self.path.display(), e);
            }
        }
    }
}
