// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Container manipulation backends.

A backend opens an ELF file and exposes its sections as named [Region]s.
The resource framing layer in [crate::format] only ever talks to the
[Backend] trait, so the same resource logic runs on top of any of the
implementations here:

* [edit::EditBackend] parses with `goblin` and rewrites the section table
  itself with `scroll`, maintaining the section name string table by hand.
* [build::BuildBackend] delegates every structural edit to the `object`
  crate's ELF builder and persists through a scratch file.
* [read::ReadBackend] is a dependency-free section table parser. It can
  only read.
*/

pub mod build;
pub mod edit;
pub mod read;

use {
    crate::error::{ElfResourceError, Result},
    log::debug,
    std::{
        fmt::{Display, Formatter},
        fs::File,
        io::ErrorKind as IoErrorKind,
        path::Path,
        str::FromStr,
        sync::Once,
    },
};

/// Environment variable consulted for the backend to use when none is given.
pub const BACKEND_ENV: &str = "ELF_RESOURCES_BACKEND";

/// Requested access mode of a handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Available backend implementations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackendKind {
    /// `goblin` parsing with hand-maintained section and string tables.
    Edit,
    /// `object` crate ELF builder.
    Build,
    /// Read-only section table parser.
    Read,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Build => "build",
            Self::Read => "read",
        }
    }

    /// The backend used for an access mode when nothing else is requested.
    pub fn default_for(access: Access) -> Self {
        match access {
            Access::Read => Self::Read,
            Access::ReadWrite => Self::Edit,
        }
    }

    /// Resolve the backend named by [BACKEND_ENV], if set.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(BACKEND_ENV) {
            Ok(value) if !value.is_empty() => Ok(Some(Self::from_str(&value)?)),
            _ => Ok(None),
        }
    }

    /// Every backend kind.
    pub fn all() -> &'static [BackendKind] {
        &[Self::Edit, Self::Build, Self::Read]
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = ElfResourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "edit" => Ok(Self::Edit),
            "build" => Ok(Self::Build),
            "read" => Ok(Self::Read),
            _ => Err(ElfResourceError::InvalidParams(format!(
                "unknown backend: {}",
                s
            ))),
        }
    }
}

/// A named storage area inside a container.
///
/// Regions are snapshots: they are produced by a backend and only meaningful
/// when handed back to the backend that produced them. Any structural
/// change to the container may invalidate previously obtained regions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Region {
    /// Index of the section in the container's section table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File offset of the region's payload.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the region's payload in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Capabilities every container backend provides.
///
/// Operations on a single backend are not internally synchronized.
pub trait Backend: Send {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Access mode the container was opened with.
    fn access(&self) -> Access;

    /// Find the first region with the exact given name in table order.
    ///
    /// Fails with [ElfResourceError::NoSection] if there is none.
    fn find(&mut self, name: &str) -> Result<Region>;

    /// Append a new, empty region with the given name.
    ///
    /// The container must already have a section name table.
    fn add(&mut self, name: &str) -> Result<Region>;

    /// Remove a region and its name from the container.
    fn remove(&mut self, region: &Region) -> Result<()>;

    /// The region following `after` (or the first one), skipping regions
    /// without content.
    fn next(&mut self, after: Option<&Region>) -> Result<Option<Region>>;

    /// Resolve the current name of a region.
    fn name_of(&mut self, region: &Region) -> Option<String>;

    /// Obtain the full payload of a region.
    fn payload(&mut self, region: &Region) -> Result<Vec<u8>>;

    /// Obtain at most the first `len` bytes of a region's payload.
    fn peek(&mut self, region: &Region, len: usize) -> Result<Vec<u8>> {
        let mut data = self.payload(region)?;
        data.truncate(len);

        Ok(data)
    }

    /// Size of a region's payload.
    fn size_of(&mut self, region: &Region) -> u64 {
        region.size
    }

    /// Replace the payload of a region from `offset` onwards with `data`.
    ///
    /// After this returns, the region payload is the first `offset` bytes of
    /// the previous payload followed by `data`.
    fn replace_payload(&mut self, region: &Region, offset: usize, data: &[u8]) -> Result<()>;

    /// Persist all outstanding changes.
    fn flush(&mut self) -> Result<()>;
}

static INIT_EDIT: Once = Once::new();
static INIT_BUILD: Once = Once::new();
static INIT_READ: Once = Once::new();

/// Perform one-time initialization of a backend.
pub fn initialize(kind: BackendKind) {
    let once = match kind {
        BackendKind::Edit => &INIT_EDIT,
        BackendKind::Build => &INIT_BUILD,
        BackendKind::Read => &INIT_READ,
    };

    once.call_once(|| {
        debug!("initializing {} backend", kind);

        if kind == BackendKind::Read {
            read::initialize();
        }
    });
}

/// Open a container with the given backend.
pub fn open_backend(kind: BackendKind, path: &Path, access: Access) -> Result<Box<dyn Backend>> {
    initialize(kind);
    debug!("opening {} with {} backend ({:?})", path.display(), kind, access);

    Ok(match kind {
        BackendKind::Edit => Box::new(edit::EditBackend::open(path, access)?),
        BackendKind::Build => Box::new(build::BuildBackend::open(path, access)?),
        BackendKind::Read => Box::new(read::ReadBackend::open(path, access)?),
    })
}

/// Open the underlying file for the requested access.
pub(crate) fn open_file(path: &Path, access: Access) -> Result<File> {
    let res = match access {
        Access::Read => File::open(path),
        Access::ReadWrite => std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path),
    };

    res.map_err(|e| match (access, e.kind()) {
        (Access::ReadWrite, IoErrorKind::PermissionDenied) => {
            ElfResourceError::WritePermission(path.to_path_buf())
        }
        _ => ElfResourceError::OpenFailed(path.to_path_buf(), e),
    })
}

/// Whether data begins with the ELF identification magic.
pub(crate) fn has_elf_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == [0x7f, b'E', b'L', b'F']
}

/// Resolve a NUL terminated string at `offset` inside a string table.
pub(crate) fn table_string(table: &[u8], offset: usize) -> Option<String> {
    let tail = table.get(offset..)?;
    let end = tail.iter().position(|b| *b == 0)?;

    Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Compute the payload that results from replacing `current` at `offset`.
pub(crate) fn spliced_payload(current: &[u8], offset: usize, data: &[u8]) -> Result<Vec<u8>> {
    if offset > current.len() {
        return Err(ElfResourceError::SizeMismatch(format!(
            "write offset {} beyond payload of {} bytes",
            offset,
            current.len()
        )));
    }

    let mut res = Vec::with_capacity(offset + data.len());
    res.extend_from_slice(&current[..offset]);
    res.extend_from_slice(data);

    Ok(res)
}

/// Validate a region name before storing it in a name table.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        Err(ElfResourceError::InvalidParams(
            "region name must not be empty".to_string(),
        ))
    } else if name.as_bytes().contains(&0) {
        Err(ElfResourceError::InvalidParams(format!(
            "region name contains NUL byte: {:?}",
            name
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parsing() {
        for kind in BackendKind::all() {
            assert_eq!(BackendKind::from_str(kind.name()).unwrap(), *kind);
        }

        assert!(matches!(
            BackendKind::from_str("libbfd"),
            Err(ElfResourceError::InvalidParams(_))
        ));
        assert_eq!(BackendKind::default_for(Access::Read), BackendKind::Read);
        assert_eq!(
            BackendKind::default_for(Access::ReadWrite),
            BackendKind::Edit
        );
    }

    #[test]
    fn string_table_lookup() {
        let table = b"\0.text\0.shstrtab\0";

        assert_eq!(table_string(table, 0).unwrap(), "");
        assert_eq!(table_string(table, 1).unwrap(), ".text");
        assert_eq!(table_string(table, 3).unwrap(), "ext");
        assert_eq!(table_string(table, 7).unwrap(), ".shstrtab");
        assert!(table_string(table, 100).is_none());
        assert!(table_string(b"\0unterminated", 1).is_none());
    }

    #[test]
    fn payload_splicing() {
        assert_eq!(spliced_payload(b"", 0, b"RES1").unwrap(), b"RES1");
        assert_eq!(
            spliced_payload(b"RES1\0old", 5, b"new").unwrap(),
            b"RES1\0new"
        );
        assert_eq!(spliced_payload(b"abc", 0, b"").unwrap(), b"");
        assert!(matches!(
            spliced_payload(b"abc", 4, b"x"),
            Err(ElfResourceError::SizeMismatch(_))
        ));
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("icon.png").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad\0name").is_err());
    }
}
