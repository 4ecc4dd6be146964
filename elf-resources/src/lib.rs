// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resources embedded in ELF binaries.
//!
//! This crate stores named blobs of data (images, UI definitions, message
//! catalogs, icons) inside sections of an ELF executable or shared library
//! and reads them back, either from another binary or from the running
//! executable itself. Applications can ship as a single file without
//! giving up on external data files.
//!
//! Each resource occupies its own section. The section payload starts with
//! a small header identifying it as a resource and describing whether the
//! data is stored verbatim or zlib compressed. Sections without that header
//! are left alone, so resources coexist with everything else in the binary.
//!
//! # Usage
//!
//! ```no_run
//! use elf_resources::{Access, ResourceFile, StorageType};
//!
//! let mut file = ResourceFile::open("target/app", Access::ReadWrite)?;
//! file.write("ui.xml", b"<interface/>", StorageType::Compressed, false)?;
//! file.close()?;
//!
//! let file = ResourceFile::open("target/app", Access::Read)?;
//! assert_eq!(file.read("ui.xml")?, b"<interface/>");
//! # Ok::<(), elf_resources::ElfResourceError>(())
//! ```
//!
//! # Backends
//!
//! Access to the container goes through the [Backend] trait. Three
//! implementations exist; see the [backend] module. By default read-only
//! handles use the self-contained section table parser and read-write
//! handles use the `goblin` based editor. The `ELF_RESOURCES_BACKEND`
//! environment variable or [OpenOptions::backend] select another one.
//!
//! # Errors
//!
//! Every operation returns a [Result]. The outcome of the most recent
//! operation on a thread is also available from [last_error].

pub mod backend;
pub use backend::{Access, Backend, BackendKind, Region};
pub mod cleanup;
mod error;
pub use error::*;
pub mod extract;
mod file;
pub use file::*;
pub mod format;
pub use format::StorageType;
pub mod icons;
mod status;
pub use status::{last_error, last_error_code, last_error_message, Status};

#[cfg(test)]
mod testutil;
