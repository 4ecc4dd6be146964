// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {std::path::PathBuf, thiserror::Error};

/// Numeric status codes describing the outcome of an operation.
///
/// The values are stable and mirror the status codes historically exposed by
/// C consumers of embedded ELF resources. `Ok` is zero and every failure is
/// negative.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    GetHeader = -1,
    NoNameTable = -2,
    NameTable = -3,
    GetData = -4,
    GetSectionHeader = -5,
    SizeMismatch = -6,
    Update = -7,
    NewSection = -8,
    NewData = -9,
    RemoveSection = -10,
    NoSection = -11,
    NamePointer = -12,
    NotResource = -13,
    ExpandSection = -14,
    WrongFormat = -15,
    NoPermission = -17,
    Overwrite = -21,
    Compress = -22,
    InvalidType = -23,
    InvalidParams = -25,
    Uncompress = -26,
    OpenFailed = -28,
    BeginFailed = -29,
    WritePermission = -30,
    Unsupported = -31,
    Io = -32,
    Cli = -33,
}

impl StatusCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Broad classification of failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Bad magic, truncated or garbled headers, out-of-range indices.
    Format,
    /// A named region does not exist.
    NotFound,
    /// Mutation attempted through a handle lacking write access.
    Permission,
    /// The container could not be structurally modified.
    Structural,
    /// Compression, decompression, or payload size problems.
    Codec,
    /// The backend does not implement the operation.
    Unsupported,
    /// Caller supplied arguments that cannot be honored.
    InvalidInput,
    /// Operating system I/O failure.
    Io,
}

/// Unified error type for embedded resource operations.
#[derive(Debug, Error)]
pub enum ElfResourceError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument: {0}")]
    CliBadArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary parsing error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("data structure serialization error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("object builder error: {0}")]
    ObjectBuild(#[from] object::build::Error),

    #[error("object parse error: {0}")]
    ObjectRead(#[from] object::read::Error),

    #[error("failed to obtain ELF header: {0}")]
    GetHeader(String),

    #[error("no ELF string table")]
    NoNameTable,

    #[error("failed to open string table: {0}")]
    NameTable(String),

    #[error("failed to obtain data of section {0}")]
    GetData(String),

    #[error("failed to obtain ELF section header: {0}")]
    GetSectionHeader(String),

    #[error("section's data size does not make sense: {0}")]
    SizeMismatch(String),

    #[error("failed to perform dynamic update: {0}")]
    Update(String),

    #[error("failed to create new section: {0}")]
    NewSection(String),

    #[error("failed to create data for section: {0}")]
    NewData(String),

    #[error("failed to remove section: {0}")]
    RemoveSection(String),

    #[error("ELF resource section not found: {0}")]
    NoSection(String),

    #[error("failed to obtain section string pointer for section {0}")]
    NamePointer(usize),

    #[error("not a valid resource: {0}")]
    NotResource(String),

    #[error("failed to expand section: {0}")]
    ExpandSection(String),

    #[error("invalid input file format: {0}")]
    WrongFormat(String),

    #[error("open handle with read-write access")]
    NoPermission,

    #[error("section already exists, over-write not specified: {0}")]
    Overwrite(String),

    #[error("failed to compress resource data: {0}")]
    Compress(std::io::Error),

    #[error("invalid data storage type specified: {0}")]
    InvalidType(u8),

    #[error("invalid parameters passed to function: {0}")]
    InvalidParams(String),

    #[error("failed to uncompress resource data: {0}")]
    Uncompress(String),

    #[error("failed to open input file {0}: {1}")]
    OpenFailed(PathBuf, std::io::Error),

    #[error("failed to open ELF file: {0}")]
    BeginFailed(String),

    #[error("no write permission for file {0}")]
    WritePermission(PathBuf),

    #[error("the requested operation is not supported by the {0} backend")]
    Unsupported(&'static str),
}

impl ElfResourceError {
    /// Obtain the numeric status code for this error.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::CliUnknownCommand | Self::CliBadArgument(_) => StatusCode::Cli,
            Self::Io(_) => StatusCode::Io,
            Self::Goblin(_) | Self::ObjectRead(_) => StatusCode::BeginFailed,
            Self::Scroll(_) | Self::ObjectBuild(_) => StatusCode::Update,
            Self::GetHeader(_) => StatusCode::GetHeader,
            Self::NoNameTable => StatusCode::NoNameTable,
            Self::NameTable(_) => StatusCode::NameTable,
            Self::GetData(_) => StatusCode::GetData,
            Self::GetSectionHeader(_) => StatusCode::GetSectionHeader,
            Self::SizeMismatch(_) => StatusCode::SizeMismatch,
            Self::Update(_) => StatusCode::Update,
            Self::NewSection(_) => StatusCode::NewSection,
            Self::NewData(_) => StatusCode::NewData,
            Self::RemoveSection(_) => StatusCode::RemoveSection,
            Self::NoSection(_) => StatusCode::NoSection,
            Self::NamePointer(_) => StatusCode::NamePointer,
            Self::NotResource(_) => StatusCode::NotResource,
            Self::ExpandSection(_) => StatusCode::ExpandSection,
            Self::WrongFormat(_) => StatusCode::WrongFormat,
            Self::NoPermission => StatusCode::NoPermission,
            Self::Overwrite(_) => StatusCode::Overwrite,
            Self::Compress(_) => StatusCode::Compress,
            Self::InvalidType(_) => StatusCode::InvalidType,
            Self::InvalidParams(_) => StatusCode::InvalidParams,
            Self::Uncompress(_) => StatusCode::Uncompress,
            Self::OpenFailed(_, _) => StatusCode::OpenFailed,
            Self::BeginFailed(_) => StatusCode::BeginFailed,
            Self::WritePermission(_) => StatusCode::WritePermission,
            Self::Unsupported(_) => StatusCode::Unsupported,
        }
    }

    /// Obtain the broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::CliUnknownCommand
            | Self::CliBadArgument(_)
            | Self::InvalidParams(_)
            | Self::OpenFailed(_, _) => ErrorKind::InvalidInput,
            Self::Goblin(_)
            | Self::ObjectRead(_)
            | Self::GetHeader(_)
            | Self::NameTable(_)
            | Self::GetSectionHeader(_)
            | Self::NamePointer(_)
            | Self::NotResource(_)
            | Self::WrongFormat(_)
            | Self::BeginFailed(_)
            | Self::InvalidType(_) => ErrorKind::Format,
            Self::NoSection(_) => ErrorKind::NotFound,
            Self::NoPermission | Self::WritePermission(_) | Self::Overwrite(_) => {
                ErrorKind::Permission
            }
            Self::Scroll(_)
            | Self::ObjectBuild(_)
            | Self::NoNameTable
            | Self::GetData(_)
            | Self::Update(_)
            | Self::NewSection(_)
            | Self::NewData(_)
            | Self::RemoveSection(_)
            | Self::ExpandSection(_) => ErrorKind::Structural,
            Self::SizeMismatch(_) | Self::Compress(_) | Self::Uncompress(_) => ErrorKind::Codec,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

pub type Result<T, E = ElfResourceError> = std::result::Result<T, E>;
