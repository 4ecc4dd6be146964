// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Read-only section table parser.

This backend has no dependency on an object file library. It walks the ELF
header and section header table directly from a byte stream.

Field positions are derived by accumulating the widths of the preceding
fields for the file's class rather than by overlaying a fixed structure.
Every multi-byte value is read in host byte order and swapped when the file
declares the other byte order.
*/

use {
    super::{open_file, Access, Backend, BackendKind, Region},
    crate::error::{ElfResourceError, Result},
    byteorder::{NativeEndian, ReadBytesExt},
    log::debug,
    std::{
        fs::File,
        io::{ErrorKind as IoErrorKind, Read, Seek, SeekFrom},
        path::{Path, PathBuf},
    },
};

/// Maximum number of bytes read when resolving a section name.
pub const MAX_NAME_LEN: usize = 200;

const EI_NIDENT: u64 = 16;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const SHT_NOBITS: u32 = 8;

const HALF: u64 = 2;
const WORD: u64 = 4;

/// A section as recorded in the section header table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionEntry {
    pub name: String,
    pub name_offset: u32,
    pub sh_type: u32,
    pub offset: u64,
    pub size: u64,
}

impl SectionEntry {
    /// Number of payload bytes stored in the file.
    pub fn file_size(&self) -> u64 {
        if self.sh_type == SHT_NOBITS {
            0
        } else {
            self.size
        }
    }
}

/// Parsed section header table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionTable {
    pub is_64: bool,
    pub big_endian: bool,
    pub name_table_index: usize,
    pub sections: Vec<SectionEntry>,
}

struct FieldReader<'a, R: Read + Seek> {
    reader: &'a mut R,
    swap: bool,
    /// Width of address, offset and extended word fields.
    addr: u64,
}

fn short_read(what: &str, e: std::io::Error) -> ElfResourceError {
    if e.kind() == IoErrorKind::UnexpectedEof {
        ElfResourceError::WrongFormat(format!("file truncated while reading {}", what))
    } else {
        ElfResourceError::WrongFormat(format!("error reading {}: {}", what, e))
    }
}

impl<'a, R: Read + Seek> FieldReader<'a, R> {
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| short_read("header", e))?;

        Ok(())
    }

    fn half(&mut self, what: &str) -> Result<u16> {
        let v = self
            .reader
            .read_u16::<NativeEndian>()
            .map_err(|e| short_read(what, e))?;

        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    fn word(&mut self, what: &str) -> Result<u32> {
        let v = self
            .reader
            .read_u32::<NativeEndian>()
            .map_err(|e| short_read(what, e))?;

        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    /// Read an address, offset or extended word.
    fn addr(&mut self, what: &str) -> Result<u64> {
        if self.addr == 8 {
            let v = self
                .reader
                .read_u64::<NativeEndian>()
                .map_err(|e| short_read(what, e))?;

            Ok(if self.swap { v.swap_bytes() } else { v })
        } else {
            Ok(self.word(what)? as u64)
        }
    }
}

/// Parse the section header table of an ELF file.
pub fn parse_section_table<R: Read + Seek>(reader: &mut R) -> Result<SectionTable> {
    let mut ident = [0u8; EI_NIDENT as usize];
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| short_read("identification", e))?;
    reader
        .read_exact(&mut ident)
        .map_err(|e| short_read("identification", e))?;

    if ident[0..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(ElfResourceError::WrongFormat("bad ELF magic".to_string()));
    }

    let is_64 = match ident[4] {
        ELFCLASS32 => false,
        ELFCLASS64 => true,
        class => {
            return Err(ElfResourceError::WrongFormat(format!(
                "invalid ELF class {}",
                class
            )))
        }
    };
    let big_endian = match ident[5] {
        ELFDATA2LSB => false,
        ELFDATA2MSB => true,
        data => {
            return Err(ElfResourceError::WrongFormat(format!(
                "invalid ELF data encoding {}",
                data
            )))
        }
    };

    let mut fields = FieldReader {
        reader,
        swap: big_endian != cfg!(target_endian = "big"),
        addr: if is_64 { 8 } else { 4 },
    };
    let addr = fields.addr;

    // e_type, e_machine, e_version, e_entry, e_phoff
    let mut offset = EI_NIDENT + HALF + HALF + WORD + addr + addr;
    fields.seek(offset)?;
    let shoff = fields.addr("e_shoff")?;

    // e_shoff, e_flags, e_ehsize, e_phentsize, e_phnum
    offset += addr + WORD + HALF + HALF + HALF;
    fields.seek(offset)?;
    let shentsize = fields.half("e_shentsize")? as u64;
    let shnum = fields.half("e_shnum")? as usize;
    let shstrndx = fields.half("e_shstrndx")? as usize;

    if shnum > 0 && shstrndx >= shnum {
        return Err(ElfResourceError::WrongFormat(format!(
            "section name table index {} out of range ({} sections)",
            shstrndx, shnum
        )));
    }

    let mut sections = Vec::with_capacity(shnum);
    for index in 0..shnum as u64 {
        let base = shoff + index * shentsize;

        fields.seek(base)?;
        let name_offset = fields.word("sh_name")?;
        let sh_type = fields.word("sh_type")?;

        // sh_name, sh_type, sh_flags, sh_addr
        fields.seek(base + WORD + WORD + addr + addr)?;
        let offset = fields.addr("sh_offset")?;
        let size = fields.addr("sh_size")?;

        sections.push(SectionEntry {
            name: String::new(),
            name_offset,
            sh_type,
            offset,
            size,
        });
    }

    if let Some(names) = sections.get(shstrndx).cloned() {
        for section in sections.iter_mut() {
            if section.name_offset as u64 >= names.size {
                continue;
            }

            fields.seek(names.offset + section.name_offset as u64)?;

            let limit = (MAX_NAME_LEN as u64).min(names.size - section.name_offset as u64);
            let mut raw = Vec::with_capacity(limit as usize);
            (&mut *fields.reader)
                .take(limit)
                .read_to_end(&mut raw)
                .map_err(|e| short_read("section name", e))?;

            if let Some(end) = raw.iter().position(|b| *b == 0) {
                raw.truncate(end);
            }
            section.name = String::from_utf8_lossy(&raw).into_owned();
        }
    }

    Ok(SectionTable {
        is_64,
        big_endian,
        name_table_index: shstrndx,
        sections,
    })
}

pub(crate) fn initialize() {
    debug!(
        "read backend running on {} endian host",
        if cfg!(target_endian = "big") {
            "big"
        } else {
            "little"
        }
    );
}

/// Backend that can only read.
pub struct ReadBackend {
    path: PathBuf,
    file: File,
    table: SectionTable,
}

impl ReadBackend {
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        if access == Access::ReadWrite {
            return Err(ElfResourceError::Unsupported(BackendKind::Read.name()));
        }

        let mut file = open_file(path, access)?;
        let table = parse_section_table(&mut file)?;

        debug!(
            "{}: {}-bit {} endian, {} sections",
            path.display(),
            if table.is_64 { 64 } else { 32 },
            if table.big_endian { "big" } else { "little" },
            table.sections.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            table,
        })
    }

    pub fn table(&self) -> &SectionTable {
        &self.table
    }

    fn entry(&self, region: &Region) -> Result<&SectionEntry> {
        self.table
            .sections
            .get(region.index)
            .filter(|_| region.index != 0)
            .ok_or_else(|| {
                ElfResourceError::GetSectionHeader(format!(
                    "section index {} out of range",
                    region.index
                ))
            })
    }

    fn region(&self, index: usize) -> Region {
        let entry = &self.table.sections[index];

        Region {
            index,
            name: entry.name.clone(),
            offset: entry.offset,
            size: entry.file_size(),
        }
    }

    fn read_bytes(&mut self, region: &Region, len: u64) -> Result<Vec<u8>> {
        let offset = self.entry(region)?.offset;

        // Header values are untrusted; never allocate past the end of the file.
        let file_len = self.file.metadata()?.len();
        match offset.checked_add(len) {
            Some(end) if end <= file_len => {}
            _ => {
                return Err(ElfResourceError::GetData(format!(
                    "{} in {}: {} bytes at offset {} exceed file size {}",
                    region.name,
                    self.path.display(),
                    len,
                    offset,
                    file_len
                )))
            }
        }

        let mut data = vec![0u8; len as usize];

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut data))
            .map_err(|e| {
                ElfResourceError::GetData(format!(
                    "{} in {}: {}",
                    region.name,
                    self.path.display(),
                    e
                ))
            })?;

        Ok(data)
    }
}

impl Backend for ReadBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Read
    }

    fn access(&self) -> Access {
        Access::Read
    }

    fn find(&mut self, name: &str) -> Result<Region> {
        self.table
            .sections
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, entry)| entry.name == name)
            .map(|(index, _)| self.region(index))
            .ok_or_else(|| ElfResourceError::NoSection(name.to_string()))
    }

    fn add(&mut self, _name: &str) -> Result<Region> {
        Err(ElfResourceError::Unsupported(BackendKind::Read.name()))
    }

    fn remove(&mut self, _region: &Region) -> Result<()> {
        Err(ElfResourceError::Unsupported(BackendKind::Read.name()))
    }

    fn next(&mut self, after: Option<&Region>) -> Result<Option<Region>> {
        let start = after.map(|r| r.index + 1).unwrap_or(1);

        Ok((start..self.table.sections.len())
            .find(|index| self.table.sections[*index].file_size() > 0)
            .map(|index| self.region(index)))
    }

    fn name_of(&mut self, region: &Region) -> Option<String> {
        self.entry(region).ok().map(|entry| entry.name.clone())
    }

    fn payload(&mut self, region: &Region) -> Result<Vec<u8>> {
        let size = self.entry(region)?.file_size();

        self.read_bytes(region, size)
    }

    fn peek(&mut self, region: &Region, len: usize) -> Result<Vec<u8>> {
        let size = self.entry(region)?.file_size().min(len as u64);

        self.read_bytes(region, size)
    }

    fn size_of(&mut self, region: &Region) -> u64 {
        self.entry(region).map(|e| e.file_size()).unwrap_or(0)
    }

    fn replace_payload(&mut self, _region: &Region, _offset: usize, _data: &[u8]) -> Result<()> {
        Err(ElfResourceError::Unsupported(BackendKind::Read.name()))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
