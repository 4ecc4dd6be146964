// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic ELF images for tests.

use {
    byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt},
    once_cell::sync::Lazy,
    std::{
        io::Write,
        path::{Path, PathBuf},
        sync::{Mutex, MutexGuard},
    },
};

static REGISTRY_USERS: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Held by tests that drain the process-wide cleanup registry and by tests
/// whose temporary directories live in it.
pub fn registry_lock() -> MutexGuard<'static, ()> {
    REGISTRY_USERS.lock().unwrap_or_else(|e| e.into_inner())
}

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

/// Virtual address the loadable segment of [loadable_elf] is mapped at.
pub const LOAD_ADDRESS: u64 = 0x40_0000;

/// A section to place in a synthetic image.
pub struct SyntheticSection {
    pub name: &'static str,
    pub sh_type: u32,
    pub flags: u64,
    pub data: Vec<u8>,
}

impl SyntheticSection {
    pub fn new(name: &'static str, sh_type: u32, flags: u64, data: &[u8]) -> Self {
        Self {
            name,
            sh_type,
            flags,
            data: data.to_vec(),
        }
    }
}

/// The sections most tests start from: code, writable data, and zero-fill.
pub fn default_sections() -> Vec<SyntheticSection> {
    vec![
        SyntheticSection::new(
            ".text",
            SHT_PROGBITS,
            SHF_ALLOC | SHF_EXECINSTR,
            &[0x90; 48],
        ),
        SyntheticSection::new(".data", SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, b"RES\0junk"),
        SyntheticSection::new(".bss", SHT_NOBITS, SHF_ALLOC | SHF_WRITE, &[]),
        SyntheticSection::new(".comment", SHT_PROGBITS, 0, b"synthetic 1.0\0"),
    ]
}

fn align(out: &mut Vec<u8>, alignment: usize) {
    while out.len() % alignment != 0 {
        out.push(0);
    }
}

fn write_word<E: ByteOrder>(out: &mut Vec<u8>, is_64: bool, value: u64) {
    if is_64 {
        out.write_u64::<E>(value).unwrap();
    } else {
        out.write_u32::<E>(value as u32).unwrap();
    }
}

fn build<E: ByteOrder>(
    is_64: bool,
    big_endian: bool,
    loadable: bool,
    sections: &[SyntheticSection],
) -> Vec<u8> {
    let ehsize: u16 = if is_64 { 64 } else { 52 };
    let phentsize: u16 = if is_64 { 56 } else { 32 };
    let shentsize: u16 = if is_64 { 64 } else { 40 };
    let phnum: u16 = if loadable { 1 } else { 0 };

    // Name table: NUL, each section name, then .shstrtab itself.
    let mut names = vec![0u8];
    let mut name_offsets = Vec::new();
    for section in sections {
        name_offsets.push(names.len() as u32);
        names.extend_from_slice(section.name.as_bytes());
        names.push(0);
    }
    let shstrtab_name = names.len() as u32;
    names.extend_from_slice(b".shstrtab\0");

    let mut out = vec![0u8; ehsize as usize + (phnum * phentsize) as usize];
    let mut offsets = Vec::new();
    let mut segment_end = out.len() as u64;
    for section in sections {
        align(&mut out, 8);
        offsets.push(out.len() as u64);
        if section.sh_type != SHT_NOBITS {
            out.extend_from_slice(&section.data);
            if section.flags & SHF_ALLOC != 0 {
                segment_end = out.len() as u64;
            }
        }
    }
    let address = |section: &SyntheticSection, offset: u64| {
        if loadable && section.flags & SHF_ALLOC != 0 {
            LOAD_ADDRESS + offset
        } else {
            0
        }
    };
    let shstrtab_offset = out.len() as u64;
    out.extend_from_slice(&names);
    align(&mut out, 8);
    let shoff = out.len() as u64;
    let shnum = sections.len() as u16 + 2;

    let mut header = Vec::new();
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    header.push(if is_64 { 2 } else { 1 });
    header.push(if big_endian { 2 } else { 1 });
    header.push(1);
    header.extend_from_slice(&[0; 9]);
    // ET_EXEC or ET_REL
    header
        .write_u16::<E>(if loadable { 2 } else { 1 })
        .unwrap();
    header.write_u16::<E>(if is_64 { 62 } else { 3 }).unwrap();
    header.write_u32::<E>(1).unwrap();
    let entry = match sections.first() {
        Some(first) => address(first, offsets[0]),
        None => 0,
    };
    write_word::<E>(&mut header, is_64, entry);
    write_word::<E>(&mut header, is_64, if loadable { ehsize as u64 } else { 0 });
    write_word::<E>(&mut header, is_64, shoff);
    header.write_u32::<E>(0).unwrap();
    header.write_u16::<E>(ehsize).unwrap();
    header.write_u16::<E>(phentsize).unwrap();
    header.write_u16::<E>(phnum).unwrap();
    header.write_u16::<E>(shentsize).unwrap();
    header.write_u16::<E>(shnum).unwrap();
    header.write_u16::<E>(shnum - 1).unwrap();
    assert_eq!(header.len(), ehsize as usize);
    out[..header.len()].copy_from_slice(&header);

    if loadable {
        // One read/write/execute PT_LOAD mapping the file from its start
        // through the last allocated section with file contents.
        let mut phdr = Vec::new();
        phdr.write_u32::<E>(1).unwrap();
        if is_64 {
            phdr.write_u32::<E>(7).unwrap();
        }
        write_word::<E>(&mut phdr, is_64, 0);
        write_word::<E>(&mut phdr, is_64, LOAD_ADDRESS);
        write_word::<E>(&mut phdr, is_64, LOAD_ADDRESS);
        write_word::<E>(&mut phdr, is_64, segment_end);
        write_word::<E>(&mut phdr, is_64, segment_end);
        if !is_64 {
            phdr.write_u32::<E>(7).unwrap();
        }
        write_word::<E>(&mut phdr, is_64, 0x1000);
        assert_eq!(phdr.len(), phentsize as usize);
        out[ehsize as usize..ehsize as usize + phdr.len()].copy_from_slice(&phdr);
    }

    // Null section.
    out.extend_from_slice(&vec![0u8; shentsize as usize]);

    let write_header =
        |out: &mut Vec<u8>, name: u32, sh_type: u32, flags: u64, addr: u64, offset: u64, size: u64| {
            out.write_u32::<E>(name).unwrap();
            out.write_u32::<E>(sh_type).unwrap();
            write_word::<E>(out, is_64, flags);
            write_word::<E>(out, is_64, addr);
            write_word::<E>(out, is_64, offset);
            write_word::<E>(out, is_64, size);
            out.write_u32::<E>(0).unwrap();
            out.write_u32::<E>(0).unwrap();
            write_word::<E>(out, is_64, 1);
            write_word::<E>(out, is_64, 0);
        };

    for (i, section) in sections.iter().enumerate() {
        write_header(
            &mut out,
            name_offsets[i],
            section.sh_type,
            section.flags,
            address(section, offsets[i]),
            offsets[i],
            section.data.len() as u64,
        );
    }
    write_header(
        &mut out,
        shstrtab_name,
        SHT_STRTAB,
        0,
        0,
        shstrtab_offset,
        names.len() as u64,
    );

    out
}

/// Build an ELF image with the given width, byte order, and sections.
pub fn synthetic_elf(is_64: bool, big_endian: bool, sections: &[SyntheticSection]) -> Vec<u8> {
    if big_endian {
        build::<BigEndian>(is_64, big_endian, false, sections)
    } else {
        build::<LittleEndian>(is_64, big_endian, false, sections)
    }
}

/// Build an executable image whose allocated sections sit in one `PT_LOAD`.
///
/// The segment starts at file offset 0, so it also maps the ELF header and
/// the program header table.
pub fn loadable_elf(is_64: bool, big_endian: bool, sections: &[SyntheticSection]) -> Vec<u8> {
    if big_endian {
        build::<BigEndian>(is_64, big_endian, true, sections)
    } else {
        build::<LittleEndian>(is_64, big_endian, true, sections)
    }
}

/// A 64-bit image in host byte order with [default_sections].
pub fn host_elf() -> Vec<u8> {
    synthetic_elf(true, cfg!(target_endian = "big"), &default_sections())
}

/// Write data to a file in a directory and return its path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut fh = std::fs::File::create(&path).unwrap();
    fh.write_all(data).unwrap();

    path
}

/// Deterministic, poorly compressible test payload.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);

    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
