// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ELF editing with `goblin` and `scroll`.

The file is parsed once with `goblin` and the section table is then owned
by [EditBackend]. Section payloads stay in the parsed image until they
are modified, at which point the section owns its bytes.

Every structural change recomputes the file layout. The prefix of the file
holding the ELF header, the program header table and all segment contents
never moves, so loadable code and data keep their file offsets. Sections
outside of segments that don't occupy memory (the name table, comments,
debug info, resources) are laid out again after that prefix, followed by a
freshly serialized section header table.
*/

use {
    super::{
        has_elf_magic, open_file, spliced_payload, table_string, validate_name, Access, Backend,
        BackendKind, Region,
    },
    crate::error::{ElfResourceError, Result},
    goblin::{
        container::{Container, Ctx},
        elf::{
            header::Header,
            program_header::ProgramHeader,
            section_header::{
                SectionHeader, SHF_ALLOC, SHF_INFO_LINK, SHF_WRITE, SHT_NOBITS, SHT_NOTE, SHT_REL,
                SHT_RELA,
            },
            Elf,
        },
    },
    log::debug,
    scroll::Pwrite,
    std::{
        fs::File,
        io::{Read, Seek, SeekFrom, Write},
        ops::Range,
        path::{Path, PathBuf},
    },
};

const SIZEOF_SECTION_HEADER_32: usize = 40;
const SIZEOF_SECTION_HEADER_64: usize = 64;

/// Section indices at and above this value collide with reserved indices.
const MAX_SECTIONS: usize = 0xff00;

#[derive(Clone, Debug)]
struct EditSection {
    header: SectionHeader,
    /// Replacement payload. `None` means the bytes in the image are current.
    data: Option<Vec<u8>>,
}

/// Mutating backend rewriting the section table itself.
pub struct EditBackend {
    path: PathBuf,
    file: File,
    access: Access,
    image: Vec<u8>,
    ctx: Ctx,
    header: Header,
    program_headers: Vec<ProgramHeader>,
    sections: Vec<EditSection>,
    /// Whether the in-memory image differs from the file.
    modified: bool,
}

impl EditBackend {
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        let mut file = open_file(path, access)?;

        let mut image = Vec::new();
        file.read_to_end(&mut image)?;

        if !has_elf_magic(&image) {
            return Err(ElfResourceError::WrongFormat(format!(
                "{} is not an ELF file",
                path.display()
            )));
        }

        let elf = Elf::parse(&image).map_err(|e| ElfResourceError::BeginFailed(e.to_string()))?;

        let ctx = Ctx::new(
            if elf.is_64 {
                Container::Big
            } else {
                Container::Little
            },
            if elf.little_endian {
                scroll::Endian::Little
            } else {
                scroll::Endian::Big
            },
        );

        let header = elf.header.clone();
        let program_headers = elf.program_headers.clone();
        let sections = elf
            .section_headers
            .iter()
            .map(|header| EditSection {
                header: header.clone(),
                data: None,
            })
            .collect::<Vec<_>>();

        debug!(
            "parsed {}: {} sections, {} program headers",
            path.display(),
            sections.len(),
            program_headers.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            access,
            image,
            ctx,
            header,
            program_headers,
            sections,
            modified: false,
        })
    }

    fn require_write(&self) -> Result<()> {
        if self.access == Access::ReadWrite {
            Ok(())
        } else {
            Err(ElfResourceError::NoPermission)
        }
    }

    fn is_64(&self) -> bool {
        self.ctx.container == Container::Big
    }

    fn section_header_size(&self) -> usize {
        if self.is_64() {
            SIZEOF_SECTION_HEADER_64
        } else {
            SIZEOF_SECTION_HEADER_32
        }
    }

    fn name_table_index(&self) -> Result<usize> {
        let index = self.header.e_shstrndx as usize;

        if index == 0 || index >= self.sections.len() {
            Err(ElfResourceError::NoNameTable)
        } else {
            Ok(index)
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 || index >= self.sections.len() {
            Err(ElfResourceError::GetSectionHeader(format!(
                "section index {} out of range",
                index
            )))
        } else {
            Ok(())
        }
    }

    /// Current payload of a section.
    fn data(&self, index: usize) -> Result<&[u8]> {
        let section = &self.sections[index];

        if let Some(data) = &section.data {
            return Ok(data);
        }

        if section.header.sh_type == SHT_NOBITS {
            return Ok(&[]);
        }

        let start = section.header.sh_offset as usize;
        let end = start.saturating_add(section.header.sh_size as usize);

        self.image
            .get(start..end)
            .ok_or_else(|| ElfResourceError::GetData(format!("section {} exceeds file", index)))
    }

    fn section_name(&self, index: usize) -> Option<String> {
        let table = self.data(self.name_table_index().ok()?).ok()?;

        table_string(table, self.sections[index].header.sh_name)
    }

    fn region(&self, index: usize) -> Result<Region> {
        let name = self
            .section_name(index)
            .ok_or(ElfResourceError::NamePointer(index))?;

        Ok(Region {
            index,
            name,
            offset: self.sections[index].header.sh_offset,
            size: self.data(index)?.len() as u64,
        })
    }

    /// Whether a section gets laid out again after the fixed prefix.
    fn is_relocatable(&self, index: usize, segments_end: u64) -> bool {
        let section = &self.sections[index];

        index != 0
            && section.header.sh_flags & SHF_ALLOC as u64 == 0
            && section.header.sh_type != SHT_NOBITS
            && (section.data.is_some() || section.header.sh_offset >= segments_end)
    }

    /// Apply a structural edit, restoring the section table if it fails.
    fn transaction<T>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let sections = self.sections.clone();
        let header = self.header.clone();
        let modified = self.modified;

        edit(self).map_err(|e| {
            self.sections = sections;
            self.header = header;
            self.modified = modified;
            e
        })
    }

    /// Recompute file offsets and serialize a new image.
    ///
    /// Running this on an unmodified, already laid out image reproduces it.
    fn layout(&mut self) -> Result<()> {
        let word = if self.is_64() { 8 } else { 4 };
        let entsize = self.section_header_size();

        let mut segments_end = self.header.e_ehsize as u64;
        if self.header.e_phnum > 0 {
            segments_end = segments_end.max(
                self.header.e_phoff
                    + self.header.e_phnum as u64 * self.header.e_phentsize as u64,
            );
        }
        for ph in &self.program_headers {
            segments_end = segments_end.max(ph.p_offset + ph.p_filesz);
        }

        let mut prefix_end = segments_end;
        for (index, section) in self.sections.iter().enumerate().skip(1) {
            if section.header.sh_type != SHT_NOBITS && !self.is_relocatable(index, segments_end) {
                prefix_end = prefix_end.max(section.header.sh_offset + section.header.sh_size);
            }
        }

        let mut out = self
            .image
            .get(..prefix_end as usize)
            .ok_or_else(|| {
                ElfResourceError::GetData(format!(
                    "file truncated: {} bytes needed, {} present",
                    prefix_end,
                    self.image.len()
                ))
            })?
            .to_vec();

        let mut headers = self
            .sections
            .iter()
            .map(|s| s.header.clone())
            .collect::<Vec<_>>();

        for index in 1..self.sections.len() {
            let section = &self.sections[index];

            if self.is_relocatable(index, segments_end) {
                let data = self.data(index)?;
                let align = section.header.sh_addralign.max(1) as usize;
                while out.len() % align != 0 {
                    out.push(0);
                }

                headers[index].sh_offset = out.len() as u64;
                headers[index].sh_size = data.len() as u64;
                out.extend_from_slice(data);
            } else if let Some(data) = &section.data {
                if data.len() as u64 > section.header.sh_size {
                    return Err(ElfResourceError::ExpandSection(format!(
                        "section {} is mapped into memory and cannot grow from {} to {} bytes",
                        index,
                        section.header.sh_size,
                        data.len()
                    )));
                }

                if section.header.sh_type != SHT_NOBITS {
                    let start = section.header.sh_offset as usize;
                    out[start..start + data.len()].copy_from_slice(data);
                }
                headers[index].sh_size = data.len() as u64;
            }
        }

        while out.len() % word != 0 {
            out.push(0);
        }
        let shoff = out.len();
        out.resize(shoff + headers.len() * entsize, 0);

        for (index, header) in headers.iter().enumerate() {
            out.pwrite_with(header.clone(), shoff + index * entsize, self.ctx)?;
        }

        self.header.e_shoff = shoff as u64;
        self.header.e_shnum = headers.len() as u16;
        self.header.e_shentsize = entsize as u16;
        out.pwrite_with(self.header.clone(), 0, self.ctx.le)?;

        for (section, header) in self.sections.iter_mut().zip(headers) {
            section.header = header;
            section.data = None;
        }
        self.image = out;

        Ok(())
    }

    fn write_image(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.image)?;
        self.file.set_len(self.image.len() as u64)?;
        self.file.flush()?;
        self.modified = false;

        debug!(
            "wrote {} bytes to {}",
            self.image.len(),
            self.path.display()
        );

        Ok(())
    }
}

/// Byte range of the NUL terminated string at `offset`, terminator included.
fn name_range(table: &[u8], offset: usize) -> Option<Range<usize>> {
    let len = table.get(offset..)?.iter().position(|b| *b == 0)?;

    Some(offset..offset + len + 1)
}

fn renumber(value: u32, removed: usize) -> u32 {
    match (value as usize).cmp(&removed) {
        std::cmp::Ordering::Greater => value - 1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Less => value,
    }
}

impl Backend for EditBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Edit
    }

    fn access(&self) -> Access {
        self.access
    }

    fn find(&mut self, name: &str) -> Result<Region> {
        for index in 1..self.sections.len() {
            if self.section_name(index).as_deref() == Some(name) {
                return self.region(index);
            }
        }

        Err(ElfResourceError::NoSection(name.to_string()))
    }

    fn add(&mut self, name: &str) -> Result<Region> {
        self.require_write()?;
        validate_name(name)?;

        let strndx = self.name_table_index()?;
        let index = self.sections.len();
        if index >= MAX_SECTIONS {
            return Err(ElfResourceError::NewSection(format!(
                "section table is full ({} entries)",
                index
            )));
        }

        self.transaction(|backend| {
            let mut names = backend.data(strndx)?.to_vec();
            let sh_name = names.len();
            names.extend_from_slice(name.as_bytes());
            names.push(0);
            backend.sections[strndx].data = Some(names);

            backend.sections.push(EditSection {
                header: SectionHeader {
                    sh_name,
                    sh_type: SHT_NOTE,
                    sh_flags: SHF_WRITE as u64,
                    sh_addr: 0,
                    sh_offset: 0,
                    sh_size: 0,
                    sh_link: 0,
                    sh_info: 0,
                    sh_addralign: 1,
                    sh_entsize: 0,
                },
                data: Some(vec![]),
            });

            backend.modified = true;
            backend.layout()
        })?;
        debug!("added section {} as index {}", name, index);

        self.region(index)
    }

    fn remove(&mut self, region: &Region) -> Result<()> {
        self.require_write()?;
        self.check_index(region.index)?;

        let index = region.index;
        let strndx = self.name_table_index()?;
        if index == strndx {
            return Err(ElfResourceError::RemoveSection(
                "refusing to remove the section name table".to_string(),
            ));
        }

        self.transaction(|backend| {
            let mut names = backend.data(strndx)?.to_vec();
            let range = name_range(&names, backend.sections[index].header.sh_name)
                .ok_or(ElfResourceError::NamePointer(index))?;

            let shared = backend.sections.iter().enumerate().any(|(i, s)| {
                i != index
                    && name_range(&names, s.header.sh_name)
                        .map(|other| other.start < range.end && other.end > range.start)
                        .unwrap_or(false)
            });

            if shared {
                debug!(
                    "name of section {} is shared; leaving name table intact",
                    index
                );
            } else {
                let removed = range.end - range.start;
                let tail = names[range.end..].to_vec();
                names.truncate(range.start);
                names.extend_from_slice(&tail);

                for section in backend.sections.iter_mut() {
                    if section.header.sh_name >= range.end {
                        section.header.sh_name -= removed;
                    }
                }
                backend.sections[strndx].data = Some(names);
            }

            backend.sections.remove(index);

            for section in backend.sections.iter_mut() {
                section.header.sh_link = renumber(section.header.sh_link, index);

                if section.header.sh_flags & SHF_INFO_LINK as u64 != 0
                    || section.header.sh_type == SHT_REL
                    || section.header.sh_type == SHT_RELA
                {
                    section.header.sh_info = renumber(section.header.sh_info, index);
                }
            }
            if backend.header.e_shstrndx as usize > index {
                backend.header.e_shstrndx -= 1;
            }

            backend.modified = true;
            backend.layout()
        })?;
        debug!("removed section {} ({})", index, region.name);

        Ok(())
    }

    fn next(&mut self, after: Option<&Region>) -> Result<Option<Region>> {
        let start = after.map(|r| r.index + 1).unwrap_or(1);

        for index in start..self.sections.len() {
            if !self.data(index)?.is_empty() {
                return Ok(Some(self.region(index)?));
            }
        }

        Ok(None)
    }

    fn name_of(&mut self, region: &Region) -> Option<String> {
        self.check_index(region.index).ok()?;

        self.section_name(region.index)
    }

    fn payload(&mut self, region: &Region) -> Result<Vec<u8>> {
        self.check_index(region.index)?;

        Ok(self.data(region.index)?.to_vec())
    }

    fn size_of(&mut self, region: &Region) -> u64 {
        if self.check_index(region.index).is_err() {
            return 0;
        }

        self.data(region.index)
            .map(|d| d.len() as u64)
            .unwrap_or(0)
    }

    fn replace_payload(&mut self, region: &Region, offset: usize, data: &[u8]) -> Result<()> {
        self.require_write()?;
        self.check_index(region.index)?;

        if self.sections[region.index].header.sh_type == SHT_NOBITS {
            return Err(ElfResourceError::NewData(format!(
                "section {} occupies no file space",
                region.name
            )));
        }

        let payload = spliced_payload(self.data(region.index)?, offset, data)?;
        let previous = self.sections[region.index].data.replace(payload);

        if let Err(e) = self.layout() {
            self.sections[region.index].data = previous;
            return Err(e);
        }

        self.modified = true;
        self.write_image()
    }

    fn flush(&mut self) -> Result<()> {
        if self.modified && self.access == Access::ReadWrite {
            self.layout()?;
            self.write_image()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil::{default_sections, loadable_elf, noise, synthetic_elf, write_file},
    };

    fn open_variant(dir: &Path, is_64: bool, big_endian: bool) -> (PathBuf, EditBackend) {
        let path = write_file(
            dir,
            &format!("variant-{}-{}", is_64, big_endian),
            &synthetic_elf(is_64, big_endian, &default_sections()),
        );
        let backend = EditBackend::open(&path, Access::ReadWrite).unwrap();

        (path, backend)
    }

    fn section_names(path: &Path) -> Vec<String> {
        let data = std::fs::read(path).unwrap();
        let elf = Elf::parse(&data).unwrap();

        elf.section_headers
            .iter()
            .skip(1)
            .map(|sh| elf.shdr_strtab.get_at(sh.sh_name).unwrap().to_string())
            .collect()
    }

    #[test]
    fn add_and_store_all_variants() -> Result<()> {
        let td = tempfile::tempdir()?;

        for (is_64, big_endian) in [(true, false), (true, true), (false, false), (false, true)] {
            let (path, mut backend) = open_variant(td.path(), is_64, big_endian);

            let region = backend.add("greeting")?;
            assert_eq!(region.index(), 6);
            assert_eq!(region.size(), 0);
            backend.replace_payload(&region, 0, b"hello")?;
            backend.flush()?;
            drop(backend);

            assert_eq!(
                section_names(&path),
                vec![".text", ".data", ".bss", ".comment", ".shstrtab", "greeting"]
            );

            let mut backend = EditBackend::open(&path, Access::Read)?;
            let region = backend.find("greeting")?;
            assert_eq!(backend.payload(&region)?, b"hello");
            let text = backend.find(".text")?;
            assert_eq!(backend.payload(&text)?, vec![0x90; 48]);
            let comment = backend.find(".comment")?;
            assert_eq!(backend.payload(&comment)?, b"synthetic 1.0\0");
        }

        Ok(())
    }

    #[test]
    fn splice_payload_at_offset() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);

        let region = backend.add("blob")?;
        backend.replace_payload(&region, 0, b"RES1\0")?;
        backend.replace_payload(&region, 5, b"payload")?;
        assert_eq!(backend.payload(&region)?, b"RES1\0payload");

        assert!(matches!(
            backend.replace_payload(&region, 100, b"x"),
            Err(ElfResourceError::SizeMismatch(_))
        ));

        Ok(())
    }

    #[test]
    fn remove_splices_only_its_name() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (path, mut backend) = open_variant(td.path(), true, false);

        for (name, data) in [("a", &b"one"[..]), ("much-longer-name", b"two"), ("mid", b"3")] {
            let region = backend.add(name)?;
            backend.replace_payload(&region, 0, data)?;
        }

        let strndx = backend.name_table_index()?;
        let before = backend.data(strndx)?.len();
        let region = backend.find("much-longer-name")?;
        backend.remove(&region)?;
        backend.flush()?;

        assert_eq!(backend.data(strndx)?.len(), before - "much-longer-name\0".len());
        drop(backend);

        let mut backend = EditBackend::open(&path, Access::Read)?;
        let a = backend.find("a")?;
        assert_eq!(backend.payload(&a)?, b"one");
        let mid = backend.find("mid")?;
        assert_eq!(backend.payload(&mid)?, b"3");
        assert!(matches!(
            backend.find("much-longer-name"),
            Err(ElfResourceError::NoSection(_))
        ));
        assert_eq!(
            section_names(&path),
            vec![".text", ".data", ".bss", ".comment", ".shstrtab", "a", "mid"]
        );

        Ok(())
    }

    #[test]
    fn shared_name_bytes_survive_removal() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);

        let alpha = backend.add("alpha")?;
        backend.replace_payload(&alpha, 0, b"a")?;
        let beta = backend.add("beta")?;
        backend.replace_payload(&beta, 0, b"b")?;

        // Point beta at the "pha" suffix of alpha's name.
        backend.sections[beta.index()].header.sh_name =
            backend.sections[alpha.index()].header.sh_name + 2;

        let alpha = backend.find("alpha")?;
        backend.remove(&alpha)?;

        let pha = backend.find("pha")?;
        assert_eq!(backend.payload(&pha)?, b"b");

        Ok(())
    }

    #[test]
    fn removal_renumbers_references() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);

        let first = backend.add("first")?;
        backend.replace_payload(&first, 0, b"1")?;
        let second = backend.add("second")?;
        backend.replace_payload(&second, 0, b"2")?;
        backend.sections[second.index()].header.sh_link = second.index() as u32 - 1;

        // Removing a section before the name table moves the name table.
        let text = backend.find(".text")?;
        let strndx = backend.name_table_index()?;
        backend.remove(&text)?;

        assert_eq!(backend.name_table_index()?, strndx - 1);
        let second = backend.find("second")?;
        let first = backend.find("first")?;
        assert_eq!(
            backend.sections[second.index()].header.sh_link as usize,
            first.index()
        );

        Ok(())
    }

    #[test]
    fn new_sections_always_appended() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), false, true);

        let one = backend.add("one")?;
        let two = backend.add("two")?;
        assert_eq!(two.index(), one.index() + 1);

        backend.remove(&one)?;
        let three = backend.add("three")?;
        assert_eq!(three.index(), two.index());
        assert_eq!(backend.find("two")?.index(), one.index());

        Ok(())
    }

    #[test]
    fn mapped_sections_cannot_grow() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);

        let data = backend.find(".data")?;
        assert!(matches!(
            backend.replace_payload(&data, 0, &[0u8; 64]),
            Err(ElfResourceError::ExpandSection(_))
        ));

        let data = backend.find(".data")?;
        backend.replace_payload(&data, 0, b"RES")?;
        let data = backend.find(".data")?;
        assert_eq!(backend.payload(&data)?, b"RES");

        let bss = backend.find(".bss")?;
        assert!(matches!(
            backend.replace_payload(&bss, 0, b"x"),
            Err(ElfResourceError::NewData(_))
        ));

        Ok(())
    }

    #[test]
    fn failed_add_leaves_table_untouched() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);

        let strndx = backend.name_table_index()?;
        let names = backend.data(strndx)?.to_vec();
        let count = backend.sections.len();

        // A pending payload too large for its mapped section fails every layout.
        let data = backend.find(".data")?;
        backend.sections[data.index()].data = Some(vec![0u8; 64]);

        assert!(matches!(
            backend.add("doomed"),
            Err(ElfResourceError::ExpandSection(_))
        ));
        assert_eq!(backend.sections.len(), count);
        assert_eq!(backend.data(strndx)?, names.as_slice());
        assert!(matches!(
            backend.find("doomed"),
            Err(ElfResourceError::NoSection(_))
        ));

        let comment = backend.find(".comment")?;
        assert!(matches!(
            backend.remove(&comment),
            Err(ElfResourceError::ExpandSection(_))
        ));
        assert_eq!(backend.sections.len(), count);
        assert_eq!(backend.find(".comment")?.index(), comment.index());

        backend.sections[data.index()].data = None;
        let region = backend.add("kept")?;
        assert_eq!(region.index(), count);

        Ok(())
    }

    #[test]
    fn loaded_segment_stays_in_place() -> Result<()> {
        let td = tempfile::tempdir()?;

        for (is_64, big_endian) in [(true, false), (false, true)] {
            let original = loadable_elf(is_64, big_endian, &default_sections());
            let path = write_file(
                td.path(),
                &format!("exec-{}-{}", is_64, big_endian),
                &original,
            );

            let elf = Elf::parse(&original)?;
            let segments = elf
                .program_headers
                .iter()
                .map(|ph| (ph.p_type, ph.p_flags, ph.p_offset, ph.p_vaddr, ph.p_filesz))
                .collect::<Vec<_>>();
            assert_eq!(segments.len(), 1);
            let segment_end = (segments[0].2 + segments[0].4) as usize;
            let ehsize = elf.header.e_ehsize as usize;
            let data_offset = elf
                .section_headers
                .iter()
                .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(".data"))
                .map(|sh| sh.sh_offset as usize)
                .unwrap();

            let mut backend = EditBackend::open(&path, Access::ReadWrite)?;
            let one = backend.add("one")?;
            backend.replace_payload(&one, 0, &noise(300, 1))?;
            let two = backend.add("two")?;
            backend.replace_payload(&two, 0, b"second")?;
            let one = backend.find("one")?;
            backend.remove(&one)?;
            let data = backend.find(".data")?;
            backend.replace_payload(&data, 0, b"RES\0JUNK")?;
            backend.flush()?;
            drop(backend);

            let after = std::fs::read(&path)?;
            let rewritten = Elf::parse(&after)?;
            assert_eq!(
                rewritten
                    .program_headers
                    .iter()
                    .map(|ph| (ph.p_type, ph.p_flags, ph.p_offset, ph.p_vaddr, ph.p_filesz))
                    .collect::<Vec<_>>(),
                segments
            );
            assert_eq!(rewritten.header.e_phoff, elf.header.e_phoff);
            assert_eq!(rewritten.header.e_entry, elf.header.e_entry);

            // Only the in-place write to .data changed within the segment.
            let mut expected = original[..segment_end].to_vec();
            expected[data_offset..data_offset + 8].copy_from_slice(b"RES\0JUNK");
            assert_eq!(&after[ehsize..segment_end], &expected[ehsize..]);

            for sh in rewritten.section_headers.iter().skip(1) {
                if sh.sh_flags & SHF_ALLOC as u64 == 0 {
                    assert!(sh.sh_offset as usize >= segment_end);
                }
            }

            let mut backend = EditBackend::open(&path, Access::Read)?;
            let two = backend.find("two")?;
            assert_eq!(backend.payload(&two)?, b"second");
            let comment = backend.find(".comment")?;
            assert_eq!(backend.payload(&comment)?, b"synthetic 1.0\0");
            assert!(matches!(
                backend.find("one"),
                Err(ElfResourceError::NoSection(_))
            ));
        }

        Ok(())
    }

    #[test]
    fn layout_is_stable() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, true);

        let region = backend.add("stable")?;
        backend.replace_payload(&region, 0, b"bytes")?;
        let image = backend.image.clone();

        backend.layout()?;
        assert_eq!(backend.image, image);

        Ok(())
    }

    #[test]
    fn iteration_skips_empty_sections() -> Result<()> {
        let td = tempfile::tempdir()?;
        let (_, mut backend) = open_variant(td.path(), true, false);
        backend.add("empty")?;

        let mut names = vec![];
        let mut current = None;
        while let Some(region) = backend.next(current.as_ref())? {
            names.push(region.name().to_string());
            current = Some(region);
        }

        assert_eq!(names, vec![".text", ".data", ".comment", ".shstrtab"]);

        Ok(())
    }

    #[test]
    fn read_access_rejects_mutation() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_file(
            td.path(),
            "ro",
            &synthetic_elf(true, false, &default_sections()),
        );
        let mut backend = EditBackend::open(&path, Access::Read)?;

        assert!(matches!(
            backend.add("nope"),
            Err(ElfResourceError::NoPermission)
        ));
        let text = backend.find(".text")?;
        assert!(matches!(
            backend.replace_payload(&text, 0, b""),
            Err(ElfResourceError::NoPermission)
        ));

        Ok(())
    }

    #[test]
    fn rejects_non_elf() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_file(td.path(), "text", b"#!/bin/sh\necho hi\n");

        assert!(matches!(
            EditBackend::open(&path, Access::Read),
            Err(ElfResourceError::WrongFormat(_))
        ));

        Ok(())
    }
}
