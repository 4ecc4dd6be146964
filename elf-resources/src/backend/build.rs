// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ELF editing with the `object` crate's ELF builder.

Every structural change is applied by reading the current image into an
[object::build::elf::Builder], editing it and serializing it again. The
builder assigns all file offsets, so the image is always self consistent
after a mutation. Changes only reach the file on [Backend::flush], through a
scratch file next to the destination that replaces it once fully written.
*/

use {
    super::{
        has_elf_magic, open_file, spliced_payload, validate_name, Access, Backend, BackendKind,
        Region,
    },
    crate::error::{ElfResourceError, Result},
    log::{debug, info},
    object::{
        build::elf::{Builder, SectionData},
        elf, BinaryFormat, Object, ObjectSection, SectionIndex,
    },
    std::{
        fs::Permissions,
        io::{Read, Write},
        path::{Path, PathBuf},
    },
};

/// Mutating backend built on [object::build::elf::Builder].
pub struct BuildBackend {
    path: PathBuf,
    access: Access,
    image: Vec<u8>,
    permissions: Permissions,
    #[cfg(unix)]
    owner: (u32, u32),
    modified: bool,
}

impl BuildBackend {
    pub fn open(path: &Path, access: Access) -> Result<Self> {
        let mut file = open_file(path, access)?;
        let metadata = file.metadata()?;

        let mut image = Vec::new();
        file.read_to_end(&mut image)?;

        if !has_elf_magic(&image) {
            return Err(ElfResourceError::WrongFormat(format!(
                "{} is not an ELF file",
                path.display()
            )));
        }

        let parsed = object::File::parse(image.as_slice())
            .map_err(|e| ElfResourceError::BeginFailed(e.to_string()))?;
        if parsed.format() != BinaryFormat::Elf {
            return Err(ElfResourceError::WrongFormat(format!(
                "{} is not an ELF file",
                path.display()
            )));
        }

        #[cfg(unix)]
        let owner = {
            use std::os::unix::fs::MetadataExt;
            (metadata.uid(), metadata.gid())
        };

        Ok(Self {
            path: path.to_path_buf(),
            access,
            image,
            permissions: metadata.permissions(),
            #[cfg(unix)]
            owner,
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

    /// Apply an edit through the ELF builder and adopt the resulting image.
    fn rebuild<T>(&mut self, edit: impl FnOnce(&mut Builder<'_>) -> Result<T>) -> Result<T> {
        let mut builder = Builder::read(self.image.as_slice())?;
        let res = edit(&mut builder)?;

        let mut out = Vec::with_capacity(self.image.len());
        builder.write(&mut out)?;

        self.image = out;
        self.modified = true;

        Ok(res)
    }

    /// Snapshot of every section except the null section.
    fn regions(&self) -> Result<Vec<Region>> {
        let file = object::File::parse(self.image.as_slice())?;

        file.sections()
            .filter(|section| section.index().0 != 0)
            .map(|section| {
                let name = section
                    .name_bytes()
                    .map_err(|_| ElfResourceError::NamePointer(section.index().0))?;
                let data = section
                    .data()
                    .map_err(|e| ElfResourceError::GetData(e.to_string()))?;

                Ok(Region {
                    index: section.index().0,
                    name: String::from_utf8_lossy(name).into_owned(),
                    offset: section.file_range().map(|(offset, _)| offset).unwrap_or(0),
                    size: data.len() as u64,
                })
            })
            .collect()
    }

    #[cfg(unix)]
    fn restore_owner(&self, path: &Path) {
        if let Err(e) = std::os::unix::fs::chown(path, Some(self.owner.0), Some(self.owner.1)) {
            debug!(
                "unable to restore ownership of {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn verify_builder_section(builder: &mut Builder<'_>, region: &Region) -> Result<usize> {
        // The builder table has no entry for the null section.
        let position = region.index.checked_sub(1).ok_or_else(|| {
            ElfResourceError::GetSectionHeader("the null section is not a region".to_string())
        })?;

        let section = builder.sections.iter().nth(position).ok_or_else(|| {
            ElfResourceError::GetSectionHeader(format!(
                "section index {} out of range",
                region.index
            ))
        })?;

        if &*section.name != region.name.as_bytes() {
            return Err(ElfResourceError::GetSectionHeader(format!(
                "section {} is no longer named {}",
                region.index, region.name
            )));
        }

        Ok(position)
    }
}

impl Backend for BuildBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Build
    }

    fn access(&self) -> Access {
        self.access
    }

    fn find(&mut self, name: &str) -> Result<Region> {
        self.regions()?
            .into_iter()
            .find(|region| region.name == name)
            .ok_or_else(|| ElfResourceError::NoSection(name.to_string()))
    }

    fn add(&mut self, name: &str) -> Result<Region> {
        self.require_write()?;
        validate_name(name)?;

        let index = self.rebuild(|builder| {
            if !builder
                .sections
                .iter()
                .any(|section| matches!(section.data, SectionData::SectionString))
            {
                return Err(ElfResourceError::NoNameTable);
            }

            let section = builder.sections.add();
            section.name = name.as_bytes().to_vec().into();
            section.sh_type = elf::SHT_NOTE;
            section.sh_flags = elf::SHF_WRITE as u64;
            section.sh_addralign = 1;
            section.data = SectionData::Data(Vec::new().into());

            Ok(builder.sections.iter().count())
        })?;

        debug!("added section {} as index {}", name, index);

        self.regions()?
            .into_iter()
            .find(|region| region.index == index)
            .ok_or_else(|| ElfResourceError::NewSection(name.to_string()))
    }

    fn remove(&mut self, region: &Region) -> Result<()> {
        self.require_write()?;

        self.rebuild(|builder| {
            let position = Self::verify_builder_section(builder, region)?;

            let section = builder
                .sections
                .iter_mut()
                .nth(position)
                .ok_or_else(|| ElfResourceError::RemoveSection(region.name.clone()))?;

            if matches!(section.data, SectionData::SectionString) {
                return Err(ElfResourceError::RemoveSection(
                    "refusing to remove the section name table".to_string(),
                ));
            }
            section.delete = true;

            Ok(())
        })?;

        debug!("removed section {} ({})", region.index, region.name);

        Ok(())
    }

    fn next(&mut self, after: Option<&Region>) -> Result<Option<Region>> {
        let start = after.map(|r| r.index + 1).unwrap_or(1);

        Ok(self
            .regions()?
            .into_iter()
            .find(|region| region.index >= start && region.size > 0))
    }

    fn name_of(&mut self, region: &Region) -> Option<String> {
        let file = object::File::parse(self.image.as_slice()).ok()?;
        let section = file.section_by_index(SectionIndex(region.index)).ok()?;

        section.name().ok().map(|name| name.to_string())
    }

    fn payload(&mut self, region: &Region) -> Result<Vec<u8>> {
        let file = object::File::parse(self.image.as_slice())?;
        let section = file
            .section_by_index(SectionIndex(region.index))
            .map_err(|e| ElfResourceError::GetSectionHeader(e.to_string()))?;

        Ok(section
            .data()
            .map_err(|e| ElfResourceError::GetData(e.to_string()))?
            .to_vec())
    }

    fn replace_payload(&mut self, region: &Region, offset: usize, data: &[u8]) -> Result<()> {
        self.require_write()?;

        let current = self.payload(region)?;
        let payload = spliced_payload(&current, offset, data)?;

        self.rebuild(move |builder| {
            let position = Self::verify_builder_section(builder, region)?;

            let section = builder
                .sections
                .iter_mut()
                .nth(position)
                .ok_or_else(|| ElfResourceError::Update(region.name.clone()))?;

            // Sections of type SHT_NOTE, which includes every section we add,
            // load as notes. Keep the variant so the section type survives.
            match &mut section.data {
                SectionData::Data(bytes) | SectionData::Note(bytes) => {
                    *bytes = payload.into();
                    section.sh_addralign = section.sh_addralign.max(1);

                    Ok(())
                }
                _ => Err(ElfResourceError::NewData(format!(
                    "section {} does not hold plain data",
                    region.name
                ))),
            }
        })
    }

    fn flush(&mut self) -> Result<()> {
        if !self.modified || self.access != Access::ReadWrite {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut temp = tempfile::Builder::new()
            .prefix(".elfres-")
            .tempfile_in(&dir)?;
        temp.write_all(&self.image)?;
        temp.as_file().sync_all()?;

        std::fs::set_permissions(temp.path(), self.permissions.clone())?;

        #[cfg(unix)]
        self.restore_owner(temp.path());

        temp.persist(&self.path).map_err(|e| e.error)?;
        self.modified = false;

        info!("wrote {} bytes to {}", self.image.len(), self.path.display());

        Ok(())
    }
}
