// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Icon resources.

Icons are ordinary compressed resources. In addition, a binary carrying
icons holds an uncompressed `.icon` resource describing them. Its layout
(all integers little-endian) is:

* `u32` number of entries
* 16 byte UUID identifying the application
* entries, each:
  * `u32` size of the entry including this field
  * `u8` icon type (0 SVG, 1 PNG)
  * `u32` pixel size of the square icon, PNG only
  * NUL terminated resource name

The directory is created by [set_uuid]. Icons can only be added once it
exists.
*/

use {
    crate::{
        error::{ElfResourceError, Result},
        file::ResourceFile,
        format::StorageType,
    },
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::{io::Cursor, path::Path},
    uuid::Uuid,
};

/// Name of the icon directory resource.
pub const ICON_SECTION: &str = ".icon";

const HEADER_LEN: usize = 20;

/// Kind of image data an icon holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum IconType {
    Svg = 0,
    Png = 1,
}

impl TryFrom<u8> for IconType {
    type Error = ElfResourceError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Svg),
            1 => Ok(Self::Png),
            _ => Err(ElfResourceError::InvalidType(v)),
        }
    }
}

/// Icon image data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Icon {
    pub icon_type: IconType,
    /// Edge length in pixels. Meaningless for SVG.
    pub size: u32,
    pub data: Vec<u8>,
}

impl Icon {
    pub fn new(icon_type: IconType, size: u32, data: Vec<u8>) -> Self {
        Self {
            icon_type,
            size,
            data,
        }
    }

    /// Load icon image data from a file.
    pub fn from_file(icon_type: IconType, size: u32, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| ElfResourceError::OpenFailed(path.to_path_buf(), e))?;

        Ok(Self::new(icon_type, size, data))
    }

    /// Write the image data to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.data)?;

        Ok(())
    }
}

/// An entry of the icon directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IconEntry {
    pub name: String,
    pub icon_type: IconType,
    pub size: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct IconDirectory {
    uuid: [u8; 16],
    entries: Vec<IconEntry>,
}

fn truncated(what: &str) -> ElfResourceError {
    ElfResourceError::SizeMismatch(format!("icon directory truncated in {}", what))
}

impl IconDirectory {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(truncated("header"));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[4..HEADER_LEN]);

        let mut entries = vec![];
        let mut offset = HEADER_LEN;

        while offset < data.len() {
            let mut reader = Cursor::new(&data[offset..]);
            let entry_size = reader
                .read_u32::<LittleEndian>()
                .map_err(|_| truncated("entry size"))? as usize;
            let entry = data
                .get(offset..offset + entry_size)
                .filter(|_| entry_size > 5)
                .ok_or_else(|| truncated("entry"))?;

            let mut reader = Cursor::new(entry);
            reader.set_position(4);
            let icon_type = IconType::try_from(reader.read_u8()?)?;
            let size = match icon_type {
                IconType::Svg => 0,
                IconType::Png => reader
                    .read_u32::<LittleEndian>()
                    .map_err(|_| truncated("icon size"))?,
            };

            let name = &entry[reader.position() as usize..];
            let name = match name.iter().position(|b| *b == 0) {
                Some(end) => &name[..end],
                None => name,
            };

            entries.push(IconEntry {
                name: String::from_utf8_lossy(name).into_owned(),
                icon_type,
                size,
            });

            offset += entry_size;
        }

        Ok(Self { uuid, entries })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut res = Vec::with_capacity(HEADER_LEN);
        res.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        res.extend_from_slice(&self.uuid);

        for entry in &self.entries {
            let size_field = if entry.icon_type == IconType::Png {
                4
            } else {
                0
            };
            let entry_size = 4 + 1 + size_field + entry.name.len() + 1;

            res.write_u32::<LittleEndian>(entry_size as u32)?;
            res.write_u8(entry.icon_type as u8)?;
            if entry.icon_type == IconType::Png {
                res.write_u32::<LittleEndian>(entry.size)?;
            }
            res.extend_from_slice(entry.name.as_bytes());
            res.push(0);
        }

        Ok(res)
    }

    fn set_uuid(&mut self, uuid: &Uuid) -> Result<()> {
        let (d1, d2, d3, d4) = uuid.as_fields();

        let mut raw = Vec::with_capacity(16);
        raw.write_u32::<LittleEndian>(d1)?;
        raw.write_u16::<LittleEndian>(d2)?;
        raw.write_u16::<LittleEndian>(d3)?;
        raw.write_u16::<LittleEndian>(u16::from_be_bytes([d4[0], d4[1]]))?;
        raw.extend(d4[2..].iter().rev());

        self.uuid.copy_from_slice(&raw);

        Ok(())
    }

    fn uuid(&self) -> Result<Uuid> {
        let mut reader = Cursor::new(&self.uuid[..]);
        let d1 = reader.read_u32::<LittleEndian>()?;
        let d2 = reader.read_u16::<LittleEndian>()?;
        let d3 = reader.read_u16::<LittleEndian>()?;
        let g4 = reader.read_u16::<LittleEndian>()?;

        let mut d4 = [0u8; 8];
        d4[0..2].copy_from_slice(&g4.to_be_bytes());
        for (i, b) in self.uuid[10..16].iter().rev().enumerate() {
            d4[2 + i] = *b;
        }

        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    let value = value.trim_end();

    let well_formed = value.len() == 36
        && value.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        });

    if !well_formed {
        return Err(ElfResourceError::InvalidParams(format!(
            "not a UUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx: {}",
            value
        )));
    }

    Uuid::parse_str(value).map_err(|e| ElfResourceError::InvalidParams(e.to_string()))
}

fn load_directory(file: &ResourceFile) -> Result<IconDirectory> {
    IconDirectory::parse(&file.read(ICON_SECTION)?)
}

fn store_directory(file: &mut ResourceFile, directory: &IconDirectory) -> Result<()> {
    file.write(
        ICON_SECTION,
        &directory.to_bytes()?,
        StorageType::Uncompressed,
        true,
    )
}

/// Set the application UUID, creating the icon directory if needed.
pub fn set_uuid(file: &mut ResourceFile, uuid: &str) -> Result<()> {
    let uuid = parse_uuid(uuid)?;

    let mut directory = match load_directory(file) {
        Ok(directory) => directory,
        Err(ElfResourceError::NoSection(_)) => IconDirectory::default(),
        Err(e) => return Err(e),
    };
    directory.set_uuid(&uuid)?;

    store_directory(file, &directory)
}

/// The application UUID in its hyphenated form.
pub fn uuid(file: &ResourceFile) -> Result<String> {
    Ok(load_directory(file)?.uuid()?.hyphenated().to_string())
}

/// Entries of the icon directory.
pub fn icons(file: &ResourceFile) -> Result<Vec<IconEntry>> {
    Ok(load_directory(file)?.entries)
}

/// Store an icon under `name` and record it in the icon directory.
pub fn write_icon(file: &mut ResourceFile, icon: &Icon, name: &str, overwrite: bool) -> Result<()> {
    if name == ICON_SECTION {
        return Err(ElfResourceError::InvalidParams(format!(
            "{} is reserved for the icon directory",
            ICON_SECTION
        )));
    }

    let mut directory = load_directory(file)?;

    file.write(name, &icon.data, StorageType::Compressed, overwrite)?;

    if !directory.entries.iter().any(|entry| entry.name == name) {
        directory.entries.push(IconEntry {
            name: name.to_string(),
            icon_type: icon.icon_type,
            size: icon.size,
        });

        store_directory(file, &directory)?;
    }

    Ok(())
}

/// Retrieve an icon by its resource name.
pub fn icon_by_name(file: &ResourceFile, name: &str) -> Result<Icon> {
    let directory = load_directory(file)?;
    let entry = directory
        .entries
        .iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| ElfResourceError::NoSection(name.to_string()))?;

    Ok(Icon::new(entry.icon_type, entry.size, file.read(name)?))
}

/// Retrieve the icon best suited for a square of `size` pixels.
///
/// A PNG of exactly the requested size wins. Otherwise an SVG is used if
/// present, and the closest PNG if not. A size of 0 asks for the SVG.
pub fn icon_by_size(file: &ResourceFile, size: u32) -> Result<Icon> {
    let directory = load_directory(file)?;

    let closest_png = directory
        .entries
        .iter()
        .filter(|entry| entry.icon_type == IconType::Png)
        .min_by_key(|entry| (entry.size as i64 - size as i64).abs());
    let svg = directory
        .entries
        .iter()
        .find(|entry| entry.icon_type == IconType::Svg);

    match (closest_png, svg) {
        (Some(png), Some(_)) if png.size == size && size != 0 => icon_by_name(file, &png.name),
        (_, Some(svg)) => {
            let mut icon = icon_by_name(file, &svg.name)?;
            icon.size = size;
            Ok(icon)
        }
        (Some(png), None) => icon_by_name(file, &png.name),
        (None, None) => Err(ElfResourceError::NoSection(format!(
            "icon of size {}",
            size
        ))),
    }
}
