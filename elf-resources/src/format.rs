// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resource framing.

A resource is stored as the entire payload of one region:

| offset | size | field |
|---|---|---|
| 0 | 4 | magic `RES` followed by the format version `1` |
| 4 | 1 | storage type: 0 uncompressed, 1 zlib compressed |
| 5 | 4 | uncompressed size (little-endian), compressed resources only |
| 5 or 9 | | body |

Regions not starting with the magic are not resources and are ignored
when enumerating.
*/

use {
    crate::{
        backend::{Access, Backend, Region},
        error::{ElfResourceError, Result},
    },
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression},
    log::debug,
    std::{
        borrow::Cow,
        io::{Read, Write},
    },
};

/// Resource magic including the format version byte.
pub const MAGIC: [u8; 4] = *b"RES1";

/// Length of the header of an uncompressed resource.
pub const HEADER_LEN: usize = 5;

/// Length of the header of a compressed resource.
pub const COMPRESSED_HEADER_LEN: usize = 9;

/// How a resource body is stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum StorageType {
    Uncompressed = 0,
    Compressed = 1,
}

impl TryFrom<u8> for StorageType {
    type Error = ElfResourceError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Uncompressed),
            1 => Ok(Self::Compressed),
            _ => Err(ElfResourceError::InvalidType(v)),
        }
    }
}

/// Whether a region payload (or a prefix of it) is a resource.
pub fn is_resource(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data[0..4] == MAGIC
}

/// Worst case size of zlib output for `len` input bytes.
pub fn compressed_capacity(len: usize) -> usize {
    ((len + 12) * 11 + 9) / 10
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(compressed_capacity(data.len())),
        Compression::default(),
    );
    encoder
        .write_all(data)
        .map_err(ElfResourceError::Compress)?;

    encoder.finish().map_err(ElfResourceError::Compress)
}

pub fn decompress(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut res = Vec::with_capacity(expected);
    ZlibDecoder::new(data)
        .read_to_end(&mut res)
        .map_err(|e| ElfResourceError::Uncompress(e.to_string()))?;

    if res.len() != expected {
        return Err(ElfResourceError::Uncompress(format!(
            "expected {} bytes, got {}",
            expected,
            res.len()
        )));
    }

    Ok(res)
}

/// Decoded resource header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Header {
    storage: StorageType,
    uncompressed_size: Option<u32>,
}

impl Header {
    fn body_offset(&self) -> usize {
        match self.storage {
            StorageType::Uncompressed => HEADER_LEN,
            StorageType::Compressed => COMPRESSED_HEADER_LEN,
        }
    }
}

fn parse_header(data: &[u8], name: &str) -> Result<Header> {
    if !is_resource(data) {
        return Err(ElfResourceError::NotResource(name.to_string()));
    }

    let storage = StorageType::try_from(data[4])?;

    let uncompressed_size = match storage {
        StorageType::Uncompressed => None,
        StorageType::Compressed => {
            let mut field = data.get(HEADER_LEN..COMPRESSED_HEADER_LEN).ok_or_else(|| {
                ElfResourceError::SizeMismatch(format!("{} is missing its size field", name))
            })?;

            Some(field.read_u32::<LittleEndian>()?)
        }
    };

    Ok(Header {
        storage,
        uncompressed_size,
    })
}

/// Produce the framed header and body for a resource.
pub fn encode(data: &[u8], storage: StorageType) -> Result<(Vec<u8>, Cow<'_, [u8]>)> {
    let mut header = Vec::with_capacity(COMPRESSED_HEADER_LEN);
    header.extend_from_slice(&MAGIC);
    header.push(storage as u8);

    match storage {
        StorageType::Uncompressed => Ok((header, Cow::Borrowed(data))),
        StorageType::Compressed => {
            let size = u32::try_from(data.len()).map_err(|_| {
                ElfResourceError::InvalidParams(format!(
                    "{} bytes is too large to store compressed",
                    data.len()
                ))
            })?;
            header.write_u32::<LittleEndian>(size)?;

            Ok((header, Cow::Owned(compress(data)?)))
        }
    }
}

/// Decode a complete region payload into the resource content.
pub fn decode(payload: &[u8], name: &str) -> Result<Vec<u8>> {
    let header = parse_header(payload, name)?;
    let body = &payload[header.body_offset()..];

    match header.uncompressed_size {
        None => Ok(body.to_vec()),
        Some(size) => decompress(body, size as usize),
    }
}

fn require_write(backend: &dyn Backend) -> Result<()> {
    if backend.access() == Access::ReadWrite {
        Ok(())
    } else {
        Err(ElfResourceError::NoPermission)
    }
}

/// Store a resource in a region, creating the region when missing.
pub fn write_resource(
    backend: &mut dyn Backend,
    name: &str,
    data: &[u8],
    storage: StorageType,
    overwrite: bool,
) -> Result<()> {
    require_write(backend)?;

    let region = match backend.find(name) {
        Ok(_) if !overwrite => return Err(ElfResourceError::Overwrite(name.to_string())),
        Ok(region) => region,
        Err(ElfResourceError::NoSection(_)) => backend.add(name)?,
        Err(e) => return Err(e),
    };

    let (header, body) = encode(data, storage)?;

    backend.replace_payload(&region, 0, &header)?;
    backend.replace_payload(&region, header.len(), &body)?;

    debug!(
        "stored {} ({} bytes, {} bytes framed)",
        name,
        data.len(),
        header.len() + body.len()
    );

    Ok(())
}

/// Retrieve the content of a resource.
pub fn read_resource(backend: &mut dyn Backend, name: &str) -> Result<Vec<u8>> {
    let region = backend.find(name)?;
    let payload = backend.payload(&region)?;

    decode(&payload, name)
}

/// Retrieve the content of a resource into a caller supplied buffer.
///
/// Returns the number of bytes written.
pub fn read_into(backend: &mut dyn Backend, name: &str, buffer: &mut [u8]) -> Result<usize> {
    let data = read_resource(backend, name)?;

    if buffer.len() < data.len() {
        return Err(ElfResourceError::InvalidParams(format!(
            "buffer of {} bytes cannot hold {} ({} bytes)",
            buffer.len(),
            name,
            data.len()
        )));
    }

    buffer[..data.len()].copy_from_slice(&data);

    Ok(data.len())
}

/// Logical (uncompressed) size of a resource.
pub fn resource_size(backend: &mut dyn Backend, name: &str) -> Result<u64> {
    let region = backend.find(name)?;
    let prefix = backend.peek(&region, COMPRESSED_HEADER_LEN)?;
    let header = parse_header(&prefix, name)?;

    Ok(match header.uncompressed_size {
        Some(size) => size as u64,
        None => backend.size_of(&region).saturating_sub(HEADER_LEN as u64),
    })
}

/// Visit every region holding a resource until `visit` returns false.
fn scan(backend: &mut dyn Backend, mut visit: impl FnMut(Region) -> bool) -> Result<()> {
    let mut current: Option<Region> = None;

    while let Some(region) = backend.next(current.as_ref())? {
        let matches = backend
            .peek(&region, HEADER_LEN)
            .map(|prefix| is_resource(&prefix))
            .unwrap_or(false);

        if matches && !visit(region.clone()) {
            break;
        }

        current = Some(region);
    }

    Ok(())
}

/// Name of the resource at position `index` in region order.
pub fn list_resource(backend: &mut dyn Backend, index: usize) -> Result<Option<String>> {
    let mut seen = 0;
    let mut found = None;

    scan(backend, |region| {
        if seen == index {
            found = Some(region.name);
            false
        } else {
            seen += 1;
            true
        }
    })?;

    Ok(found)
}

/// Number of resources in the container.
pub fn count_resources(backend: &mut dyn Backend) -> Result<usize> {
    let mut count = 0;

    scan(backend, |_| {
        count += 1;
        true
    })?;

    Ok(count)
}

/// Names of every resource in region order.
pub fn resource_names(backend: &mut dyn Backend) -> Result<Vec<String>> {
    let mut names = vec![];

    scan(backend, |region| {
        names.push(region.name);
        true
    })?;

    Ok(names)
}

/// Empty a resource and remove its region.
pub fn clear_resource(backend: &mut dyn Backend, name: &str) -> Result<()> {
    require_write(backend)?;

    let region = backend.find(name)?;
    let prefix = backend.peek(&region, HEADER_LEN)?;
    if !is_resource(&prefix) {
        return Err(ElfResourceError::NotResource(name.to_string()));
    }

    backend.replace_payload(&region, 0, &[])?;
    backend.remove(&region)?;

    debug!("cleared {}", name);

    Ok(())
}
