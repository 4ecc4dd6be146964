// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Extraction of resources to the filesystem.

Some consumers can only load data from files. The functions here write
every resource of a binary into a fresh temporary directory. The directory
is registered with [crate::cleanup] and removed at process exit unless
removed earlier with [remove_extracted].
*/

use {
    crate::{
        cleanup,
        error::{ElfResourceError, Result},
        file::{OpenOptions, ResourceFile},
        status,
    },
    log::debug,
    std::path::{Component, Path, PathBuf},
};

/// Prefix of directories created by [extract_resources].
pub const TEMP_PREFIX: &str = "libr-temp.";

/// Resolve a resource name to a path relative to the extraction directory.
fn relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut res = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => res.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ElfResourceError::InvalidParams(format!(
                    "resource name cannot be extracted safely: {}",
                    name
                )))
            }
        }
    }

    if res.as_os_str().is_empty() {
        return Err(ElfResourceError::InvalidParams(format!(
            "resource name does not name a file: {:?}",
            name
        )));
    }

    Ok(res)
}

fn write_resources(file: &ResourceFile, dest: &Path) -> Result<()> {
    for name in file.names()? {
        let target = dest.join(relative_path(&name)?);
        let data = file.read(&name)?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &data)?;

        debug!("extracted {} to {}", name, target.display());
    }

    Ok(())
}

fn extract_inner(file: &ResourceFile) -> Result<PathBuf> {
    let dest = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir()?
        .keep();

    if let Err(e) = write_resources(file, &dest) {
        let _ = std::fs::remove_dir_all(&dest);
        return Err(e);
    }

    cleanup::registry().register_folder(&dest);

    Ok(dest)
}

/// Write every resource of `file` into a new temporary directory.
///
/// Resource names containing `/` produce nested directories.
pub fn extract_resources(file: &ResourceFile) -> Result<PathBuf> {
    status::record("extract", extract_inner(file))
}

/// Extract the resources embedded in the running executable.
pub fn extract_self_resources() -> Result<PathBuf> {
    let file = OpenOptions::new().internal(true).open_self()?;
    let res = extract_resources(&file);
    file.close()?;

    res
}

/// Delete a directory created by [extract_resources] ahead of exit.
pub fn remove_extracted(path: &Path) -> Result<()> {
    cleanup::registry().unregister_folder(path);
    std::fs::remove_dir_all(path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            backend::{Access, BackendKind},
            format::StorageType,
            testutil::{host_elf, registry_lock, write_file},
        },
    };

    #[test]
    fn names_to_paths() {
        assert_eq!(relative_path("a.txt").unwrap(), PathBuf::from("a.txt"));
        assert_eq!(
            relative_path("locale/de/app.mo").unwrap(),
            PathBuf::from("locale/de/app.mo")
        );
        assert_eq!(relative_path("./x").unwrap(), PathBuf::from("x"));
        assert!(relative_path("../escape").is_err());
        assert!(relative_path("a/../../b").is_err());
        assert!(relative_path("/etc/passwd").is_err());
        assert!(relative_path(".").is_err());
    }

    #[test]
    fn extract_and_remove() -> Result<()> {
        let _registry = registry_lock();
        let td = tempfile::tempdir()?;
        let path = write_file(td.path(), "app", &host_elf());

        let mut file = OpenOptions::new()
            .access(Access::ReadWrite)
            .backend(BackendKind::Edit)
            .open(&path)?;
        file.write("ui.xml", b"<ui/>", StorageType::Uncompressed, false)?;
        file.write("locale/fr/app.mo", b"mo data", StorageType::Compressed, false)?;

        let dest = extract_resources(&file)?;
        assert!(dest
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));
        assert_eq!(std::fs::read(dest.join("ui.xml"))?, b"<ui/>");
        assert_eq!(std::fs::read(dest.join("locale/fr/app.mo"))?, b"mo data");

        remove_extracted(&dest)?;
        assert!(!dest.exists());

        Ok(())
    }

    #[test]
    fn unsafe_names_abort_extraction() -> Result<()> {
        let _registry = registry_lock();
        let td = tempfile::tempdir()?;
        let path = write_file(td.path(), "app", &host_elf());

        let mut file = OpenOptions::new()
            .access(Access::ReadWrite)
            .backend(BackendKind::Edit)
            .open(&path)?;
        file.write("../escape", b"x", StorageType::Uncompressed, false)?;

        assert!(matches!(
            extract_resources(&file),
            Err(ElfResourceError::InvalidParams(_))
        ));

        Ok(())
    }
}
