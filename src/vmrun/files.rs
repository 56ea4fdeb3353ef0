//! Filesystem steps of the vmrun lifecycle, performed through `cap-std`.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::error::ApiError;

/// Extension of the memory image written by `vmrun suspend`.
pub const SUSPEND_IMAGE_EXTENSION: &str = "vmss";

fn io_error(operation: &str, path: &Utf8Path, err: &io::Error) -> ApiError {
    ApiError::Io {
        operation: operation.to_owned(),
        path: path.to_string(),
        message: err.to_string(),
    }
}

fn split(path: &Utf8Path) -> (&Utf8Path, Option<&str>) {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    (parent, path.file_name())
}

/// Returns `true` when `path` exists.
pub(crate) fn exists(path: &Utf8Path) -> Result<bool, ApiError> {
    let (parent, Some(name)) = split(path) else {
        return Ok(true);
    };
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir
            .try_exists(name)
            .map_err(|err| io_error("inspect", path, &err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error("open", parent, &err)),
    }
}

/// Copies the directory tree at `source` into a new directory `destination`.
pub(crate) fn copy_tree(source: &Utf8Path, destination: &Utf8Path) -> Result<(), ApiError> {
    let from = Dir::open_ambient_dir(source, ambient_authority())
        .map_err(|err| io_error("open", source, &err))?;
    Dir::create_ambient_dir_all(destination, ambient_authority())
        .map_err(|err| io_error("create", destination, &err))?;
    let to = Dir::open_ambient_dir(destination, ambient_authority())
        .map_err(|err| io_error("open", destination, &err))?;
    copy_entries(&from, &to).map_err(|err| io_error("copy into", destination, &err))
}

fn copy_entries(from: &Dir, to: &Dir) -> io::Result<()> {
    for item in from.entries()? {
        let entry = item?;
        let name = entry.file_name()?;
        if entry.file_type()?.is_dir() {
            to.create_dir(&name)?;
            copy_entries(&from.open_dir(&name)?, &to.open_dir(&name)?)?;
        } else {
            from.copy(&name, to, &name)?;
        }
    }
    Ok(())
}

/// Reads a UTF-8 file.
pub(crate) fn read(path: &Utf8Path) -> Result<String, ApiError> {
    let (parent, Some(name)) = split(path) else {
        return Err(io_error(
            "read",
            path,
            &io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        ));
    };
    Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(name))
        .map_err(|err| io_error("read", path, &err))
}

/// Replaces the contents of a file.
pub(crate) fn write(path: &Utf8Path, contents: &str) -> Result<(), ApiError> {
    let (parent, Some(name)) = split(path) else {
        return Err(io_error(
            "write",
            path,
            &io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        ));
    };
    Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.write(name, contents))
        .map_err(|err| io_error("write", path, &err))
}

/// Removes the directory tree at `path`; an absent tree is not an error.
pub(crate) fn remove_tree(path: &Utf8Path) -> Result<(), ApiError> {
    let (parent, Some(name)) = split(path) else {
        return Err(io_error(
            "remove",
            path,
            &io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        ));
    };
    let result = Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.remove_dir_all(name));
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error("remove", path, &err)),
    }
}

/// Returns `true` when `directory` holds a suspend image.
pub(crate) fn has_suspend_image(directory: &Utf8Path) -> Result<bool, ApiError> {
    let dir = match Dir::open_ambient_dir(directory, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_error("open", directory, &err)),
    };
    let entries = dir
        .entries()
        .map_err(|err| io_error("list", directory, &err))?;
    for item in entries {
        let name = item
            .and_then(|entry| entry.file_name())
            .map_err(|err| io_error("list", directory, &err))?;
        if Utf8Path::new(&name).extension() == Some(SUSPEND_IMAGE_EXTENSION) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolves symlinks in `path`, returning `None` when it cannot be resolved.
pub(crate) fn canonical(path: &Utf8Path) -> Option<Utf8PathBuf> {
    path.canonicalize_utf8().ok()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non UTF-8 temp dir {}", path.display()))
    }

    #[test]
    fn copy_tree_recurses_and_remove_tree_tolerates_absence() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = utf8(&tmp);
        let source = root.join("source");
        std::fs::create_dir_all(source.join("caches"))
            .unwrap_or_else(|err| panic!("mkdir: {err}"));
        std::fs::write(source.join("box.vmx"), "memsize = \"1024\"\n")
            .unwrap_or_else(|err| panic!("write vmx: {err}"));
        std::fs::write(source.join("caches/disk.vmdk"), "disk")
            .unwrap_or_else(|err| panic!("write disk: {err}"));
        let destination = root.join("clone");

        copy_tree(&source, &destination).unwrap_or_else(|err| panic!("copy: {err}"));

        assert_eq!(
            read(&destination.join("box.vmx")).unwrap_or_else(|err| panic!("read: {err}")),
            "memsize = \"1024\"\n"
        );
        assert!(exists(&destination.join("caches/disk.vmdk")).unwrap_or(false));

        remove_tree(&destination).unwrap_or_else(|err| panic!("remove: {err}"));
        assert!(!exists(&destination).unwrap_or(true));
        remove_tree(&destination).unwrap_or_else(|err| panic!("second remove: {err}"));
    }

    #[test]
    fn suspend_image_is_detected_by_extension() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = utf8(&tmp);
        assert!(!has_suspend_image(&root).unwrap_or(true));

        std::fs::write(root.join("box-Snapshot1.vmss"), "")
            .unwrap_or_else(|err| panic!("write vmss: {err}"));
        assert!(has_suspend_image(&root).unwrap_or(false));
    }
}
