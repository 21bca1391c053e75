//! ConfigFS session handling and low-level file operations.
//!
//! Everything here is plain blocking `std::fs` I/O against the kernel's
//! configfs USB gadget tree. Path arguments are never assumed to be the real
//! `/sys/kernel/config`; tests point them at temporary directories.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{GadgetError, Result};

/// Conventional configfs mount point.
pub const CONFIGFS_MOUNT: &str = "/sys/kernel/config";

/// Directory holding one entry per registered USB Device Controller.
pub const UDC_CLASS_PATH: &str = "/sys/class/udc";

/// Session handle over the `usb_gadget` root of a mounted configfs.
///
/// Opening validates that gadget support is present; the handle is released
/// by `Drop` on every exit path, so callers never leak the session even when
/// a lifecycle pipeline aborts halfway.
#[derive(Debug)]
pub struct ConfigFs {
    root: PathBuf,
}

impl ConfigFs {
    /// Open a session against a configfs mount point.
    ///
    /// The gadget root is the mount's `usb_gadget` child, mirroring how the
    /// kernel exposes gadget support. Fails if that directory does not exist.
    pub fn open(mount: impl AsRef<Path>) -> Result<Self> {
        let root = mount.as_ref().join("usb_gadget");
        if !root.is_dir() {
            return Err(GadgetError::SessionInit(root));
        }
        Ok(Self { root })
    }

    /// Gadget root directory, e.g. `/sys/kernel/config/usb_gadget`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named gadget under this session's root.
    pub fn gadget_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// List the names of all gadgets currently present.
    ///
    /// The full name list is snapshotted before returning, so callers may
    /// remove gadgets while iterating without invalidating the traversal.
    pub fn gadget_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| GadgetError::AttributeRead {
            path: self.root.clone(),
            source: e,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GadgetError::AttributeRead {
                path: self.root.clone(),
                source: e,
            })?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }
}

/// Check whether a configfs mount with gadget support is present.
pub fn is_configfs_available() -> bool {
    Path::new(CONFIGFS_MOUNT).join("usb_gadget").is_dir()
}

/// Find the first available UDC on the system.
pub fn find_udc() -> Option<String> {
    find_udc_in(Path::new(UDC_CLASS_PATH))
}

/// Find the first UDC entry under the given class directory.
pub fn find_udc_in(udc_dir: &Path) -> Option<String> {
    if !udc_dir.exists() {
        return None;
    }

    fs::read_dir(udc_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .next()
}

/// Write string content to a configfs/sysfs attribute file.
///
/// sysfs attributes require a single atomic write() syscall: the kernel
/// processes the value on the first write, so the complete buffer (including
/// the trailing newline) must be built before writing.
pub fn write_attr(path: &Path, content: &str) -> Result<()> {
    // Attribute files under configfs already exist; fall back to create only
    // for plain filesystems (tests).
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| GadgetError::AttributeWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .and_then(|_| file.flush())
        .map_err(|e| GadgetError::AttributeWrite {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write binary content to an attribute file (report descriptors).
pub fn write_attr_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| GadgetError::AttributeWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    file.write_all(data).map_err(|e| GadgetError::AttributeWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read and trim an attribute file.
pub fn read_attr(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| GadgetError::AttributeRead {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Create a directory and any missing parents.
pub fn create_dir(kind: &'static str, path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| GadgetError::Create {
        kind,
        path: path.to_path_buf(),
        source: e,
    })
}

/// Create a directory, failing if it already exists.
///
/// Used for the gadget node itself: a second configure against the same
/// session must fail here on the duplicate name rather than silently reuse
/// the existing gadget.
pub fn create_dir_exclusive(kind: &'static str, path: &Path) -> Result<()> {
    fs::create_dir(path).map_err(|e| GadgetError::Create {
        kind,
        path: path.to_path_buf(),
        source: e,
    })
}

/// Remove a directory if present.
pub fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir(path).map_err(|e| GadgetError::Remove {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Remove a file or symlink if present.
pub fn remove_file(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).map_err(|e| GadgetError::Remove {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Create a symlink, configfs's representation of function attachment.
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| GadgetError::Attach {
        path: dest.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_gadget_root() {
        let tmp = TempDir::new().unwrap();
        assert!(ConfigFs::open(tmp.path()).is_err());

        fs::create_dir(tmp.path().join("usb_gadget")).unwrap();
        let session = ConfigFs::open(tmp.path()).unwrap();
        assert_eq!(session.root(), tmp.path().join("usb_gadget"));
    }

    #[test]
    fn test_write_attr_appends_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idVendor");

        write_attr(&path, "0x1d6b").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0x1d6b\n");

        // Already-terminated content is written as-is
        write_attr(&path, "0x0142\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0x0142\n");

        assert_eq!(read_attr(&path).unwrap(), "0x0142");
    }

    #[test]
    fn test_create_dir_exclusive_rejects_duplicate() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("g1");

        create_dir_exclusive("gadget", &path).unwrap();
        let err = create_dir_exclusive("gadget", &path).unwrap_err();
        assert!(matches!(err, GadgetError::Create { kind: "gadget", .. }));
    }

    #[test]
    fn test_find_udc_in() {
        let tmp = TempDir::new().unwrap();
        assert!(find_udc_in(&tmp.path().join("missing")).is_none());
        assert!(find_udc_in(tmp.path()).is_none());

        fs::write(tmp.path().join("dummy_udc"), "").unwrap();
        assert_eq!(find_udc_in(tmp.path()).as_deref(), Some("dummy_udc"));
    }

    #[test]
    fn test_gadget_names_snapshot() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("usb_gadget")).unwrap();
        let session = ConfigFs::open(tmp.path()).unwrap();

        fs::create_dir(session.gadget_path("g1")).unwrap();
        fs::create_dir(session.gadget_path("other")).unwrap();

        let mut names = session.gadget_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["g1".to_string(), "other".to_string()]);
    }
}
