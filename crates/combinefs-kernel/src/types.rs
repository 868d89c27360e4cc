//! Core engine types.
//!
//! The open-mode, access-mask and attribute types mirror the Win32/NTFS
//! vocabulary the driver speaks. Value types carry serde derives so they
//! can cross an RPC boundary unchanged.

use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::Path;
use std::time::SystemTime;

/// File attribute bits, Win32 numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileAttributes(pub u32);

impl FileAttributes {
    pub const NONE: Self = Self(0);
    pub const READ_ONLY: Self = Self(0x0001);
    pub const HIDDEN: Self = Self(0x0002);
    pub const SYSTEM: Self = Self(0x0004);
    pub const DIRECTORY: Self = Self(0x0010);
    pub const ARCHIVE: Self = Self(0x0020);
    pub const NORMAL: Self = Self(0x0080);
    pub const TEMPORARY: Self = Self(0x0100);

    /// Returns true if every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// A zero attribute value means "do not change attributes".
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Clear the given bits.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Derive attributes from filesystem metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mut attrs = if meta.is_dir() {
            Self::DIRECTORY
        } else {
            Self::ARCHIVE
        };
        if meta.permissions().readonly() {
            attrs |= Self::READ_ONLY;
        }
        attrs
    }
}

impl BitOr for FileAttributes {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FileAttributes {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Requested access mask, Win32 numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMask(pub u32);

impl AccessMask {
    pub const READ_DATA: Self = Self(0x0000_0001);
    pub const WRITE_DATA: Self = Self(0x0000_0002);
    pub const APPEND_DATA: Self = Self(0x0000_0004);
    pub const EXECUTE: Self = Self(0x0000_0020);
    pub const DELETE: Self = Self(0x0001_0000);
    pub const SYNCHRONIZE: Self = Self(0x0010_0000);
    pub const GENERIC_EXECUTE: Self = Self(0x2000_0000);
    pub const GENERIC_WRITE: Self = Self(0x4000_0000);
    pub const GENERIC_READ: Self = Self(0x8000_0000);

    /// Bits that imply actual data access rather than metadata-only use.
    pub const DATA_ACCESS: Self = Self(
        Self::READ_DATA.0
            | Self::WRITE_DATA.0
            | Self::APPEND_DATA.0
            | Self::EXECUTE.0
            | Self::GENERIC_EXECUTE.0
            | Self::GENERIC_WRITE.0
            | Self::GENERIC_READ.0,
    );

    /// Bits that imply write-capable data access.
    pub const DATA_WRITE_ACCESS: Self = Self(
        Self::WRITE_DATA.0 | Self::APPEND_DATA.0 | Self::DELETE.0 | Self::GENERIC_WRITE.0,
    );

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The request only touches attributes/metadata, never file data.
    pub fn is_metadata_only(self) -> bool {
        self.0 & Self::DATA_ACCESS.0 == 0
    }

    /// The request carries no write-capable bits.
    pub fn is_read_only(self) -> bool {
        self.0 & Self::DATA_WRITE_ACCESS.0 == 0
    }
}

impl BitOr for AccessMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Requested sharing mode. Applied to the native open on Windows, where
/// the kernel enforces it; advisory elsewhere (unix has no mandatory
/// share enforcement, so the value is recorded but not applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareMode(pub u32);

impl ShareMode {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x1);
    pub const WRITE: Self = Self(0x2);
    pub const DELETE: Self = Self(0x4);
}

/// Open disposition, Win32 `FileMode` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Open an existing target; fail if missing.
    Open,
    /// Create a new target; fail if it exists.
    CreateNew,
    /// Open if present, create otherwise.
    OpenOrCreate,
    /// Create, truncating any existing target.
    Create,
    /// Truncate an existing target; fail if missing.
    Truncate,
}

/// Directory entry / file information record.
///
/// Synthetic (virtual-only) directories report read-only + directory
/// attributes, "now" timestamps and zero length. Identity is the full
/// record, which is also the merge-dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub attributes: FileAttributes,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub length: u64,
}

impl FileInfo {
    /// Build a record from filesystem metadata.
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        Self {
            name: name.into(),
            attributes: FileAttributes::from_metadata(meta),
            created: meta.created().unwrap_or(SystemTime::UNIX_EPOCH),
            accessed: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            length: if meta.is_dir() { 0 } else { meta.len() },
        }
    }

    /// Build a synthetic directory record.
    pub fn synthetic_directory(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            attributes: FileAttributes::READ_ONLY | FileAttributes::DIRECTORY,
            created: now,
            accessed: now,
            modified: now,
            length: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// Optional time fields for set-times. Absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SetFileTimes {
    pub creation: Option<SystemTime>,
    pub last_access: Option<SystemTime>,
    pub last_write: Option<SystemTime>,
}

impl SetFileTimes {
    pub fn is_empty(&self) -> bool {
        self.creation.is_none() && self.last_access.is_none() && self.last_write.is_none()
    }
}

/// Security descriptor, reduced to what the platform security API
/// exposes portably. The engine passes these through without
/// reinterpreting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    /// Permission bits (Unix mode).
    pub mode: u32,
    /// Owning user, when known.
    pub uid: Option<u32>,
    /// Owning group, when known.
    pub gid: Option<u32>,
}

/// Aggregated free-space counters across the mapped physical volumes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiskSpace {
    pub free_bytes_available: u64,
    pub total_bytes: u64,
    pub total_free_bytes: u64,
}

/// Volume feature flags, Win32 numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeFeatures(pub u32);

impl VolumeFeatures {
    pub const CASE_SENSITIVE_SEARCH: Self = Self(0x0001);
    pub const CASE_PRESERVED_NAMES: Self = Self(0x0002);
    pub const UNICODE_ON_DISK: Self = Self(0x0004);
    pub const PERSISTENT_ACLS: Self = Self(0x0008);
    pub const SUPPORTS_REMOTE_STORAGE: Self = Self(0x0100);
}

impl BitOr for VolumeFeatures {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Static volume description. Not derived from any mapped volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub label: String,
    pub filesystem_name: String,
    pub features: VolumeFeatures,
    pub max_component_length: u32,
}

impl Default for VolumeInfo {
    fn default() -> Self {
        Self {
            label: "Virtual Drive".to_string(),
            filesystem_name: "NTFS".to_string(),
            features: VolumeFeatures::CASE_PRESERVED_NAMES
                | VolumeFeatures::CASE_SENSITIVE_SEARCH
                | VolumeFeatures::PERSISTENT_ACLS
                | VolumeFeatures::SUPPORTS_REMOTE_STORAGE
                | VolumeFeatures::UNICODE_ON_DISK,
            max_component_length: 256,
        }
    }
}

/// Parameters for create/open.
#[derive(Debug, Clone, Copy)]
pub struct CreateRequest {
    pub access: AccessMask,
    pub share: ShareMode,
    pub mode: OpenMode,
    pub attributes: FileAttributes,
    /// The driver flags the target as a directory.
    pub is_directory: bool,
}

/// Final path segment of a virtual path, used for file-information names.
pub(crate) fn leaf_name(virtual_path: &str) -> &str {
    virtual_path
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Best-effort attribute application on the physical target.
///
/// A zero value means "do not change". Only the read-only bit has a
/// portable physical representation; the remaining bits are accepted
/// and dropped, matching the platform delegation contract.
pub(crate) fn apply_attributes(path: &Path, attrs: FileAttributes) -> std::io::Result<()> {
    if attrs.is_empty() {
        return Ok(());
    }
    let meta = std::fs::metadata(path)?;
    let mut perm = meta.permissions();
    if attrs.contains(FileAttributes::READ_ONLY) {
        perm.set_readonly(true);
        std::fs::set_permissions(path, perm)?;
    } else if perm.readonly() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perm.set_mode(perm.mode() | 0o200);
        }
        #[cfg(not(unix))]
        perm.set_readonly(false);
        std::fs::set_permissions(path, perm)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mask_classification() {
        let metadata_only = AccessMask(0x0008); // READ_EA, no data bits
        assert!(metadata_only.is_metadata_only());
        assert!(metadata_only.is_read_only());

        let read = AccessMask::GENERIC_READ;
        assert!(!read.is_metadata_only());
        assert!(read.is_read_only());

        let write = AccessMask::READ_DATA | AccessMask::WRITE_DATA;
        assert!(!write.is_metadata_only());
        assert!(!write.is_read_only());

        let delete = AccessMask::DELETE;
        assert!(delete.is_metadata_only());
        assert!(!delete.is_read_only());
    }

    #[test]
    fn test_attribute_bits() {
        let mut attrs = FileAttributes::NORMAL;
        attrs |= FileAttributes::ARCHIVE;
        let attrs = attrs.without(FileAttributes::NORMAL);
        assert!(attrs.contains(FileAttributes::ARCHIVE));
        assert!(!attrs.contains(FileAttributes::NORMAL));
        assert!(FileAttributes::NONE.is_empty());
    }

    #[test]
    fn test_synthetic_directory_record() {
        let info = FileInfo::synthetic_directory("q");
        assert_eq!(info.name, "q");
        assert!(info.is_directory());
        assert!(info.attributes.contains(FileAttributes::READ_ONLY));
        assert_eq!(info.length, 0);
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name("/a/b/c.txt"), "c.txt");
        assert_eq!(leaf_name("\\a\\b"), "b");
        assert_eq!(leaf_name("/"), "");
    }
}
