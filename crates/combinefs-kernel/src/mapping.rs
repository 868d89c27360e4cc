//! Mapping table: ordered (physical root, virtual root) pairs.
//!
//! Declaration order is precedence order. The table is validated at
//! construction and immutable afterwards, so it needs no locking.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::resolve;

/// Error raised while building a mapping table. Construction failure
/// must abort startup.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("physical root does not exist or is not a directory: {0}")]
    MissingRoot(PathBuf),

    #[error("invalid mapping pair (expected \"physical|virtual\"): {0}")]
    InvalidPair(String),

    #[error("no mappings supplied")]
    Empty,
}

/// How virtual path segments are compared.
///
/// The reference behavior is case-sensitive even though the platform
/// filesystem usually is not; both are supported rather than hard-coding
/// either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    Insensitive,
}

impl CaseSensitivity {
    pub(crate) fn eq(self, a: &str, b: &str) -> bool {
        match self {
            Self::Sensitive => a == b,
            Self::Insensitive => a.eq_ignore_ascii_case(b),
        }
    }
}

/// One declared association of a physical directory with a virtual root.
#[derive(Debug, Clone)]
pub struct Mapping {
    physical_root: PathBuf,
    virtual_root: String,
}

impl Mapping {
    pub fn new(physical_root: impl Into<PathBuf>, virtual_root: impl Into<String>) -> Self {
        Self {
            physical_root: physical_root.into(),
            virtual_root: virtual_root.into(),
        }
    }

    pub fn physical_root(&self) -> &Path {
        &self.physical_root
    }

    pub fn virtual_root(&self) -> &str {
        &self.virtual_root
    }
}

impl FromStr for Mapping {
    type Err = MappingError;

    /// Parse the `"physical|virtual"` pair syntax of the mapping
    /// configuration surface.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (physical, virtual_root) = s
            .split_once('|')
            .ok_or_else(|| MappingError::InvalidPair(s.to_string()))?;
        if physical.is_empty() || virtual_root.is_empty() {
            return Err(MappingError::InvalidPair(s.to_string()));
        }
        Ok(Self::new(physical, virtual_root))
    }
}

/// Ordered, validated, immutable set of mappings.
#[derive(Debug, Clone)]
pub struct MappingTable {
    mappings: Vec<Mapping>,
    case: CaseSensitivity,
}

impl MappingTable {
    /// Build a table, validating that every physical root exists as a
    /// directory. Physical roots are canonicalized so watcher events
    /// (which carry resolved paths) translate back cleanly.
    pub fn new(
        mappings: Vec<Mapping>,
        case: CaseSensitivity,
    ) -> Result<Self, MappingError> {
        if mappings.is_empty() {
            return Err(MappingError::Empty);
        }
        let mut canonical = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            if !mapping.physical_root.is_dir() {
                return Err(MappingError::MissingRoot(mapping.physical_root));
            }
            let root = dunce::canonicalize(&mapping.physical_root)
                .unwrap_or(mapping.physical_root);
            canonical.push(Mapping {
                physical_root: root,
                virtual_root: mapping.virtual_root,
            });
        }
        Ok(Self {
            mappings: canonical,
            case,
        })
    }

    /// Default table: the local root volume mapped to the virtual root.
    pub fn default_table() -> Result<Self, MappingError> {
        let root = if cfg!(windows) { "C:\\" } else { "/" };
        Self::new(vec![Mapping::new(root, "/")], CaseSensitivity::default())
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    /// Translate a physical path back into the virtual namespace.
    ///
    /// Returns the first mapping (declaration order) whose physical root
    /// contains the path, or `None` when no root does. This is the
    /// translation function the change notifier relies on.
    pub fn virtual_path_of(&self, physical: &Path) -> Option<String> {
        for mapping in &self.mappings {
            if let Ok(rel) = physical.strip_prefix(&mapping.physical_root) {
                let mut out = String::from("/");
                for seg in resolve::segments(&mapping.virtual_root) {
                    out.push_str(seg);
                    out.push('/');
                }
                for component in rel.components() {
                    out.push_str(&component.as_os_str().to_string_lossy());
                    out.push('/');
                }
                if out.len() > 1 {
                    out.pop();
                }
                return Some(out);
            }
        }
        None
    }
}
