//! # combinefs-kernel
//!
//! Union-mount virtual drive engine: merges N physical directories into
//! one virtual namespace with Win32-style open semantics.
//!
//! Key components:
//!
//! - [`MappingTable`] - Ordered (physical root, virtual root) pairs
//! - [`DriveOps`] - The driver-facing operations trait
//! - [`CombineFs`] - The engine implementing it
//! - [`ChangeNotifier`] - Forwards physical change events to the driver
//!
//! ## Design Decisions
//!
//! - **First mapping wins**: Files resolve to the first declared mapping
//!   that has them; directories merge entries from every mapping.
//! - **No resolution cache**: Every operation re-resolves against the
//!   live filesystem, so out-of-band changes to the physical roots are
//!   always visible.
//! - **Check at delete, unlink at cleanup**: Deletion verbs only verify
//!   feasibility; the actual removal happens when the last handle is
//!   cleaned up with delete-on-close set.

mod engine;
mod error;
mod handle;
mod mapping;
mod merge;
mod notify;
mod ops;
mod pattern;
mod resolve;
mod types;

pub use engine::CombineFs;
pub use error::{FsError, FsResult};
pub use handle::{HandleId, HandleTable, OpenHandle};
pub use mapping::{CaseSensitivity, Mapping, MappingError, MappingTable};
pub use merge::list_entries;
pub use notify::{
    ChangeNotifier, DriverNotify, Notification, NotifierHandle, NotifyError, translate,
};
pub use ops::{CreateReply, DriveOps, MountObserver, TracingObserver};
pub use pattern::matches;
pub use resolve::{
    first_candidate, is_path_prefix, resolve_dirs, resolve_file, synthetic_children,
};
pub use types::{
    AccessMask, CreateRequest, DiskSpace, FileAttributes, FileInfo, OpenMode, SecurityDescriptor,
    SetFileTimes, ShareMode, VolumeFeatures, VolumeInfo,
};
