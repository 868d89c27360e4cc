//! Driver-facing operations trait.
//!
//! One entry point per filesystem verb, each taking a virtual path plus
//! verb-specific parameters. Handle state is carried through opaque
//! [`HandleId`]s rather than a caller-owned context slot; the driver
//! stores the id and passes it back on every call against the same open
//! request.

use async_trait::async_trait;

use crate::error::FsResult;
use crate::handle::HandleId;
use crate::types::{
    CreateRequest, DiskSpace, FileAttributes, FileInfo, SecurityDescriptor, SetFileTimes,
    VolumeInfo,
};

/// Reply to a successful create/open.
#[derive(Debug, Clone, Copy)]
pub struct CreateReply {
    /// Handle to pass on subsequent operations and release at cleanup.
    pub handle: HandleId,
    /// The engine determined the target is a directory (the driver's
    /// flag may be corrected on open-existing).
    pub is_directory: bool,
    /// The target already existed and the mode was OpenOrCreate or
    /// Create: success with a caveat, not an error.
    pub already_exists: bool,
}

/// The full verb set of the virtual drive.
///
/// Implemented once by the engine; the external driver layer is the only
/// consumer. The driver may invoke operations concurrently from multiple
/// threads, including against the same handle.
#[async_trait]
pub trait DriveOps: Send + Sync {
    /// Create or open a file or directory.
    async fn create(&self, virtual_path: &str, request: CreateRequest) -> FsResult<CreateReply>;

    /// Read up to `size` bytes at `offset`. Serializes on the handle
    /// when one with an attached stream is supplied; otherwise a
    /// private short-lived stream is used.
    async fn read(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        offset: u64,
        size: u32,
    ) -> FsResult<Vec<u8>>;

    /// Write bytes at `offset`; `offset == -1` appends. `paging` marks
    /// paging I/O, which clamps the write to the current end of stream.
    /// Returns bytes written.
    async fn write(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        offset: i64,
        data: &[u8],
        paging: bool,
    ) -> FsResult<u32>;

    /// Flush the attached stream's buffers.
    async fn flush(&self, handle: HandleId) -> FsResult<()>;

    /// Enumerate a virtual directory, pattern-filtered.
    async fn find_files(&self, virtual_path: &str, search_pattern: &str) -> FsResult<Vec<FileInfo>>;

    /// Attributes, timestamps and length of the target; synthesized for
    /// purely virtual directories.
    async fn file_information(&self, virtual_path: &str, is_directory: bool) -> FsResult<FileInfo>;

    /// Apply attributes. A zero value changes nothing by contract.
    async fn set_attributes(
        &self,
        virtual_path: &str,
        is_directory: bool,
        attributes: FileAttributes,
    ) -> FsResult<()>;

    /// Set creation/access/write times; only supplied fields change.
    async fn set_times(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        is_directory: bool,
        times: SetFileTimes,
    ) -> FsResult<()>;

    /// Check that the file could be deleted. The actual unlink happens
    /// at [`DriveOps::cleanup`] when delete-on-close is set.
    async fn delete_file(&self, virtual_path: &str) -> FsResult<()>;

    /// Check that the directory could be deleted (must be empty in
    /// every contributing physical root).
    async fn delete_directory(&self, virtual_path: &str) -> FsResult<()>;

    /// Release the attached stream and, when `delete_on_close` is set,
    /// perform the real deletion.
    async fn cleanup(&self, handle: HandleId, delete_on_close: bool) -> FsResult<()>;

    /// Drop the handle entirely.
    async fn close(&self, handle: HandleId) -> FsResult<()>;

    /// Move or rename. Directory destinations are never replaced.
    async fn move_entry(
        &self,
        old_path: &str,
        new_path: &str,
        replace: bool,
        is_directory: bool,
        handle: Option<HandleId>,
    ) -> FsResult<()>;

    /// Set the attached stream's length.
    async fn set_end_of_file(&self, handle: HandleId, length: u64) -> FsResult<()>;

    /// Reserve space; same effect as [`DriveOps::set_end_of_file`].
    async fn set_allocation_size(&self, handle: HandleId, length: u64) -> FsResult<()>;

    /// Byte-range lock on the attached stream, delegated to the native
    /// filesystem.
    async fn lock(&self, handle: HandleId, offset: u64, length: u64) -> FsResult<()>;

    /// Release a byte-range lock.
    async fn unlock(&self, handle: HandleId, offset: u64, length: u64) -> FsResult<()>;

    /// Read the platform security descriptor of the resolved target.
    async fn get_security(
        &self,
        virtual_path: &str,
        is_directory: bool,
    ) -> FsResult<SecurityDescriptor>;

    /// Write the platform security descriptor; directories apply to
    /// every resolved candidate.
    async fn set_security(
        &self,
        virtual_path: &str,
        is_directory: bool,
        descriptor: SecurityDescriptor,
    ) -> FsResult<()>;

    /// Free/total/available bytes aggregated across the distinct
    /// physical volumes hosting mapping roots.
    async fn disk_free_space(&self) -> FsResult<DiskSpace>;

    /// Fixed, static volume description.
    fn volume_information(&self) -> VolumeInfo;

    /// Alternate stream enumeration is intentionally unsupported.
    async fn find_streams(&self, virtual_path: &str) -> FsResult<Vec<FileInfo>>;

    /// The drive was mounted at `mount_point`.
    fn mounted(&self, mount_point: &str);

    /// The drive was unmounted.
    fn unmounted(&self);
}

/// Observer for mount lifecycle side effects, injected rather than
/// written to a process-global sink.
pub trait MountObserver: Send + Sync {
    fn on_mounted(&self, mount_point: &str);
    fn on_unmounted(&self);
}

/// Default observer: structured log events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl MountObserver for TracingObserver {
    fn on_mounted(&self, mount_point: &str) {
        tracing::info!(mount_point = %mount_point, "virtual drive mounted");
    }

    fn on_unmounted(&self) {
        tracing::info!("virtual drive unmounted");
    }
}
