//! Operation dispatcher: the filesystem-operation state machine.
//!
//! Every driver verb is implemented here in terms of the path resolver
//! and the directory merge engine. Anticipated native failures are
//! mapped to the result taxonomy at this boundary; anything else
//! propagates through [`FsError::Io`] and fails the in-flight operation.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{FsError, FsResult};
use crate::handle::{HandleId, HandleTable};
use crate::mapping::MappingTable;
use crate::merge;
use crate::ops::{CreateReply, DriveOps, MountObserver, TracingObserver};
use crate::resolve;
use crate::types::{
    AccessMask, CreateRequest, DiskSpace, FileAttributes, FileInfo, OpenMode, SecurityDescriptor,
    SetFileTimes, VolumeInfo, apply_attributes, leaf_name,
};

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;

/// The union-mount engine. One instance serves one mounted drive.
pub struct CombineFs {
    table: Arc<MappingTable>,
    handles: HandleTable,
    observer: Arc<dyn MountObserver>,
}

impl CombineFs {
    pub fn new(table: Arc<MappingTable>) -> Self {
        Self::with_observer(table, Arc::new(TracingObserver))
    }

    pub fn with_observer(table: Arc<MappingTable>, observer: Arc<dyn MountObserver>) -> Self {
        Self {
            table,
            handles: HandleTable::new(),
            observer,
        }
    }

    pub fn mapping_table(&self) -> &Arc<MappingTable> {
        &self.table
    }

    /// Translate a physical path into the virtual namespace. The change
    /// notifier uses this before forwarding driver notifications.
    pub fn translate_physical(&self, physical: &Path) -> Option<String> {
        self.table.virtual_path_of(physical)
    }

    /// Physical targets for a virtual path, honoring the directory flag
    /// the driver supplied: directories resolve to every contributing
    /// root (first candidate as fallback), files to their single
    /// shadow-resolved path.
    fn resolve_targets(&self, virtual_path: &str, is_directory: bool) -> Vec<PathBuf> {
        if is_directory {
            let dirs = resolve::resolve_dirs(&self.table, virtual_path);
            if dirs.is_empty() {
                resolve::first_candidate(&self.table, virtual_path)
                    .into_iter()
                    .collect()
            } else {
                dirs
            }
        } else {
            resolve::resolve_file(&self.table, virtual_path)
                .into_iter()
                .collect()
        }
    }

    async fn create_directory(
        &self,
        virtual_path: &str,
        request: CreateRequest,
    ) -> FsResult<CreateReply> {
        let dirs = resolve::resolve_dirs(&self.table, virtual_path);

        match request.mode {
            OpenMode::Open => {
                if let Some(first) = dirs.first() {
                    // Permission probe: the directory must be enumerable.
                    let deny = |e: io::Error| match e.kind() {
                        io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
                        _ => FsError::Io(e),
                    };
                    let mut reader = fs::read_dir(first).await.map_err(deny)?;
                    reader.next_entry().await.map_err(deny)?;
                } else {
                    match resolve::first_candidate(&self.table, virtual_path) {
                        Some(candidate) => match fs::metadata(&candidate).await {
                            Ok(meta) if !meta.is_dir() => {
                                return Err(FsError::not_a_directory(virtual_path));
                            }
                            Ok(_) => {}
                            Err(_) => {
                                if resolve::synthetic_children(&self.table, virtual_path)
                                    .is_empty()
                                {
                                    return Err(FsError::path_not_found(virtual_path));
                                }
                            }
                        },
                        None => {
                            if resolve::synthetic_children(&self.table, virtual_path).is_empty() {
                                return Err(FsError::path_not_found(virtual_path));
                            }
                        }
                    }
                }
            }
            OpenMode::CreateNew => {
                if !dirs.is_empty() {
                    return Err(FsError::file_exists(virtual_path));
                }
                let candidate = resolve::first_candidate(&self.table, virtual_path)
                    .ok_or_else(|| FsError::path_not_found(virtual_path))?;
                if fs::metadata(&candidate).await.is_ok() {
                    // A file sits where the directory should go.
                    return Err(FsError::already_exists(virtual_path));
                }
                fs::create_dir_all(&candidate)
                    .await
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
                        _ => FsError::Io(e),
                    })?;
            }
            // Remaining modes carry no extra work on directory targets.
            _ => {}
        }

        let physical = resolve::resolve_dirs(&self.table, virtual_path)
            .into_iter()
            .next();
        let handle = self.handles.insert(virtual_path, physical, true, None);
        Ok(CreateReply {
            handle,
            is_directory: true,
            already_exists: false,
        })
    }

    async fn create_file(
        &self,
        virtual_path: &str,
        request: CreateRequest,
    ) -> FsResult<CreateReply> {
        let path = resolve::resolve_file(&self.table, virtual_path)
            .ok_or_else(|| FsError::path_not_found(virtual_path))?;

        // Best-effort probe; I/O errors count as "does not exist".
        let probe = fs::metadata(&path).await.ok();
        let path_exists = probe.is_some();
        let path_is_directory = probe.map(|m| m.is_dir()).unwrap_or(false);

        match request.mode {
            OpenMode::Open => {
                if !path_exists {
                    return Err(FsError::file_not_found(virtual_path));
                }
                if request.access.is_metadata_only() || path_is_directory {
                    if path_is_directory
                        && request.access.contains(AccessMask::DELETE)
                        && !request.access.contains(AccessMask::SYNCHRONIZE)
                    {
                        // Delete request aimed at a directory.
                        return Err(FsError::access_denied(virtual_path));
                    }
                    let handle = self.handles.insert(
                        virtual_path,
                        Some(path),
                        path_is_directory,
                        None,
                    );
                    return Ok(CreateReply {
                        handle,
                        is_directory: path_is_directory,
                        already_exists: false,
                    });
                }
            }
            OpenMode::CreateNew => {
                if path_exists {
                    return Err(FsError::file_exists(virtual_path));
                }
            }
            OpenMode::Truncate => {
                if !path_exists {
                    return Err(FsError::file_not_found(virtual_path));
                }
            }
            _ => {}
        }

        let mut options = OpenOptions::new();
        options.read(true);
        #[cfg(windows)]
        options.share_mode(request.share.0);
        // Write-capable unless the mask proves read-only; creation and
        // truncation need a writable descriptor regardless.
        match request.mode {
            OpenMode::Open => {
                if !request.access.is_read_only() {
                    options.write(true);
                }
            }
            OpenMode::OpenOrCreate => {
                if !(path_exists && request.access.is_read_only()) {
                    options.write(true).create(true);
                }
            }
            OpenMode::CreateNew => {
                options.write(true).create_new(true);
            }
            OpenMode::Create => {
                options.write(true).create(true).truncate(true);
            }
            OpenMode::Truncate => {
                options.write(true).truncate(true);
            }
        }

        let file = options
            .open(&path)
            .await
            .map_err(|e| open_error(virtual_path, e))?;

        let already_exists = path_exists
            && matches!(request.mode, OpenMode::OpenOrCreate | OpenMode::Create);
        let created = matches!(request.mode, OpenMode::CreateNew | OpenMode::Create)
            || (!path_exists && request.mode == OpenMode::OpenOrCreate);
        if created {
            // New files always carry the archive bit; the normal bit is
            // overridden by any other attribute.
            let attrs = (request.attributes | FileAttributes::ARCHIVE)
                .without(FileAttributes::NORMAL);
            if let Err(e) = apply_attributes(&path, attrs) {
                // Release the partially-opened stream before reporting.
                drop(file);
                return Err(match e.kind() {
                    io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
                    _ => FsError::Io(e),
                });
            }
        }

        tracing::debug!(
            path = %virtual_path,
            mode = ?request.mode,
            share = ?request.share,
            created,
            already_exists,
            "opened file"
        );

        let handle = self
            .handles
            .insert(virtual_path, Some(path), false, Some(file));
        Ok(CreateReply {
            handle,
            is_directory: false,
            already_exists,
        })
    }
}

/// Map an open failure: missing parents read as PathNotFound because the
/// existence state machine already ran before the open.
fn open_error(virtual_path: &str, e: io::Error) -> FsError {
    #[cfg(windows)]
    if e.raw_os_error() == Some(ERROR_SHARING_VIOLATION) {
        return FsError::sharing_violation(virtual_path);
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
        io::ErrorKind::NotFound => FsError::path_not_found(virtual_path),
        _ => FsError::Io(e),
    }
}

/// Map a metadata-style failure for attribute/time/security verbs.
fn metadata_error(virtual_path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
        io::ErrorKind::NotFound => FsError::file_not_found(virtual_path),
        io::ErrorKind::NotADirectory => FsError::path_not_found(virtual_path),
        _ => FsError::Io(e),
    }
}

fn move_error(virtual_path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => FsError::access_denied(virtual_path),
        _ => FsError::Io(e),
    }
}

/// Paging I/O bounds the transfer to the distance from `offset` to the
/// current end of stream, unless that distance exceeds the representable
/// 32-bit range, in which case no clamp applies.
async fn clamp_transfer(
    requested: usize,
    offset: i64,
    paging: bool,
    file: &File,
) -> FsResult<usize> {
    if !paging {
        return Ok(requested);
    }
    let length = file.metadata().await?.len() as i64;
    let distance = length - offset;
    if distance > i32::MAX as i64 {
        return Ok(requested);
    }
    Ok(requested.min(distance.max(0) as usize))
}

#[async_trait]
impl DriveOps for CombineFs {
    async fn create(&self, virtual_path: &str, request: CreateRequest) -> FsResult<CreateReply> {
        if request.is_directory {
            self.create_directory(virtual_path, request).await
        } else {
            self.create_file(virtual_path, request).await
        }
    }

    async fn read(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        offset: u64,
        size: u32,
    ) -> FsResult<Vec<u8>> {
        if let Some(id) = handle {
            if let Some(h) = self.handles.get(id) {
                let mut guard = h.stream().lock().await;
                if let Some(file) = guard.as_mut() {
                    file.seek(SeekFrom::Start(offset)).await?;
                    let mut buffer = vec![0u8; size as usize];
                    let read = file.read(&mut buffer).await?;
                    buffer.truncate(read);
                    return Ok(buffer);
                }
            }
        }

        // No attached stream (memory-mapped read): private short-lived one.
        let path = resolve::resolve_file(&self.table, virtual_path)
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; size as usize];
        let read = file.read(&mut buffer).await?;
        buffer.truncate(read);
        Ok(buffer)
    }

    async fn write(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        offset: i64,
        data: &[u8],
        paging: bool,
    ) -> FsResult<u32> {
        let append = offset == -1;

        if let Some(id) = handle {
            if let Some(h) = self.handles.get(id) {
                let mut guard = h.stream().lock().await;
                if let Some(file) = guard.as_mut() {
                    if append {
                        if file.seek(SeekFrom::End(0)).await.is_err() {
                            return Err(FsError::other("append target is not seekable"));
                        }
                    } else {
                        file.seek(SeekFrom::Start(offset as u64)).await?;
                    }
                    let count = clamp_transfer(data.len(), offset, paging, file).await?;
                    file.write_all(&data[..count]).await?;
                    return Ok(count as u32);
                }
            }
        }

        let path = resolve::resolve_file(&self.table, virtual_path)
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        let mut options = OpenOptions::new();
        if append {
            options.append(true);
        } else {
            options.write(true);
        }
        let mut file = options.open(&path).await?;
        if !append {
            file.seek(SeekFrom::Start(offset as u64)).await?;
        }
        let count = clamp_transfer(data.len(), offset, paging, &file).await?;
        file.write_all(&data[..count]).await?;
        // Short-lived stream: land the buffered write before dropping.
        file.flush().await?;
        Ok(count as u32)
    }

    async fn flush(&self, handle: HandleId) -> FsResult<()> {
        let h = self
            .handles
            .get(handle)
            .ok_or_else(|| FsError::other("no open handle"))?;
        let mut guard = h.stream().lock().await;
        if let Some(file) = guard.as_mut() {
            if file.flush().await.is_err() || file.sync_all().await.is_err() {
                return Err(FsError::disk_full(h.virtual_path()));
            }
        }
        Ok(())
    }

    async fn find_files(
        &self,
        virtual_path: &str,
        search_pattern: &str,
    ) -> FsResult<Vec<FileInfo>> {
        merge::list_entries(&self.table, virtual_path, search_pattern).await
    }

    async fn file_information(
        &self,
        virtual_path: &str,
        is_directory: bool,
    ) -> FsResult<FileInfo> {
        let targets = self.resolve_targets(virtual_path, is_directory);
        if let Some(first) = targets.first() {
            if let Ok(meta) = fs::metadata(first).await {
                return Ok(FileInfo::from_metadata(leaf_name(virtual_path), &meta));
            }
        }
        // Purely virtual directory, not backed by any physical drive.
        Ok(FileInfo::synthetic_directory(leaf_name(virtual_path)))
    }

    async fn set_attributes(
        &self,
        virtual_path: &str,
        is_directory: bool,
        attributes: FileAttributes,
    ) -> FsResult<()> {
        // A zero value means "do not change attributes" (MS-FSCC 2.6).
        if attributes.is_empty() {
            return Ok(());
        }
        let target = self
            .resolve_targets(virtual_path, is_directory)
            .into_iter()
            .next()
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        apply_attributes(&target, attributes).map_err(|e| metadata_error(virtual_path, e))
    }

    async fn set_times(
        &self,
        virtual_path: &str,
        handle: Option<HandleId>,
        is_directory: bool,
        times: SetFileTimes,
    ) -> FsResult<()> {
        if times.is_empty() {
            return Ok(());
        }

        let mut file_times = std::fs::FileTimes::new();
        if let Some(t) = times.last_access {
            file_times = file_times.set_accessed(t);
        }
        if let Some(t) = times.last_write {
            file_times = file_times.set_modified(t);
        }
        #[cfg(windows)]
        if let Some(t) = times.creation {
            use std::os::windows::fs::FileTimesExt;
            file_times = file_times.set_created(t);
        }

        if let Some(id) = handle {
            if let Some(h) = self.handles.get(id) {
                let guard = h.stream().lock().await;
                if let Some(file) = guard.as_ref() {
                    let std_file = file.try_clone().await?.into_std().await;
                    return std_file
                        .set_times(file_times)
                        .map_err(|e| metadata_error(virtual_path, e));
                }
            }
        }

        let target = self
            .resolve_targets(virtual_path, is_directory)
            .into_iter()
            .next()
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .await
            .map_err(|e| metadata_error(virtual_path, e))?;
        file.into_std()
            .await
            .set_times(file_times)
            .map_err(|e| metadata_error(virtual_path, e))
    }

    async fn delete_file(&self, virtual_path: &str) -> FsResult<()> {
        // Existence/permission check only; the unlink happens at cleanup.
        // A directory at the target under any mapping blocks file deletion.
        if !resolve::resolve_dirs(&self.table, virtual_path).is_empty() {
            return Err(FsError::access_denied(virtual_path));
        }
        let path = resolve::resolve_file(&self.table, virtual_path)
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Err(FsError::access_denied(virtual_path)),
            Ok(_) => Ok(()),
            Err(_) => Err(FsError::file_not_found(virtual_path)),
        }
    }

    async fn delete_directory(&self, virtual_path: &str) -> FsResult<()> {
        // A directory with entries in any contributing root cannot go.
        for dir in resolve::resolve_dirs(&self.table, virtual_path) {
            let mut reader = fs::read_dir(&dir).await?;
            if reader.next_entry().await?.is_some() {
                return Err(FsError::directory_not_empty(virtual_path));
            }
        }
        Ok(())
    }

    async fn cleanup(&self, handle: HandleId, delete_on_close: bool) -> FsResult<()> {
        let Some(h) = self.handles.get(handle) else {
            return Ok(());
        };
        h.release_stream().await;

        if delete_on_close {
            if h.is_directory() {
                for dir in resolve::resolve_dirs(&self.table, h.virtual_path()) {
                    fs::remove_dir(&dir).await?;
                }
            } else if let Some(path) = resolve::resolve_file(&self.table, h.virtual_path()) {
                // Already gone counts as deleted.
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(FsError::Io(e)),
                }
            }
            tracing::debug!(path = %h.virtual_path(), "deleted on close");
        }
        Ok(())
    }

    async fn close(&self, handle: HandleId) -> FsResult<()> {
        self.handles.remove(handle);
        Ok(())
    }

    async fn move_entry(
        &self,
        old_path: &str,
        new_path: &str,
        replace: bool,
        is_directory: bool,
        handle: Option<HandleId>,
    ) -> FsResult<()> {
        // The attached stream must go before the rename.
        if let Some(id) = handle {
            if let Some(h) = self.handles.get(id) {
                h.release_stream().await;
            }
        }

        if is_directory {
            let sources = resolve::resolve_dirs(&self.table, old_path);
            let dest_dirs = resolve::resolve_dirs(&self.table, new_path);
            let exists = !dest_dirs.is_empty();
            let dest = dest_dirs
                .into_iter()
                .next()
                .or_else(|| resolve::first_candidate(&self.table, new_path))
                .ok_or_else(|| FsError::path_not_found(new_path))?;

            if !exists {
                for source in sources {
                    fs::rename(&source, &dest)
                        .await
                        .map_err(|e| move_error(old_path, e))?;
                }
                return Ok(());
            }
            if replace {
                // Directories cannot be replace-moved (MOVEFILE_REPLACE_EXISTING).
                return Err(FsError::access_denied(new_path));
            }
            Err(FsError::file_exists(new_path))
        } else {
            let source = resolve::resolve_file(&self.table, old_path)
                .ok_or_else(|| FsError::file_not_found(old_path))?;
            let dest = resolve::resolve_file(&self.table, new_path)
                .ok_or_else(|| FsError::path_not_found(new_path))?;

            if !dest.is_file() {
                fs::rename(&source, &dest)
                    .await
                    .map_err(|e| move_error(old_path, e))?;
                return Ok(());
            }
            if replace {
                fs::remove_file(&dest)
                    .await
                    .map_err(|e| move_error(new_path, e))?;
                fs::rename(&source, &dest)
                    .await
                    .map_err(|e| move_error(old_path, e))?;
                return Ok(());
            }
            Err(FsError::file_exists(new_path))
        }
    }

    async fn set_end_of_file(&self, handle: HandleId, length: u64) -> FsResult<()> {
        let h = self
            .handles
            .get(handle)
            .ok_or_else(|| FsError::other("no open handle"))?;
        let guard = h.stream().lock().await;
        let file = guard
            .as_ref()
            .ok_or_else(|| FsError::other("no attached stream"))?;
        file.set_len(length)
            .await
            .map_err(|_| FsError::disk_full(h.virtual_path()))
    }

    async fn set_allocation_size(&self, handle: HandleId, length: u64) -> FsResult<()> {
        self.set_end_of_file(handle, length).await
    }

    async fn lock(&self, handle: HandleId, offset: u64, length: u64) -> FsResult<()> {
        #[cfg(unix)]
        {
            use rustix::fs::{FlockOperation, flock};

            let h = self
                .handles
                .get(handle)
                .ok_or_else(|| FsError::other("no open handle"))?;
            let guard = h.stream().lock().await;
            let file = guard
                .as_ref()
                .ok_or_else(|| FsError::other("no attached stream"))?;
            // Advisory whole-file lock; the requested byte range is
            // collapsed to the file on this platform.
            let std_file = file.try_clone().await?.into_std().await;
            flock(&std_file, FlockOperation::NonBlockingLockExclusive)
                .map_err(|_| FsError::access_denied(h.virtual_path()))?;
            tracing::trace!(offset, length, path = %h.virtual_path(), "locked");
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = (handle, offset, length);
            Err(FsError::not_implemented("byte-range locks"))
        }
    }

    async fn unlock(&self, handle: HandleId, offset: u64, length: u64) -> FsResult<()> {
        #[cfg(unix)]
        {
            use rustix::fs::{FlockOperation, flock};

            let h = self
                .handles
                .get(handle)
                .ok_or_else(|| FsError::other("no open handle"))?;
            let guard = h.stream().lock().await;
            let file = guard
                .as_ref()
                .ok_or_else(|| FsError::other("no attached stream"))?;
            let std_file = file.try_clone().await?.into_std().await;
            flock(&std_file, FlockOperation::Unlock)
                .map_err(|_| FsError::access_denied(h.virtual_path()))?;
            tracing::trace!(offset, length, path = %h.virtual_path(), "unlocked");
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = (handle, offset, length);
            Err(FsError::not_implemented("byte-range locks"))
        }
    }

    async fn get_security(
        &self,
        virtual_path: &str,
        is_directory: bool,
    ) -> FsResult<SecurityDescriptor> {
        let target = self
            .resolve_targets(virtual_path, is_directory)
            .into_iter()
            .next()
            .ok_or_else(|| FsError::file_not_found(virtual_path))?;
        let meta = fs::metadata(&target)
            .await
            .map_err(|e| metadata_error(virtual_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            Ok(SecurityDescriptor {
                mode: meta.permissions().mode(),
                uid: Some(meta.uid()),
                gid: Some(meta.gid()),
            })
        }
        #[cfg(not(unix))]
        {
            Ok(SecurityDescriptor {
                mode: if meta.permissions().readonly() { 0o444 } else { 0o644 },
                uid: None,
                gid: None,
            })
        }
    }

    async fn set_security(
        &self,
        virtual_path: &str,
        is_directory: bool,
        descriptor: SecurityDescriptor,
    ) -> FsResult<()> {
        let targets = self.resolve_targets(virtual_path, is_directory);
        if targets.is_empty() {
            return Err(FsError::file_not_found(virtual_path));
        }
        for target in targets {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, std::fs::Permissions::from_mode(descriptor.mode))
                    .await
                    .map_err(|e| metadata_error(virtual_path, e))?;
            }
            #[cfg(not(unix))]
            {
                let mut perm = fs::metadata(&target)
                    .await
                    .map_err(|e| metadata_error(virtual_path, e))?
                    .permissions();
                perm.set_readonly(descriptor.mode & 0o200 == 0);
                fs::set_permissions(&target, perm)
                    .await
                    .map_err(|e| metadata_error(virtual_path, e))?;
            }
        }
        // Ownership changes would need chown; the platform delegation
        // stops at permission bits here, matching the descriptor shape.
        Ok(())
    }

    async fn disk_free_space(&self) -> FsResult<DiskSpace> {
        #[cfg(unix)]
        {
            use std::collections::HashSet;
            use std::os::unix::fs::MetadataExt;

            let mut seen: HashSet<u64> = HashSet::new();
            let mut space = DiskSpace::default();
            for mapping in self.table.mappings() {
                let meta = fs::metadata(mapping.physical_root()).await?;
                if !seen.insert(meta.dev()) {
                    continue;
                }
                let stat = rustix::fs::statvfs(mapping.physical_root())
                    .map_err(|e| FsError::Io(e.into()))?;
                let frsize = stat.f_frsize;
                space.free_bytes_available += stat.f_bfree * frsize;
                space.total_bytes += stat.f_blocks * frsize;
                space.total_free_bytes += stat.f_bavail * frsize;
            }
            Ok(space)
        }
        #[cfg(not(unix))]
        {
            Ok(DiskSpace::default())
        }
    }

    fn volume_information(&self) -> VolumeInfo {
        VolumeInfo::default()
    }

    async fn find_streams(&self, virtual_path: &str) -> FsResult<Vec<FileInfo>> {
        let _ = virtual_path;
        Err(FsError::not_implemented("alternate data streams"))
    }

    fn mounted(&self, mount_point: &str) {
        self.observer.on_mounted(mount_point);
    }

    fn unmounted(&self) {
        self.observer.on_unmounted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CaseSensitivity, Mapping};
    use crate::types::ShareMode;
    use tempfile::TempDir;

    fn engine(pairs: Vec<(&Path, &str)>) -> CombineFs {
        let mappings = pairs
            .into_iter()
            .map(|(p, v)| Mapping::new(p, v))
            .collect();
        let table = MappingTable::new(mappings, CaseSensitivity::Sensitive).unwrap();
        CombineFs::new(Arc::new(table))
    }

    fn rw_request(mode: OpenMode) -> CreateRequest {
        CreateRequest {
            access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            share: ShareMode::READ,
            mode,
            attributes: FileAttributes::NONE,
            is_directory: false,
        }
    }

    fn dir_request(mode: OpenMode) -> CreateRequest {
        CreateRequest {
            access: AccessMask::GENERIC_READ,
            share: ShareMode::READ,
            mode,
            attributes: FileAttributes::NONE,
            is_directory: true,
        }
    }

    #[tokio::test]
    async fn test_round_trip_create_write_read() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let reply = fs
            .create("/v/note.txt", rw_request(OpenMode::CreateNew))
            .await
            .unwrap();
        assert!(!reply.already_exists);

        let written = fs
            .write("/v/note.txt", Some(reply.handle), 0, b"hello", false)
            .await
            .unwrap();
        assert_eq!(written, 5);

        fs.cleanup(reply.handle, false).await.unwrap();
        fs.close(reply.handle).await.unwrap();

        let reply = fs
            .create("/v/note.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();
        let data = fs
            .read("/v/note.txt", Some(reply.handle), 0, 5)
            .await
            .unwrap();
        assert_eq!(data, b"hello");
        fs.close(reply.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_sentinel() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("log.txt"), "abc").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let written = fs
            .write("/v/log.txt", None, -1, b"def", false)
            .await
            .unwrap();
        assert_eq!(written, 3);

        let data = fs.read("/v/log.txt", None, 0, 16).await.unwrap();
        assert_eq!(data, b"abcdef");
    }

    #[tokio::test]
    async fn test_open_missing_file_not_found() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.create("/v/missing.txt", rw_request(OpenMode::Open)).await;
        assert!(matches!(result, Err(FsError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_new_existing_file_exists() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.create("/v/a.txt", rw_request(OpenMode::CreateNew)).await;
        assert!(matches!(result, Err(FsError::FileExists(_))));
    }

    #[tokio::test]
    async fn test_truncate_missing_file_not_found() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.create("/v/a.txt", rw_request(OpenMode::Truncate)).await;
        assert!(matches!(result, Err(FsError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_open_or_create_reports_already_exists() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let reply = fs
            .create("/v/a.txt", rw_request(OpenMode::OpenOrCreate))
            .await
            .unwrap();
        assert!(reply.already_exists);
        fs.close(reply.handle).await.unwrap();

        let reply = fs
            .create("/v/b.txt", rw_request(OpenMode::OpenOrCreate))
            .await
            .unwrap();
        assert!(!reply.already_exists);
        fs.close(reply.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_open_or_create_on_write_protected_file() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("guarded.txt");
        std::fs::write(&target, "kept").unwrap();
        let mut perm = std::fs::metadata(&target).unwrap().permissions();
        perm.set_readonly(true);
        std::fs::set_permissions(&target, perm).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        // A read-only mask must open the existing file read-only, not
        // demand a writable descriptor.
        let request = CreateRequest {
            access: AccessMask::GENERIC_READ,
            share: ShareMode::READ,
            mode: OpenMode::OpenOrCreate,
            attributes: FileAttributes::NONE,
            is_directory: false,
        };
        let reply = fs.create("/v/guarded.txt", request).await.unwrap();
        assert!(reply.already_exists);

        let data = fs
            .read("/v/guarded.txt", Some(reply.handle), 0, 4)
            .await
            .unwrap();
        assert_eq!(data, b"kept");
        fs.close(reply.handle).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"kept");
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn test_share_none_blocks_second_open() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("solo.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let request = CreateRequest {
            access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            share: ShareMode::NONE,
            mode: OpenMode::Open,
            attributes: FileAttributes::NONE,
            is_directory: false,
        };
        let first = fs.create("/v/solo.txt", request).await.unwrap();

        let result = fs.create("/v/solo.txt", request).await;
        assert!(matches!(result, Err(FsError::SharingViolation(_))));
        fs.close(first.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_only_open_has_no_stream() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "body").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let request = CreateRequest {
            access: AccessMask::SYNCHRONIZE,
            share: ShareMode::READ,
            mode: OpenMode::Open,
            attributes: FileAttributes::NONE,
            is_directory: false,
        };
        let reply = fs.create("/v/a.txt", request).await.unwrap();

        // Reads still work: the engine falls back to a private stream.
        let data = fs.read("/v/a.txt", Some(reply.handle), 0, 4).await.unwrap();
        assert_eq!(data, b"body");
        fs.close(reply.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_request_on_directory_without_synchronize() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let request = CreateRequest {
            access: AccessMask::DELETE,
            share: ShareMode::NONE,
            mode: OpenMode::Open,
            attributes: FileAttributes::NONE,
            is_directory: false,
        };
        let result = fs.create("/v/sub", request).await;
        assert!(matches!(result, Err(FsError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_directory_open_and_create() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.create("/v/newdir", dir_request(OpenMode::Open)).await;
        assert!(matches!(result, Err(FsError::PathNotFound(_))));

        let reply = fs
            .create("/v/newdir", dir_request(OpenMode::CreateNew))
            .await
            .unwrap();
        assert!(reply.is_directory);
        assert!(root.path().join("newdir").is_dir());

        let result = fs.create("/v/newdir", dir_request(OpenMode::CreateNew)).await;
        assert!(matches!(result, Err(FsError::FileExists(_))));

        fs.create("/v/newdir", dir_request(OpenMode::Open))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_synthetic_directory_opens() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/p/q/r")]);

        // Nothing physical backs /p, but the deeper mapping implies it.
        let reply = fs.create("/p", dir_request(OpenMode::Open)).await.unwrap();
        assert!(reply.is_directory);

        let info = fs.file_information("/p", true).await.unwrap();
        assert!(info.is_directory());
        assert!(info.attributes.contains(FileAttributes::READ_ONLY));
        assert_eq!(info.length, 0);
    }

    #[tokio::test]
    async fn test_move_without_replace_fails_and_leaves_files() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("old.txt"), "old").unwrap();
        std::fs::write(root.path().join("new.txt"), "new").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs
            .move_entry("/v/old.txt", "/v/new.txt", false, false, None)
            .await;
        assert!(matches!(result, Err(FsError::FileExists(_))));
        assert_eq!(std::fs::read(root.path().join("old.txt")).unwrap(), b"old");
        assert_eq!(std::fs::read(root.path().join("new.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_move_with_replace_overwrites() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("old.txt"), "old").unwrap();
        std::fs::write(root.path().join("new.txt"), "new").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        fs.move_entry("/v/old.txt", "/v/new.txt", true, false, None)
            .await
            .unwrap();
        assert!(!root.path().join("old.txt").exists());
        assert_eq!(std::fs::read(root.path().join("new.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_move_directory_replace_rejected() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("src")).unwrap();
        std::fs::create_dir(root.path().join("dst")).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs
            .move_entry("/v/src", "/v/dst", true, true, None)
            .await;
        assert!(matches!(result, Err(FsError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_move_file_plain() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("old.txt"), "data").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        fs.move_entry("/v/old.txt", "/v/renamed.txt", false, false, None)
            .await
            .unwrap();
        assert!(!root.path().join("old.txt").exists());
        assert_eq!(
            std::fs::read(root.path().join("renamed.txt")).unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn test_delete_directory_not_empty() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("full")).unwrap();
        std::fs::write(root.path().join("full/entry.txt"), "x").unwrap();
        std::fs::create_dir(root.path().join("empty")).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.delete_directory("/v/full").await;
        assert!(matches!(result, Err(FsError::DirectoryNotEmpty(_))));

        fs.delete_directory("/v/empty").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_file_checks_and_delete_on_close() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("doomed.txt"), "x").unwrap();
        std::fs::create_dir(root.path().join("adir")).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        assert!(matches!(
            fs.delete_file("/v/adir").await,
            Err(FsError::AccessDenied(_))
        ));
        assert!(matches!(
            fs.delete_file("/v/ghost.txt").await,
            Err(FsError::FileNotFound(_))
        ));

        let reply = fs
            .create("/v/doomed.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();
        fs.delete_file("/v/doomed.txt").await.unwrap();
        assert!(root.path().join("doomed.txt").exists());

        fs.cleanup(reply.handle, true).await.unwrap();
        fs.close(reply.handle).await.unwrap();
        assert!(!root.path().join("doomed.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_on_close_tolerates_vanished_file() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("fleeting.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let reply = fs
            .create("/v/fleeting.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();
        fs.delete_file("/v/fleeting.txt").await.unwrap();

        // Removed behind the engine's back before the handle is released.
        std::fs::remove_file(root.path().join("fleeting.txt")).unwrap();

        fs.cleanup(reply.handle, true).await.unwrap();
        fs.close(reply.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_on_close_directory_removes_every_candidate() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::create_dir(a.path().join("gone")).unwrap();
        std::fs::create_dir(b.path().join("gone")).unwrap();
        let fs = engine(vec![(a.path(), "/v"), (b.path(), "/v")]);

        let reply = fs
            .create("/v/gone", dir_request(OpenMode::Open))
            .await
            .unwrap();
        fs.cleanup(reply.handle, true).await.unwrap();
        fs.close(reply.handle).await.unwrap();

        assert!(!a.path().join("gone").exists());
        assert!(!b.path().join("gone").exists());
    }

    #[tokio::test]
    async fn test_set_attributes_zero_is_noop() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        fs.set_attributes("/v/a.txt", false, FileAttributes::READ_ONLY)
            .await
            .unwrap();
        assert!(
            std::fs::metadata(root.path().join("a.txt"))
                .unwrap()
                .permissions()
                .readonly()
        );

        // Zero must not touch anything.
        fs.set_attributes("/v/a.txt", false, FileAttributes::NONE)
            .await
            .unwrap();
        assert!(
            std::fs::metadata(root.path().join("a.txt"))
                .unwrap()
                .permissions()
                .readonly()
        );

        fs.set_attributes("/v/a.txt", false, FileAttributes::ARCHIVE)
            .await
            .unwrap();
        assert!(
            !std::fs::metadata(root.path().join("a.txt"))
                .unwrap()
                .permissions()
                .readonly()
        );
    }

    #[tokio::test]
    async fn test_set_times_modified() {
        use std::time::{Duration, SystemTime};

        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        fs.set_times(
            "/v/a.txt",
            None,
            false,
            SetFileTimes {
                last_write: Some(stamp),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let modified = std::fs::metadata(root.path().join("a.txt"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(modified, stamp);
    }

    #[tokio::test]
    async fn test_paging_write_clamped_to_end_of_stream() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("paged.bin"), vec![0u8; 10]).unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let written = fs
            .write("/v/paged.bin", None, 5, &[1u8; 10], true)
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(
            std::fs::metadata(root.path().join("paged.bin")).unwrap().len(),
            10
        );
    }

    #[tokio::test]
    async fn test_set_end_of_file() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "0123456789").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let reply = fs
            .create("/v/a.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();
        fs.set_end_of_file(reply.handle, 4).await.unwrap();
        fs.set_allocation_size(reply.handle, 4).await.unwrap();
        fs.flush(reply.handle).await.unwrap();
        fs.close(reply.handle).await.unwrap();

        assert_eq!(std::fs::read(root.path().join("a.txt")).unwrap(), b"0123");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lock_unlock() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let reply = fs
            .create("/v/a.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();
        fs.lock(reply.handle, 0, 1).await.unwrap();
        fs.unlock(reply.handle, 0, 1).await.unwrap();
        fs.close(reply.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_security_round_trip() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "x").unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let descriptor = fs.get_security("/v/a.txt", false).await.unwrap();
        fs.set_security("/v/a.txt", false, descriptor).await.unwrap();

        let result = fs.get_security("/v/ghost.txt", false).await;
        assert!(matches!(result, Err(FsError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_disk_free_space_nonzero() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let space = fs.disk_free_space().await.unwrap();
        #[cfg(unix)]
        assert!(space.total_bytes > 0);
        let _ = space;
    }

    #[tokio::test]
    async fn test_volume_information_static() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let info = fs.volume_information();
        assert_eq!(info.label, "Virtual Drive");
        assert_eq!(info.filesystem_name, "NTFS");
        assert_eq!(info.max_component_length, 256);
    }

    #[tokio::test]
    async fn test_find_streams_not_implemented() {
        let root = TempDir::new().unwrap();
        let fs = engine(vec![(root.path(), "/v")]);

        let result = fs.find_streams("/v/a.txt").await;
        assert!(matches!(result, Err(FsError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn test_file_precedence_through_engine() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("shared.txt"), "first").unwrap();
        std::fs::write(b.path().join("shared.txt"), "second").unwrap();
        let fs = engine(vec![(a.path(), "/v"), (b.path(), "/v")]);

        let data = fs.read("/v/shared.txt", None, 0, 16).await.unwrap();
        assert_eq!(data, b"first");
    }

    #[tokio::test]
    async fn test_concurrent_reads_on_one_handle_serialize() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("big.txt"), "0123456789").unwrap();
        let fs = Arc::new(engine(vec![(root.path(), "/v")]));

        let reply = fs
            .create("/v/big.txt", rw_request(OpenMode::Open))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for offset in 0..5u64 {
            let fs = Arc::clone(&fs);
            let handle = reply.handle;
            tasks.push(tokio::spawn(async move {
                fs.read("/v/big.txt", Some(handle), offset * 2, 2)
                    .await
                    .unwrap()
            }));
        }
        let mut chunks = Vec::new();
        for task in tasks {
            chunks.push(task.await.unwrap());
        }
        // Every slice arrives intact despite interleaved seeks.
        let mut all: Vec<u8> = chunks.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, b"0123456789");
        fs.close(reply.handle).await.unwrap();
    }
}
