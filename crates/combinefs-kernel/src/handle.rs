//! Open-handle table.
//!
//! The driver holds an opaque [`HandleId`] per open request; the engine
//! owns the corresponding [`OpenHandle`] state and releases it
//! explicitly at cleanup/close. The per-handle stream mutex is the
//! engine's unit of mutual exclusion: concurrent reads/writes on one
//! handle serialize on it, distinct handles proceed independently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::sync::Mutex;

/// Opaque identifier the driver stores in its per-open-request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(u64);

/// Live state of one open-file session.
pub struct OpenHandle {
    virtual_path: String,
    /// The physical path the handle was opened against, when one
    /// resolved. Synthetic directory handles have none.
    physical_path: Option<std::path::PathBuf>,
    is_directory: bool,
    /// The attached native stream. `None` for directory handles and
    /// attribute-only opens. Locked for the duration of every
    /// seek+transfer against this handle.
    stream: Mutex<Option<File>>,
}

impl OpenHandle {
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn physical_path(&self) -> Option<&std::path::Path> {
        self.physical_path.as_deref()
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn stream(&self) -> &Mutex<Option<File>> {
        &self.stream
    }

    /// Drop the attached stream, if any, flushing it to the OS first.
    /// In-flight buffered writes must land before the path is reopened
    /// or unlinked.
    pub async fn release_stream(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut file) = guard.take() {
            use tokio::io::AsyncWriteExt;
            let _ = file.flush().await;
        }
    }
}

/// Table of live handles, keyed by opaque id.
pub struct HandleTable {
    next_id: AtomicU64,
    handles: DashMap<HandleId, Arc<OpenHandle>>,
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("open", &self.handles.len())
            .finish()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handles: DashMap::new(),
        }
    }

    /// Register a new handle and return its id.
    pub fn insert(
        &self,
        virtual_path: impl Into<String>,
        physical_path: Option<std::path::PathBuf>,
        is_directory: bool,
        stream: Option<File>,
    ) -> HandleId {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handles.insert(
            id,
            Arc::new(OpenHandle {
                virtual_path: virtual_path.into(),
                physical_path,
                is_directory,
                stream: Mutex::new(stream),
            }),
        );
        id
    }

    pub fn get(&self, id: HandleId) -> Option<Arc<OpenHandle>> {
        self.handles.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the handle from the table. The state is dropped once the
    /// last in-flight operation holding the Arc finishes.
    pub fn remove(&self, id: HandleId) -> Option<Arc<OpenHandle>> {
        self.handles.remove(&id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
