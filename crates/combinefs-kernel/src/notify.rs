//! Change notification bridge.
//!
//! Watches every mapped physical root recursively and forwards change
//! events to the driver, translated into the virtual namespace. Events
//! arrive on the watcher's own thread and are handed to a tokio task
//! over a bounded channel; the task owns delivery and shutdown.
//!
//! Notification is strictly best effort. A torn-down driver
//! ([`NotifyError::DriverGone`]) is expected during unmount races and
//! is discarded without logging noise; other delivery failures are
//! logged and dropped.

use std::path::Path;
use std::sync::Arc;

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::mapping::MappingTable;

/// Errors from the notification bridge.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The driver instance no longer exists. Expected while unmounting.
    #[error("driver is gone")]
    DriverGone,

    /// The driver rejected the notification.
    #[error("notification delivery failed: {0}")]
    Delivery(String),

    /// The filesystem watcher could not be set up or maintained.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

/// A change in the virtual namespace, ready for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Created {
        virtual_path: String,
        is_directory: bool,
    },
    Removed {
        virtual_path: String,
        is_directory: bool,
    },
    Modified {
        virtual_path: String,
    },
    Renamed {
        old_virtual_path: String,
        new_virtual_path: String,
        is_directory: bool,
        /// Both paths share a parent directory; drivers refresh a single
        /// directory view instead of two.
        same_parent: bool,
    },
}

/// Driver-side sink for change notifications.
pub trait DriverNotify: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Translate one watcher event into driver notifications.
///
/// Physical paths that fall outside every mapping root produce nothing;
/// a root can contain entries reachable by other means than the virtual
/// drive, but only mapped content is announced.
pub fn translate(event: &Event, table: &MappingTable) -> Vec<Notification> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let Some(virtual_path) = table.virtual_path_of(path) else {
                    continue;
                };
                out.push(Notification::Created {
                    virtual_path,
                    is_directory: created_is_directory(*kind, path),
                });
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                let Some(virtual_path) = table.virtual_path_of(path) else {
                    continue;
                };
                out.push(Notification::Removed {
                    virtual_path,
                    is_directory: matches!(kind, RemoveKind::Folder),
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let old = table.virtual_path_of(&event.paths[0]);
            let new = table.virtual_path_of(&event.paths[1]);
            if let (Some(old_virtual_path), Some(new_virtual_path)) = (old, new) {
                let same_parent = parent_of(&old_virtual_path) == parent_of(&new_virtual_path);
                out.push(Notification::Renamed {
                    old_virtual_path,
                    new_virtual_path,
                    // The new path still exists; the old one is gone.
                    is_directory: event.paths[1].is_dir(),
                    same_parent,
                });
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                let Some(virtual_path) = table.virtual_path_of(path) else {
                    continue;
                };
                out.push(Notification::Modified { virtual_path });
            }
        }
        // Access events carry no state change worth announcing.
        _ => {}
    }
    out
}

fn parent_of(virtual_path: &str) -> &str {
    virtual_path
        .trim_end_matches(['/', '\\'])
        .rsplit_once(['/', '\\'])
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

fn created_is_directory(kind: CreateKind, path: &Path) -> bool {
    match kind {
        CreateKind::Folder => true,
        CreateKind::File => false,
        // Backend did not say; ask the filesystem while the entry is fresh.
        _ => path.is_dir(),
    }
}

/// Running notification bridge. Dropping it stops the forwarding task;
/// the watcher itself stops when the handle is dropped.
pub struct NotifierHandle {
    _watcher: RecommendedWatcher,
    shutdown: Option<oneshot::Sender<()>>,
}

impl NotifierHandle {
    /// Stop forwarding. Also happens implicitly on drop.
    pub fn shutdown(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for NotifierHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Filesystem change notifier for a mapping table.
pub struct ChangeNotifier;

impl ChangeNotifier {
    /// Watch every mapped physical root and forward translated events to
    /// `driver` until the returned handle is shut down or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        table: Arc<MappingTable>,
        driver: Arc<dyn DriverNotify>,
    ) -> Result<NotifierHandle, NotifyError> {
        let (tx, mut rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

        // The callback runs on the watcher thread; try_send keeps it
        // non-blocking and sheds load if the forwarder falls behind.
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.try_send(res);
        })?;
        for mapping in table.mappings() {
            watcher.watch(mapping.physical_root(), RecursiveMode::Recursive)?;
            tracing::debug!(root = %mapping.physical_root().display(), "watching");
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = rx.recv() => {
                        let Some(result) = received else { break };
                        match result {
                            Ok(event) => deliver(&event, &table, driver.as_ref()),
                            Err(e) => {
                                tracing::warn!(error = %e, "watch error");
                            }
                        }
                    }
                }
            }
            tracing::debug!("change notifier stopped");
        });

        Ok(NotifierHandle {
            _watcher: watcher,
            shutdown: Some(shutdown_tx),
        })
    }
}

fn deliver(event: &Event, table: &MappingTable, driver: &dyn DriverNotify) {
    for notification in translate(event, table) {
        match driver.notify(&notification) {
            Ok(()) => {}
            Err(NotifyError::DriverGone) => {
                // Unmount race; the event has nowhere to go.
                tracing::trace!(?notification, "driver gone, notification dropped");
            }
            Err(e) => {
                tracing::warn!(?notification, error = %e, "notification delivery failed");
            }
        }
    }
}
