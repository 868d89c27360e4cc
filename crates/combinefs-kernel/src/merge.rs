//! Directory merge engine.
//!
//! Produces the union of directory entries contributed by every physical
//! root mapped under a virtual path, plus synthetic subdirectories when
//! nothing physical contributes. Results are computed fresh per call and
//! never persisted.

use std::collections::HashSet;
use std::path::Path;

use tokio::fs;

use crate::error::FsResult;
use crate::mapping::MappingTable;
use crate::pattern;
use crate::resolve;
use crate::types::FileInfo;

/// List the entries of a virtual directory, filtered by a `*`/`?`
/// wildcard pattern.
///
/// When one or more physical directories resolve, their entries are
/// merged and deduplicated by full identity (name, attributes, all
/// timestamps, length). Two physically distinct entries sharing a name
/// across roots are both returned; directory browsers cannot represent
/// that unambiguously, which is a known limitation of the merge rather
/// than something to silently resolve here.
///
/// When nothing physical resolves, the synthetic subdirectories implied
/// by deeper mappings are returned as read-only directory entries.
///
/// Ordering is stable within a single call and otherwise unspecified.
pub async fn list_entries(
    table: &MappingTable,
    virtual_path: &str,
    search_pattern: &str,
) -> FsResult<Vec<FileInfo>> {
    let dirs = resolve::resolve_dirs(table, virtual_path);

    if dirs.is_empty() {
        return Ok(resolve::synthetic_children(table, virtual_path)
            .into_iter()
            .map(FileInfo::synthetic_directory)
            .collect());
    }

    let mut seen: HashSet<FileInfo> = HashSet::new();
    let mut entries = Vec::new();
    for dir in &dirs {
        collect_dir(dir, search_pattern, &mut seen, &mut entries).await?;
    }
    Ok(entries)
}

async fn collect_dir(
    dir: &Path,
    search_pattern: &str,
    seen: &mut HashSet<FileInfo>,
    entries: &mut Vec<FileInfo>,
) -> FsResult<()> {
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !pattern::matches(search_pattern, &name) {
            continue;
        }
        // Entries that vanish mid-enumeration are skipped, not fatal.
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let info = FileInfo::from_metadata(name, &meta);
        if seen.insert(info.clone()) {
            entries.push(info);
        }
    }
    Ok(())
}
