//! Path resolver: pure functions translating virtual paths into
//! physical candidates.
//!
//! Resolution never caches; every answer reflects the live state of the
//! underlying filesystems at call time.

use std::path::PathBuf;

use crate::mapping::{Mapping, MappingTable};

/// Split a virtual path into non-empty segments. Both separators are
/// accepted; empty segments (doubled or trailing separators) are
/// discarded.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

/// Segment-wise prefix test: true iff every segment of `prefix` matches
/// the corresponding leading segment of `path`. Partial segment matches
/// never count (`/ab` is not a prefix of `/abc/d`).
pub fn is_path_prefix(prefix: &str, path: &str, table: &MappingTable) -> bool {
    let case = table.case_sensitivity();
    let mut path_segs = segments(path);
    for pre in segments(prefix) {
        match path_segs.next() {
            Some(seg) if case.eq(pre, seg) => {}
            _ => return false,
        }
    }
    true
}

/// Compute the physical candidate for `virtual_path` under one mapping:
/// strip the mapping's virtual root and append the remainder to its
/// physical root. Callers must have checked the prefix relation.
fn candidate(mapping: &Mapping, virtual_path: &str) -> PathBuf {
    let skip = segments(mapping.virtual_root()).count();
    let mut path = mapping.physical_root().to_path_buf();
    for seg in segments(virtual_path).skip(skip) {
        path.push(seg);
    }
    path
}

/// Mappings applicable to a virtual path, in declaration order.
fn applicable<'a>(
    table: &'a MappingTable,
    virtual_path: &'a str,
) -> impl Iterator<Item = &'a Mapping> {
    table
        .mappings()
        .iter()
        .filter(move |m| is_path_prefix(m.virtual_root(), virtual_path, table))
}

/// Resolve a virtual path as a file.
///
/// The first mapping in declaration order whose candidate exists as a
/// file wins: earlier mappings shadow later ones. When nothing exists
/// physically, the first candidate is returned for create-new
/// semantics. `None` when no mapping applies at all.
pub fn resolve_file(table: &MappingTable, virtual_path: &str) -> Option<PathBuf> {
    let mut first = None;
    for mapping in applicable(table, virtual_path) {
        let path = candidate(mapping, virtual_path);
        if path.is_file() {
            return Some(path);
        }
        if first.is_none() {
            first = Some(path);
        }
    }
    first
}

/// Resolve a virtual path as a directory: every candidate that exists
/// as a physical directory, in declaration order. The same virtual
/// directory can draw content from several physical roots. Empty when
/// none exist; callers then consult [`synthetic_children`].
pub fn resolve_dirs(table: &MappingTable, virtual_path: &str) -> Vec<PathBuf> {
    applicable(table, virtual_path)
        .map(|m| candidate(m, virtual_path))
        .filter(|p| p.is_dir())
        .collect()
}

/// First applicable mapping's computed physical path, regardless of
/// existence. Used for create-directory targets and move destinations.
pub fn first_candidate(table: &MappingTable, virtual_path: &str) -> Option<PathBuf> {
    applicable(table, virtual_path)
        .next()
        .map(|m| candidate(m, virtual_path))
}

/// Names of virtual subdirectories implied by deeper mappings: for every
/// mapping whose virtual root is strictly deeper than `virtual_path`,
/// the next segment immediately below it, deduplicated.
pub fn synthetic_children(table: &MappingTable, virtual_path: &str) -> Vec<String> {
    let depth = segments(virtual_path).count();
    let mut names: Vec<String> = Vec::new();
    for mapping in table.mappings() {
        let root = mapping.virtual_root();
        if segments(root).count() > depth && is_path_prefix(virtual_path, root, table) {
            if let Some(next) = segments(root).nth(depth) {
                if !names.iter().any(|n| n == next) {
                    names.push(next.to_string());
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CaseSensitivity;
    use tempfile::TempDir;

    fn table(pairs: Vec<(&std::path::Path, &str)>, case: CaseSensitivity) -> MappingTable {
        let mappings = pairs
            .into_iter()
            .map(|(p, v)| Mapping::new(p, v))
            .collect();
        MappingTable::new(mappings, case).unwrap()
    }

    #[test]
    fn test_prefix_is_segment_wise() {
        let dir = TempDir::new().unwrap();
        let t = table(vec![(dir.path(), "/")], CaseSensitivity::Sensitive);

        assert!(is_path_prefix("/a/b", "/a/b/c", &t));
        assert!(is_path_prefix("/a/b", "/a/b", &t));
        assert!(is_path_prefix("/", "/anything", &t));
        assert!(!is_path_prefix("/a/b", "/a", &t));
        assert!(!is_path_prefix("/ab", "/abc/d", &t));
        assert!(is_path_prefix("\\a\\b", "/a/b/c", &t));
    }

    #[test]
    fn test_prefix_case_sensitivity() {
        let dir = TempDir::new().unwrap();
        let sensitive = table(vec![(dir.path(), "/")], CaseSensitivity::Sensitive);
        let insensitive = table(vec![(dir.path(), "/")], CaseSensitivity::Insensitive);

        assert!(!is_path_prefix("/Docs", "/docs/a", &sensitive));
        assert!(is_path_prefix("/Docs", "/docs/a", &insensitive));
    }

    #[test]
    fn test_file_precedence_first_mapping_wins() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("shared.txt"), "from a").unwrap();
        std::fs::write(b.path().join("shared.txt"), "from b").unwrap();

        let t = table(
            vec![(a.path(), "/v"), (b.path(), "/v")],
            CaseSensitivity::Sensitive,
        );

        let resolved = resolve_file(&t, "/v/shared.txt").unwrap();
        assert!(resolved.starts_with(dunce::canonicalize(a.path()).unwrap()));
    }

    #[test]
    fn test_file_shadow_falls_through_to_later_mapping() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(b.path().join("only-b.txt"), "b").unwrap();

        let t = table(
            vec![(a.path(), "/v"), (b.path(), "/v")],
            CaseSensitivity::Sensitive,
        );

        let resolved = resolve_file(&t, "/v/only-b.txt").unwrap();
        assert!(resolved.starts_with(dunce::canonicalize(b.path()).unwrap()));
    }

    #[test]
    fn test_file_fallback_for_create() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let t = table(
            vec![(a.path(), "/v"), (b.path(), "/v")],
            CaseSensitivity::Sensitive,
        );

        // Nothing exists: first mapping's candidate is the create target.
        let resolved = resolve_file(&t, "/v/new.txt").unwrap();
        assert!(resolved.starts_with(dunce::canonicalize(a.path()).unwrap()));

        // No mapping applies at all.
        assert!(resolve_file(&t, "/elsewhere/x.txt").is_none());
    }

    #[test]
    fn test_dir_union_resolution() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let t = table(
            vec![(a.path(), "/v"), (b.path(), "/v")],
            CaseSensitivity::Sensitive,
        );

        let dirs = resolve_dirs(&t, "/v");
        assert_eq!(dirs.len(), 2);

        assert!(resolve_dirs(&t, "/v/missing").is_empty());
    }

    #[test]
    fn test_synthetic_children() {
        let x = TempDir::new().unwrap();
        let t = table(vec![(x.path(), "/p/q/r")], CaseSensitivity::Sensitive);

        assert_eq!(synthetic_children(&t, "/p"), vec!["q"]);
        assert_eq!(synthetic_children(&t, "/p/q"), vec!["r"]);
        assert!(synthetic_children(&t, "/p/q/r").is_empty());
        assert_eq!(synthetic_children(&t, "/"), vec!["p"]);
        assert!(synthetic_children(&t, "/other").is_empty());
    }

    #[test]
    fn test_synthetic_children_dedup() {
        let x = TempDir::new().unwrap();
        let y = TempDir::new().unwrap();
        let t = table(
            vec![(x.path(), "/p/q/r"), (y.path(), "/p/q/s")],
            CaseSensitivity::Sensitive,
        );

        assert_eq!(synthetic_children(&t, "/p"), vec!["q"]);
        let mut below = synthetic_children(&t, "/p/q");
        below.sort();
        assert_eq!(below, vec!["r", "s"]);
    }

    #[test]
    fn test_first_candidate_ignores_existence() {
        let a = TempDir::new().unwrap();
        let t = table(vec![(a.path(), "/v")], CaseSensitivity::Sensitive);

        let cand = first_candidate(&t, "/v/not/yet/here").unwrap();
        assert!(cand.starts_with(dunce::canonicalize(a.path()).unwrap()));
        assert!(first_candidate(&t, "/w").is_none());
    }
}
