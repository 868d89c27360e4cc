//! Wildcard matching for directory enumeration.
//!
//! Implements the search-pattern semantics the driver hands to the
//! enumeration entry point:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//!
//! Matching is case-insensitive, as directory search patterns are on
//! the target platform.

use std::cell::Cell;

/// Maximum number of recursive calls for a single match. Protects
/// against adversarial patterns like `*a*a*a*...*a` that cause O(n^k)
/// backtracking. Counted as total work (calls), not stack depth.
const MAX_MATCH_CALLS: usize = 100_000;

/// Match a name against a wildcard pattern.
///
/// Returns true if the pattern matches the entire name. A pattern of
/// `*` matches every name.
pub fn matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pat: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let input: Vec<char> = name.chars().flat_map(char::to_lowercase).collect();
    let calls = Cell::new(0usize);
    match_bounded(&pat, 0, &input, 0, &calls)
}

fn match_bounded(pat: &[char], pi: usize, input: &[char], ii: usize, calls: &Cell<usize>) -> bool {
    let count = calls.get();
    if count >= MAX_MATCH_CALLS {
        return false;
    }
    calls.set(count + 1);

    if pi == pat.len() {
        return ii == input.len();
    }

    match pat[pi] {
        '*' => {
            // Zero characters, or one-and-retry.
            if match_bounded(pat, pi + 1, input, ii, calls) {
                return true;
            }
            ii < input.len() && match_bounded(pat, pi, input, ii + 1, calls)
        }
        '?' => ii < input.len() && match_bounded(pat, pi + 1, input, ii + 1, calls),
        c => ii < input.len() && input[ii] == c && match_bounded(pat, pi + 1, input, ii + 1, calls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star() {
        assert!(matches("*", "anything"));
        assert!(matches("*", ""));
        assert!(matches("*.txt", "notes.txt"));
        assert!(matches("foo*", "foobar"));
        assert!(!matches("*.txt", "notes.rs"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("file?.log", "file1.log"));
        assert!(!matches("file?.log", "file.log"));
        assert!(!matches("file?.log", "file12.log"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches("*.TXT", "Notes.txt"));
        assert!(matches("README*", "readme.md"));
    }

    #[test]
    fn test_exact() {
        assert!(matches("foo.txt", "foo.txt"));
        assert!(!matches("foo.txt", "foo.txt.bak"));
        assert!(!matches("foo.txt", "foo"));
    }

    #[test]
    fn test_adversarial_pattern_terminates() {
        let pattern = "*a".repeat(30);
        let input = "a".repeat(60);
        // Either answer is acceptable once the budget trips; it must return.
        let _ = matches(&pattern, &input);
    }
}
