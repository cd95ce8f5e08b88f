// crates/core/src/scan.rs
//! Bounded filesystem scanning for repo snapshots.
//!
//! Two strategies, picked by tool availability:
//! - **fast path**: `fd` (or Debian's `fdfind`) enumerates files with hard
//!   result caps and a sub-second timeout, honoring ignore files itself;
//! - **fallback**: a manual work-queue walk that applies the root
//!   `.gitignore`, skips dotfiles, and bounds both depth and visited items
//!   so pathological trees (deep nesting, symlink cycles) terminate.
//!
//! A missing or misbehaving external tool is never an error — the scanner
//! degrades to the fallback, or omits the optional tree view entirely.

use crate::gitignore::Gitignore;
use crate::proc;
use serde::Serialize;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Top-level listing cap.
pub const MAX_TOP_LEVEL_ENTRIES: usize = 50;
/// Fallback walk: maximum directory depth below a top-level directory.
pub const DIR_SUMMARY_MAX_DEPTH: usize = 4;
/// Per-top-level-directory item count cap. Counts saturate here — the cap
/// is a "many files" signal, not an exact census.
pub const DIR_SUMMARY_MAX_ITEMS: u64 = 1000;
/// fd result cap when enumerating for the directory summary.
pub const FD_MAX_RESULTS: usize = 5000;
/// fd result cap when enumerating for the tree view.
pub const FD_TREE_MAX_RESULTS: usize = 2000;
/// Tree view bounds.
pub const TREE_MAX_DEPTH: usize = 4;
pub const TREE_MAX_LINES: usize = 120;
pub const TREE_MAX_CHARS: usize = 8000;

/// Hard deadline for each external enumerator/renderer call.
const TOOL_TIMEOUT: Duration = Duration::from_secs(1);

/// Entry type for top-level listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One top-level entry of the scanned root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopLevelEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Bounded scanner for a single root.
///
/// Tool availability is probed lazily and memoized for the lifetime of the
/// scanner instance only — a fresh process (each hook invocation is one)
/// re-probes.
pub struct Scanner {
    root: PathBuf,
    fd_bin: OnceCell<Option<PathBuf>>,
    tree_bin: OnceCell<Option<PathBuf>>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fd_bin: OnceCell::new(),
            tree_bin: OnceCell::new(),
        }
    }

    /// A scanner that never consults external tools — always takes the
    /// fallback walk and omits the tree view. Useful for sandboxed
    /// environments and deterministic tests.
    pub fn without_external_tools(root: impl Into<PathBuf>) -> Self {
        let scanner = Self::new(root);
        let _ = scanner.fd_bin.set(None);
        let _ = scanner.tree_bin.set(None);
        scanner
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fd_binary(&self) -> Option<&Path> {
        self.fd_bin
            .get_or_init(|| proc::find_in_path("fd").or_else(|| proc::find_in_path("fdfind")))
            .as_deref()
    }

    fn tree_binary(&self) -> Option<&Path> {
        self.tree_bin
            .get_or_init(|| proc::find_in_path("tree"))
            .as_deref()
    }

    /// Top-level entries, dotfiles skipped, capped at
    /// [`MAX_TOP_LEVEL_ENTRIES`].
    pub fn top_level(&self) -> Vec<TopLevelEntry> {
        if let Some(items) = self.fd_list(false, Some(1), MAX_TOP_LEVEL_ENTRIES * 5, &["f", "d"]) {
            let mut entries = Vec::new();
            for item in items {
                let name = Path::new(&item)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if name.starts_with('.') || name.is_empty() {
                    continue;
                }
                let is_dir = std::fs::symlink_metadata(self.root.join(&item))
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                entries.push(TopLevelEntry {
                    name,
                    kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
                });
                if entries.len() >= MAX_TOP_LEVEL_ENTRIES {
                    break;
                }
            }
            return entries;
        }

        // Fallback: direct listing, sorted for determinism
        let ignore = Gitignore::from_root(&self.root);
        let Ok(read_dir) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut items: Vec<(String, bool)> = read_dir
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    return None;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                Some((name, is_dir))
            })
            .collect();
        items.sort();

        let mut entries = Vec::new();
        for (name, is_dir) in items {
            if ignore.is_ignored(Path::new(&name), is_dir) {
                continue;
            }
            entries.push(TopLevelEntry {
                name,
                kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
            });
            if entries.len() >= MAX_TOP_LEVEL_ENTRIES {
                break;
            }
        }
        entries
    }

    /// Item counts per top-level directory. Files directly at the root are
    /// excluded; each count saturates at [`DIR_SUMMARY_MAX_ITEMS`].
    pub fn directory_summary(&self) -> BTreeMap<String, u64> {
        if let Some(files) = self.fd_list(true, None, FD_MAX_RESULTS, &["f"]) {
            return summary_from_files(&files);
        }

        let ignore = Gitignore::from_root(&self.root);
        let mut summary = BTreeMap::new();
        let Ok(read_dir) = std::fs::read_dir(&self.root) else {
            return summary;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if ignore.is_ignored(Path::new(&name), true) {
                continue;
            }
            let count = self.count_dir(&ignore, &entry.path());
            summary.insert(name, count);
        }
        summary
    }

    /// Count items under one top-level directory with an explicit work
    /// queue: depth capped at [`DIR_SUMMARY_MAX_DEPTH`], count saturating
    /// at [`DIR_SUMMARY_MAX_ITEMS`]. Symlinks are not followed.
    fn count_dir(&self, ignore: &Gitignore, top_dir: &Path) -> u64 {
        let mut count: u64 = 0;
        let mut queue: Vec<(PathBuf, usize)> = vec![(top_dir.to_path_buf(), 0)];

        while let Some((current, depth)) = queue.pop() {
            if depth > DIR_SUMMARY_MAX_DEPTH {
                continue;
            }
            let Ok(read_dir) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let Ok(rel) = entry.path().strip_prefix(&self.root).map(Path::to_path_buf) else {
                    continue;
                };
                if ignore.is_ignored(&rel, is_dir) {
                    continue;
                }

                count += 1;
                if count >= DIR_SUMMARY_MAX_ITEMS {
                    return DIR_SUMMARY_MAX_ITEMS;
                }
                if is_dir && depth < DIR_SUMMARY_MAX_DEPTH {
                    queue.push((entry.path(), depth + 1));
                }
            }
        }
        count
    }

    /// Optional rendered tree: requires both `fd` and `tree`, bounded to
    /// [`TREE_MAX_LINES`] lines / [`TREE_MAX_CHARS`] chars. Absence of
    /// either tool yields `None`.
    pub fn file_tree(&self) -> Option<String> {
        let files = self.fd_list(true, None, FD_TREE_MAX_RESULTS, &["f"])?;
        let tree = self.tree_binary()?;

        let mut stdin_text = files.join("\n");
        if !files.is_empty() {
            stdin_text.push('\n');
        }

        let mut cmd = Command::new(tree);
        cmd.current_dir(&self.root).args([
            "--fromfile",
            "--noreport",
            "--charset",
            "ascii",
            "-L",
            &TREE_MAX_DEPTH.to_string(),
        ]);
        let output = proc::run_with_timeout(&mut cmd, TOOL_TIMEOUT, Some(&stdin_text))?;
        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines: Vec<&str> = Vec::new();
        let mut total_chars = 0usize;
        for line in text.lines() {
            if lines.len() >= TREE_MAX_LINES {
                break;
            }
            if total_chars + line.len() + 1 > TREE_MAX_CHARS {
                break;
            }
            lines.push(line.trim_end());
            total_chars += line.len() + 1;
        }
        let rendered = lines.join("\n").trim().to_string();
        (!rendered.is_empty()).then_some(rendered)
    }

    /// Invoke the external enumerator once, with a hard timeout. `None`
    /// means "unavailable" (missing binary, non-zero exit, or timeout) and
    /// selects the fallback path.
    fn fd_list(
        &self,
        include_hidden: bool,
        max_depth: Option<usize>,
        max_results: usize,
        types: &[&str],
    ) -> Option<Vec<String>> {
        let fd = self.fd_binary()?;

        let mut cmd = Command::new(fd);
        cmd.current_dir(&self.root)
            .arg("--strip-cwd-prefix")
            .args(["--exclude", ".git"])
            .arg("--no-require-git")
            .args(["--max-results", &max_results.to_string()]);
        if include_hidden {
            cmd.arg("--hidden");
        }
        if let Some(depth) = max_depth {
            cmd.args(["--max-depth", &depth.to_string()]);
        }
        for t in types {
            cmd.args(["--type", t]);
        }
        cmd.arg(".");

        let output = proc::run_with_timeout(&mut cmd, TOOL_TIMEOUT, None)?;
        if !output.status.success() {
            debug!(exit_code = ?output.status.code(), "fd returned non-zero, falling back");
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                // fd prints directories with a trailing '/', normalize
                .map(|line| line.strip_suffix('/').unwrap_or(line).to_string())
                .collect(),
        )
    }
}

/// Aggregate an enumerated file list into per-top-level-directory counts.
/// Files directly at the root (no separator) and dot-prefixed top dirs are
/// excluded; counts saturate at [`DIR_SUMMARY_MAX_ITEMS`].
fn summary_from_files(files: &[String]) -> BTreeMap<String, u64> {
    let mut summary: BTreeMap<String, u64> = BTreeMap::new();
    for rel in files {
        let Some((top, _)) = rel.split_once('/') else {
            continue;
        };
        if top.is_empty() || top.starts_with('.') {
            continue;
        }
        let count = summary.entry(top.to_string()).or_insert(0);
        *count = (*count + 1).min(DIR_SUMMARY_MAX_ITEMS);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_summary_from_files_counts_per_top_dir() {
        let files = vec![
            "src/main.rs".to_string(),
            "src/lib.rs".to_string(),
            "docs/guide.md".to_string(),
            "README.md".to_string(),     // root file, excluded
            ".cache/blob".to_string(),   // dot dir, excluded
            "src/nested/deep.rs".to_string(),
        ];
        let summary = summary_from_files(&files);
        assert_eq!(summary.get("src"), Some(&3));
        assert_eq!(summary.get("docs"), Some(&1));
        assert_eq!(summary.get("README.md"), None);
        assert_eq!(summary.get(".cache"), None);
    }

    #[test]
    fn test_summary_from_files_caps_at_limit() {
        let files: Vec<String> = (0..1500).map(|i| format!("big/file_{i}.txt")).collect();
        let summary = summary_from_files(&files);
        assert_eq!(summary.get("big"), Some(&DIR_SUMMARY_MAX_ITEMS));
    }

    #[test]
    fn test_top_level_skips_dotfiles_and_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("keep.txt"));
        touch(&tmp.path().join("ignored.txt"));
        touch(&tmp.path().join(".hidden"));
        touch(&tmp.path().join("kept_dir/a.txt"));
        touch(&tmp.path().join("ignored_dir/b.txt"));
        std::fs::write(tmp.path().join(".gitignore"), "ignored_dir/\nignored.txt\n").unwrap();

        let scanner = Scanner::without_external_tools(tmp.path());
        let entries = scanner.top_level();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["keep.txt", "kept_dir"]);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
    }

    #[test]
    fn test_directory_summary_fallback_walk() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("src/a.rs"));
        touch(&tmp.path().join("src/b.rs"));
        touch(&tmp.path().join("src/sub/c.rs"));
        touch(&tmp.path().join("root.txt"));
        touch(&tmp.path().join("ignored_dir/d.txt"));
        std::fs::write(tmp.path().join(".gitignore"), "ignored_dir/\n").unwrap();

        let scanner = Scanner::without_external_tools(tmp.path());
        let summary = scanner.directory_summary();
        // a.rs + b.rs + sub/ + sub/c.rs
        assert_eq!(summary.get("src"), Some(&4));
        assert!(!summary.contains_key("ignored_dir"));
        assert!(!summary.contains_key("root.txt"));
    }

    #[test]
    fn test_directory_summary_depth_bound() {
        let tmp = tempfile::tempdir().unwrap();
        // A file 8 levels deep: only the dirs within the depth cap count
        touch(&tmp.path().join("deep/1/2/3/4/5/6/leaf.txt"));

        let scanner = Scanner::without_external_tools(tmp.path());
        let summary = scanner.directory_summary();
        let count = *summary.get("deep").unwrap();
        // dirs 1..=4 are visited (depth 0..=3), dir 5 is seen at depth 4
        // but not descended into
        assert_eq!(count, 5);
    }

    #[test]
    fn test_scanner_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("src/a.rs"));
        touch(&tmp.path().join("docs/b.md"));
        touch(&tmp.path().join("top.txt"));

        let scanner = Scanner::without_external_tools(tmp.path());
        assert_eq!(scanner.top_level(), scanner.top_level());
        assert_eq!(scanner.directory_summary(), scanner.directory_summary());
    }

    #[test]
    fn test_file_tree_absent_without_tools() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("src/a.rs"));
        let scanner = Scanner::without_external_tools(tmp.path());
        assert_eq!(scanner.file_tree(), None);
    }

    #[test]
    fn test_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = Scanner::without_external_tools(tmp.path());
        assert!(scanner.top_level().is_empty());
        assert!(scanner.directory_summary().is_empty());
    }
}
