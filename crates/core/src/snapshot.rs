// crates/core/src/snapshot.rs
//! Fast, bounded, language-agnostic repo snapshots.
//!
//! Produces a compact JSON object describing git state, the file layout,
//! and "how do I run this" hints mined from common documentation files.
//! Designed to finish in under two seconds on medium repos and to work
//! gracefully when git is unavailable: every external call carries an
//! explicit timeout and every collection carries a hard cap.

use crate::gitignore::{self, Gitignore};
use crate::proc;
use crate::scan::Scanner;
use crate::scan::TopLevelEntry;
use regex_lite::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Recent-commit cap.
pub const MAX_RECENT_COMMITS: usize = 10;
/// Run-hint bounds.
pub const MAX_HINT_LINES: usize = 20;
pub const MAX_HINT_LINE_LENGTH: usize = 200;
pub const MAX_HINT_FILE_BYTES: usize = 64_000;

/// Files mined for run hints (root-level only, shell-glob names).
const HINT_FILES: &[&str] = &[
    "README*",
    "CONTRIBUTING*",
    "Makefile",
    "justfile",
    "package.json",
];

/// Line patterns that identify how to run/build/test a project.
const HINT_PATTERNS: &[&str] = &[
    r"(?i)^#+\s*(getting started|quick start|installation|usage|how to|running)",
    r"(?i)^(npm|yarn|pnpm|bun)\s+(run|install|start|dev|build|test)",
    r"(?i)^(python|pip|uv|rye|poetry)\s+",
    r"(?i)^(make|just)\s+\w+",
    r"(?i)^(cargo|go|gradle|maven)\s+(run|build|test)",
    // Shell command examples
    r"^\$\s+",
];

/// Timeout for each git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A recent commit, short form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// Bounded point-in-time summary of a repository.
///
/// Recomputed fresh on every request; this module never persists it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoSnapshot {
    pub root: String,
    pub git_available: bool,
    pub branch: Option<String>,
    pub status: Vec<String>,
    pub recent_commits: Vec<CommitInfo>,
    pub top_level: Vec<TopLevelEntry>,
    pub directory_summary: BTreeMap<String, u64>,
    pub file_tree: Option<String>,
    pub run_hints: Vec<String>,
}

impl RepoSnapshot {
    /// Serialize to the compact wire shape: `root`, optional `git` block,
    /// `files` block, optional `run_hints`.
    pub fn to_value(&self) -> Value {
        let mut result = json!({ "root": self.root });

        if self.git_available {
            result["git"] = json!({
                "branch": self.branch,
                "status": self.status,
                "recent_commits": self.recent_commits,
            });
        }

        let mut files = json!({
            "top_level": self.top_level,
            "directory_summary": self.directory_summary,
        });
        if let Some(tree) = &self.file_tree {
            files["tree"] = json!(tree);
        }
        result["files"] = files;

        if !self.run_hints.is_empty() {
            result["run_hints"] = json!(self.run_hints);
        }

        result
    }
}

/// Run a git command under `cwd`, returning trimmed stdout or `None` on
/// any failure (missing git, non-zero exit, timeout).
fn run_git(args: &[&str], cwd: &Path) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(cwd);
    let output = proc::run_with_timeout(&mut cmd, GIT_TIMEOUT, None)?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

struct GitMeta {
    available: bool,
    branch: Option<String>,
    status: Vec<String>,
    commits: Vec<CommitInfo>,
}

/// Gather branch, porcelain status, and recent commits. Any git failure
/// yields `available: false` with empty fields — not an error.
fn git_meta(root: &Path) -> GitMeta {
    let Some(branch) = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], root) else {
        return GitMeta {
            available: false,
            branch: None,
            status: Vec::new(),
            commits: Vec::new(),
        };
    };

    let status = run_git(&["status", "--porcelain", "-uno"], root)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let log_arg = format!("-{MAX_RECENT_COMMITS}");
    let commits = run_git(&["log", &log_arg, "--oneline", "--no-decorate"], root)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once(' ') {
            Some((sha, message)) => CommitInfo {
                sha: sha.to_string(),
                message: message.to_string(),
            },
            None => CommitInfo {
                sha: line.to_string(),
                message: String::new(),
            },
        })
        .collect();

    GitMeta {
        available: true,
        branch: Some(branch),
        status,
        commits,
    }
}

/// Read at most `limit` bytes of a file, lossily decoded.
fn read_prefix(path: &Path, limit: usize) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = Vec::with_capacity(limit.min(16_384));
    file.by_ref()
        .take(limit as u64)
        .read_to_end(&mut buf)
        .ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Mine run hints from root-level documentation/build files.
///
/// Deduplicated, capped at [`MAX_HINT_LINES`] entries of
/// [`MAX_HINT_LINE_LENGTH`] chars each.
fn extract_run_hints(root: &Path, ignore: &Gitignore) -> Vec<String> {
    let patterns: Vec<Regex> = HINT_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

    let mut hints: Vec<String> = Vec::new();
    let Ok(read_dir) = std::fs::read_dir(root) else {
        return hints;
    };

    let mut candidates: Vec<String> = read_dir
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                return None;
            }
            HINT_FILES
                .iter()
                .any(|pattern| gitignore::glob_match(pattern, &name))
                .then_some(name)
        })
        .collect();
    candidates.sort();

    'files: for name in candidates {
        if ignore.is_ignored(Path::new(&name), false) {
            continue;
        }
        let Some(content) = read_prefix(&root.join(&name), MAX_HINT_FILE_BYTES) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if patterns.iter().any(|re| re.is_match(line)) {
                let truncated: String = line.chars().take(MAX_HINT_LINE_LENGTH).collect();
                if !hints.contains(&truncated) {
                    hints.push(truncated);
                }
            }
            if hints.len() >= MAX_HINT_LINES {
                break 'files;
            }
        }
    }
    hints
}

/// Create a snapshot of the repository at `root` (current directory when
/// `None`). Prefers the git toplevel as the true root when discoverable.
pub fn create_snapshot(root: Option<&Path>) -> RepoSnapshot {
    let start = root
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let start = std::fs::canonicalize(&start).unwrap_or(start);

    let root = run_git(&["rev-parse", "--show-toplevel"], &start)
        .filter(|top| !top.is_empty())
        .map(PathBuf::from)
        .unwrap_or(start);

    let git = git_meta(&root);
    let scanner = Scanner::new(&root);
    let ignore = Gitignore::from_root(&root);

    RepoSnapshot {
        root: root.display().to_string(),
        git_available: git.available,
        branch: git.branch,
        status: git.status,
        recent_commits: git.commits,
        top_level: scanner.top_level(),
        directory_summary: scanner.directory_summary(),
        file_tree: scanner.file_tree(),
        run_hints: extract_run_hints(&root, &ignore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_hints_from_readme() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("README.md"),
            "# My Project\n\
             Some prose that is not a hint.\n\
             ## Getting Started\n\
             npm install\n\
             npm run dev\n\
             $ cargo test\n\
             cargo build\n",
        )
        .unwrap();

        let hints = extract_run_hints(tmp.path(), &Gitignore::default());
        assert_eq!(
            hints,
            vec![
                "## Getting Started",
                "npm install",
                "npm run dev",
                "$ cargo test",
                "cargo build",
            ]
        );
    }

    #[test]
    fn test_run_hints_deduplicated_and_capped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for _ in 0..5 {
            content.push_str("npm install\n");
        }
        for i in 0..40 {
            content.push_str(&format!("make target{i}\n"));
        }
        std::fs::write(tmp.path().join("README.md"), content).unwrap();

        let hints = extract_run_hints(tmp.path(), &Gitignore::default());
        assert_eq!(hints.len(), MAX_HINT_LINES);
        assert_eq!(hints.iter().filter(|h| *h == "npm install").count(), 1);
    }

    #[test]
    fn test_run_hints_truncate_long_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let long = format!("$ {}", "x".repeat(500));
        std::fs::write(tmp.path().join("README.md"), &long).unwrap();

        let hints = extract_run_hints(tmp.path(), &Gitignore::default());
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].chars().count(), MAX_HINT_LINE_LENGTH);
    }

    #[test]
    fn test_run_hints_skip_ignored_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("README.md"), "npm install\n").unwrap();
        let ignore = Gitignore::parse("README.md\n");
        assert!(extract_run_hints(tmp.path(), &ignore).is_empty());
    }

    #[test]
    fn test_snapshot_without_git() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("kept_dir")).unwrap();
        std::fs::write(tmp.path().join("kept_dir").join("a.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("ignored_dir")).unwrap();
        std::fs::write(tmp.path().join("ignored_dir").join("b.txt"), "x").unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "ignored_dir/\nignored.txt\n").unwrap();

        let snapshot = create_snapshot(Some(tmp.path()));
        assert!(!snapshot.git_available);
        assert_eq!(snapshot.branch, None);
        assert!(snapshot.status.is_empty());
        assert!(snapshot.recent_commits.is_empty());

        let names: Vec<&str> = snapshot
            .top_level
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert!(names.contains(&"keep.txt"));
        assert!(names.contains(&"kept_dir"));
        assert!(!names.contains(&"ignored.txt"));
        assert!(!names.contains(&"ignored_dir"));
        assert!(snapshot.directory_summary.contains_key("kept_dir"));
        assert!(!snapshot.directory_summary.contains_key("ignored_dir"));
    }

    #[test]
    fn test_to_value_shape() {
        let snapshot = RepoSnapshot {
            root: "/tmp/repo".into(),
            git_available: false,
            branch: None,
            status: Vec::new(),
            recent_commits: Vec::new(),
            top_level: Vec::new(),
            directory_summary: BTreeMap::new(),
            file_tree: None,
            run_hints: Vec::new(),
        };
        let value = snapshot.to_value();
        assert_eq!(value["root"], "/tmp/repo");
        assert!(value.get("git").is_none());
        assert!(value["files"].get("tree").is_none());
        assert!(value.get("run_hints").is_none());
    }

    #[test]
    fn test_to_value_with_git_block() {
        let snapshot = RepoSnapshot {
            root: "/tmp/repo".into(),
            git_available: true,
            branch: Some("main".into()),
            status: vec![" M src/lib.rs".into()],
            recent_commits: vec![CommitInfo {
                sha: "abc1234".into(),
                message: "initial commit".into(),
            }],
            top_level: Vec::new(),
            directory_summary: BTreeMap::new(),
            file_tree: Some("tree text".into()),
            run_hints: vec!["cargo build".into()],
        };
        let value = snapshot.to_value();
        assert_eq!(value["git"]["branch"], "main");
        assert_eq!(value["git"]["recent_commits"][0]["sha"], "abc1234");
        assert_eq!(value["files"]["tree"], "tree text");
        assert_eq!(value["run_hints"][0], "cargo build");
    }
}
