// crates/core/src/gitignore.rs
//! Small, best-effort gitignore matcher.
//!
//! Intentionally incomplete: it targets the common patterns used to keep
//! large build/vendor directories out of fast repo scans. No `**`
//! semantics and no nested ignore files — only the root `.gitignore` is
//! consulted, once per scan.

use std::path::{Component, Path};

/// A single parsed ignore rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pattern: String,
    negate: bool,
    dir_only: bool,
    anchored: bool,
}

/// Parsed ignore rules for one scan. Rules are evaluated in file order and
/// the last matching rule wins, so `!` negations can re-include paths.
#[derive(Debug, Clone, Default)]
pub struct Gitignore {
    rules: Vec<IgnoreRule>,
}

impl Gitignore {
    /// Load rules from `<root>/.gitignore`. A missing or unreadable file
    /// yields an empty matcher.
    pub fn from_root(root: &Path) -> Self {
        let text = std::fs::read_to_string(root.join(".gitignore")).unwrap_or_default();
        Self::parse(&text)
    }

    /// Parse gitignore-style text into rules.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        for raw in text.lines() {
            let mut line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let negate = line.starts_with('!');
            if negate {
                line = line[1..].trim();
            }
            if line.is_empty() {
                continue;
            }

            let anchored = line.starts_with('/');
            if anchored {
                line = &line[1..];
            }

            let dir_only = line.ends_with('/');
            if dir_only {
                line = &line[..line.len() - 1];
            }

            if !line.is_empty() {
                rules.push(IgnoreRule {
                    pattern: line.to_string(),
                    negate,
                    dir_only,
                    anchored,
                });
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `rel_path` (relative to the scan root) should be ignored.
    ///
    /// Anchored and slash-containing patterns match against the whole
    /// POSIX-style relative path; bare patterns match against each path
    /// segment individually.
    pub fn is_ignored(&self, rel_path: &Path, is_dir: bool) -> bool {
        let parts: Vec<String> = rel_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let rel_posix = parts.join("/");

        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }

            let matched = if rule.anchored || rule.pattern.contains('/') {
                glob_match(&rule.pattern, &rel_posix)
            } else {
                parts.iter().any(|part| glob_match(&rule.pattern, part))
            };

            if matched {
                ignored = !rule.negate;
            }
        }
        ignored
    }
}

/// Shell-glob match: `*` matches any run of characters, `?` any single
/// character, `[...]` a character class with `!`/`^` negation and ranges.
/// Path separators are not treated specially.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    // Most recent `*` position, for backtracking on mismatch
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = if pi < p.len() {
            match p[pi] {
                '*' => {
                    backtrack = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '[' => match match_class(&p, pi, t[ti]) {
                    Some((true, next)) => Some(next),
                    Some((false, _)) => None,
                    // Unterminated class matches a literal '['
                    None => (t[ti] == '[').then_some(pi + 1),
                },
                c => (c == t[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        match step {
            Some(next) => {
                pi = next;
                ti += 1;
            }
            None => match backtrack {
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    backtrack = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Match `c` against the character class starting at `pattern[start]`
/// (which must be `[`). Returns `(matched, index_past_class)` or `None`
/// for an unterminated class.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while let Some(&pc) = pattern.get(i) {
        if pc == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        if pattern.get(i + 1) == Some(&'-') && pattern.get(i + 2).is_some_and(|&e| e != ']') {
            let hi = *pattern.get(i + 2).unwrap();
            if pc <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if pc == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
