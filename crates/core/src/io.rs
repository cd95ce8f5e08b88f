// crates/core/src/io.rs
//! Safe file I/O for hook processes.
//!
//! Hooks run on the host's critical path, so reads never fail loudly
//! (missing or corrupt files yield defaults) and writes are atomic
//! (temp file + rename) so state files are never left half-written.

use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::debug;

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `content` to `path` atomically via a temp file in the same
/// directory followed by a rename.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically, with a
/// trailing newline.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let mut content = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    content.push('\n');
    write_atomic(path, &content)
}

/// Read and parse a JSON file. Missing files, unreadable files, and
/// invalid JSON all yield `None`.
pub fn read_json_value(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Result of reading a JSONL file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonlRead {
    pub items: Vec<Value>,
    pub total_lines: usize,
    pub invalid_lines: usize,
}

/// Read a JSON Lines file, skipping and counting invalid lines.
///
/// Never fails: a missing or unreadable file yields an empty result.
/// `max_items` bounds the number of *valid* items returned.
pub fn read_jsonl(path: &Path, max_items: Option<usize>) -> JsonlRead {
    let Ok(file) = std::fs::File::open(path) else {
        return JsonlRead::default();
    };

    let mut result = JsonlRead::default();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        result.total_lines += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(value) => result.items.push(value),
            Err(e) => {
                debug!(line = result.total_lines, error = %e, "skipping invalid JSONL line");
                result.invalid_lines += 1;
                continue;
            }
        }
        if let Some(max) = max_items {
            if result.items.len() >= max {
                break;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_write_atomic_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("state.json");

        write_json_atomic(&path, &json!({"version": 1})).unwrap();
        let value = read_json_value(&path).unwrap();
        assert_eq!(value, json!({"version": 1}));

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "state.json")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();
        assert_eq!(read_json_value(&path), Some(json!({"v": 2})));
    }

    #[test]
    fn test_read_json_value_missing_or_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_json_value(&tmp.path().join("missing.json")), None);

        let path = tmp.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(read_json_value(&path), None);
    }

    #[test]
    fn test_read_jsonl_counts_invalid_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.jsonl");
        std::fs::write(&path, "{\"a\":1}\nnot json\n\n{\"b\":2}\n").unwrap();

        let result = read_jsonl(&path, None);
        assert_eq!(result.items, vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(result.total_lines, 4);
        assert_eq!(result.invalid_lines, 1);
    }

    #[test]
    fn test_read_jsonl_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = read_jsonl(&tmp.path().join("missing.jsonl"), None);
        assert_eq!(result, JsonlRead::default());
    }

    #[test]
    fn test_read_jsonl_max_items() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n").unwrap();
        let result = read_jsonl(&path, Some(2));
        assert_eq!(result.items.len(), 2);
    }
}
