// crates/core/src/transcript.rs
//! Session transcript scanning.
//!
//! Claude Code writes each session as newline-delimited JSON. The one
//! signal this module extracts is skill usage: a `Read` of a skill
//! definition file means that skill's context was loaded into the session.

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path};
use tracing::debug;

/// Well-known skill definition filename.
pub const SKILL_FILE_NAME: &str = "SKILL.md";

/// All skill ids read in the transcript, in read order.
///
/// Malformed lines are skipped, a missing transcript yields an empty list.
pub fn skill_reads(transcript_path: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(transcript_path) else {
        return Vec::new();
    };

    let mut reads = Vec::new();
    let mut line_number = 0usize;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(line = line_number, error = %e, "skipping malformed transcript line");
                continue;
            }
        };

        if value.get("tool_name").and_then(Value::as_str) != Some("Read") {
            continue;
        }
        let Some(path) = value
            .get("tool_input")
            .and_then(|input| input.get("file_path"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if !path.contains(SKILL_FILE_NAME) {
            continue;
        }
        if let Some(skill) = skill_id_from_path(path) {
            reads.push(skill);
        }
    }
    reads
}

/// The most recently read skill id — whatever skill context was loaded
/// last is treated as the active one.
pub fn latest_skill_read(transcript_path: &Path) -> Option<String> {
    skill_reads(transcript_path).pop()
}

/// Extract the skill id from a skill file path: the segment immediately
/// following a `skills` directory component, as long as it is not the
/// final (filename) segment.
///
/// `/mnt/skills/docx/SKILL.md` → `docx`
fn skill_id_from_path(path: &str) -> Option<String> {
    let parts: Vec<&str> = Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let idx = parts.iter().position(|part| *part == "skills")?;
    if idx + 1 < parts.len().saturating_sub(1) {
        Some(parts[idx + 1].to_string())
    } else {
        None
    }
}
