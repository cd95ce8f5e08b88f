// crates/core/src/brain.rs
//! Session brain persistence.
//!
//! The brain is cross-session memory: project summary, current goal and
//! plan, decisions, and progress. Consumers treat it as a JSON blob; this
//! module owns its default shape, lenient loading (a corrupt file is
//! backed up and replaced with a fresh brain, never an error), atomic
//! saving, and per-session episode snapshots.

use crate::io;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current brain schema version.
pub const BRAIN_VERSION: u64 = 1;

/// Maximum session-id length used in episode filenames.
const EPISODE_SESSION_ID_CHARS: usize = 32;

/// A fresh, empty brain.
pub fn empty_brain(session_id: &str) -> Value {
    json!({
        "version": BRAIN_VERSION,
        "project": {
            "summary": "",
            "stack_guesses": [],
            "key_commands": [],
        },
        "working_set": {
            "current_goal": "",
            "current_plan": [],
            "open_questions": [],
            "risks": [],
        },
        "decisions": [],
        "progress": {
            "recent_changes": [],
            "done": [],
        },
        "signals": {
            "last_session_id": session_id,
            "last_updated_at": Utc::now().to_rfc3339(),
        },
    })
}

/// Minimal shape check: enough structure that downstream consumers can
/// index into the blob without panicking.
fn looks_like_brain(value: &Value) -> bool {
    value.get("version").and_then(Value::as_u64).is_some()
        && value.get("project").is_some_and(Value::is_object)
        && value.get("working_set").is_some_and(Value::is_object)
}

/// Load the brain, starting fresh when the file is missing or fails the
/// shape check. A malformed brain is backed up to `<name>.json.bak` for
/// debugging before being replaced.
pub fn load_brain(path: &Path) -> Value {
    let Some(value) = io::read_json_value(path) else {
        info!(path = %path.display(), "no brain file found, starting fresh");
        return empty_brain("");
    };

    if looks_like_brain(&value) {
        return value;
    }

    warn!(path = %path.display(), "brain file failed shape check, starting fresh");
    let backup = path.with_extension("json.bak");
    match io::write_json_atomic(&backup, &value) {
        Ok(()) => info!(backup = %backup.display(), "backed up invalid brain"),
        Err(e) => warn!(error = %e, "failed to back up invalid brain"),
    }
    empty_brain("")
}

/// Save the brain atomically.
pub fn save_brain(path: &Path, brain: &Value) -> std::io::Result<()> {
    io::write_json_atomic(path, brain)?;
    debug!(path = %path.display(), "saved brain");
    Ok(())
}

/// Save an episode snapshot for this session as
/// `<timestamp>_<session_id>.json` under the episodes directory.
/// Returns the written path, or `None` on failure (logged, not fatal).
pub fn save_episode(episodes_dir: &Path, brain: &Value, session_id: &str) -> Option<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(episodes_dir) {
        warn!(error = %e, "failed to create episodes directory");
        return None;
    }

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let safe_session_id: String = session_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(EPISODE_SESSION_ID_CHARS)
        .collect();

    let path = episodes_dir.join(format!("{timestamp}_{safe_session_id}.json"));
    match io::write_json_atomic(&path, brain) {
        Ok(()) => {
            debug!(path = %path.display(), "saved episode");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "failed to write episode");
            None
        }
    }
}

/// Record metadata about the most recent brain update attempt, for
/// debugging hook behavior after the fact.
pub fn save_last_update(
    state_dir: &Path,
    session_id: &str,
    status: &str,
    error: Option<&str>,
    transcript_lines: usize,
) -> std::io::Result<()> {
    let mut data = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "session_id": session_id,
        "status": status,
        "transcript_lines": transcript_lines,
    });
    if let Some(error) = error {
        data["error"] = json!(error);
    }
    io::write_json_atomic(&state_dir.join("brain.last_update.json"), &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_brain_shape() {
        let brain = empty_brain("abc");
        assert!(looks_like_brain(&brain));
        assert_eq!(brain["signals"]["last_session_id"], "abc");
        assert_eq!(brain["project"]["summary"], "");
    }

    #[test]
    fn test_load_missing_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let brain = load_brain(&tmp.path().join("brain.json"));
        assert!(looks_like_brain(&brain));
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("brain.json");

        let mut brain = empty_brain("s1");
        brain["project"]["summary"] = json!("a rust workspace");
        save_brain(&path, &brain).unwrap();

        let loaded = load_brain(&path);
        assert_eq!(loaded, brain);
    }

    #[test]
    fn test_corrupt_brain_backed_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("brain.json");
        std::fs::write(&path, r#"{"not": "a brain"}"#).unwrap();

        let brain = load_brain(&path);
        assert!(looks_like_brain(&brain));
        assert_eq!(brain["project"]["summary"], "");

        let backup = tmp.path().join("brain.json.bak");
        assert!(backup.exists());
        assert_eq!(
            io::read_json_value(&backup),
            Some(json!({"not": "a brain"}))
        );
    }

    #[test]
    fn test_save_episode_sanitizes_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        let brain = empty_brain("x");
        let path = save_episode(tmp.path(), &brain, "weird/..id with spaces").unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".json"));
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
        assert!(path.exists());
    }

    #[test]
    fn test_save_last_update() {
        let tmp = tempfile::tempdir().unwrap();
        save_last_update(tmp.path(), "s1", "success", None, 42).unwrap();

        let value = io::read_json_value(&tmp.path().join("brain.last_update.json")).unwrap();
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["status"], "success");
        assert_eq!(value["transcript_lines"], 42);
        assert!(value.get("error").is_none());
    }
}
