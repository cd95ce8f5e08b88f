// crates/core/src/paths.rs
//! Centralized path functions for all claude-recall storage locations.
//!
//! Single source of truth — eliminates ad-hoc `.claude/recall` joins
//! scattered across crates.

use std::path::PathBuf;

/// Environment variable Claude Code sets to the project being worked on.
pub const PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";

/// The project directory: `$CLAUDE_PROJECT_DIR` if set, otherwise the
/// current working directory, otherwise the home directory.
pub fn project_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(PROJECT_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::current_dir()
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Project-local state root: `<project>/.claude/recall/`.
pub fn state_dir() -> PathBuf {
    project_dir().join(".claude").join("recall")
}

/// Feedback SQLite database: `<state_dir>/feedback.db`.
pub fn feedback_db_path() -> PathBuf {
    state_dir().join("feedback.db")
}

/// Brain state file: `<state_dir>/brain.json`.
pub fn brain_json_path() -> PathBuf {
    state_dir().join("brain.json")
}

/// Per-session brain episode snapshots: `<state_dir>/episodes/`.
pub fn episodes_dir() -> PathBuf {
    state_dir().join("episodes")
}

/// Marker file describing the most recent brain update attempt.
pub fn last_update_path() -> PathBuf {
    state_dir().join("brain.last_update.json")
}

/// Create the state directory tree if it does not exist yet.
pub fn ensure_state_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(state_dir())?;
    std::fs::create_dir_all(episodes_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_dir_under_project() {
        let dir = state_dir();
        let text = dir.to_string_lossy().replace('\\', "/");
        assert!(text.ends_with(".claude/recall"));
    }

    #[test]
    fn test_feedback_db_path() {
        let path = feedback_db_path();
        assert!(path.to_string_lossy().ends_with("feedback.db"));
        assert_eq!(path.parent(), Some(state_dir().as_path()));
    }

    #[test]
    fn test_brain_paths() {
        assert!(brain_json_path().to_string_lossy().ends_with("brain.json"));
        assert!(episodes_dir().to_string_lossy().ends_with("episodes"));
        assert!(last_update_path()
            .to_string_lossy()
            .ends_with("brain.last_update.json"));
    }
}
