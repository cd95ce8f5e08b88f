// crates/core/src/llm.rs
//! Single-shot LLM invocation via an external CLI.
//!
//! Discovers an available LLM command (`claude -p`, falling back to `llm`)
//! and runs one bounded prompt through it. Calls into the LLM from a hook
//! set a recursion-guard environment variable on the child so an
//! LLM-driven tool call cannot re-trigger the same hook pipeline; the
//! guard is passed down explicitly here rather than consulted as ambient
//! state by callees.

use crate::proc;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Recursion-guard variable set on LLM children and checked at hook entry.
pub const RECURSION_GUARD_ENV: &str = "CLAUDE_RECALL_INTERNAL";

/// Default deadline for one LLM call.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether this process was spawned from inside one of our own LLM calls.
pub fn guard_active() -> bool {
    std::env::var(RECURSION_GUARD_ENV).map(|v| v == "1").unwrap_or(false)
}

/// A discovered LLM command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmClient {
    program: PathBuf,
    args: Vec<String>,
}

impl LlmClient {
    /// Find an available LLM CLI on PATH. `claude -p` is preferred; the
    /// generic `llm` tool is the fallback. `None` when neither exists.
    pub fn discover() -> Option<Self> {
        if let Some(claude) = proc::find_in_path("claude") {
            return Some(Self {
                program: claude,
                args: vec!["-p".to_string()],
            });
        }
        if let Some(llm) = proc::find_in_path("llm") {
            return Some(Self {
                program: llm,
                args: Vec::new(),
            });
        }
        None
    }

    /// Run one prompt, returning trimmed stdout. Timeouts, spawn failures,
    /// non-zero exits, and empty responses all yield `None`.
    pub fn prompt(&self, prompt: &str, timeout: Duration) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(prompt);

        // Strip Claude Code session vars so the CLI does not refuse to run
        // from inside a session, then mark the child as an internal call.
        for (key, _) in std::env::vars() {
            if key == "CLAUDECODE" || key.starts_with("CLAUDE_CODE") {
                cmd.env_remove(&key);
            }
        }
        cmd.env(RECURSION_GUARD_ENV, "1");

        let output = proc::run_with_timeout(&mut cmd, timeout, None)?;
        if !output.status.success() {
            debug!(exit_code = ?output.status.code(), "LLM command returned non-zero");
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_round_trip() {
        assert!(!guard_active());
        std::env::set_var(RECURSION_GUARD_ENV, "1");
        assert!(guard_active());
        std::env::remove_var(RECURSION_GUARD_ENV);
        assert!(!guard_active());
    }

    #[test]
    fn test_prompt_with_fake_cli() {
        // An `echo`-shaped program stands in for a real LLM CLI
        let client = LlmClient {
            program: proc::find_in_path("echo").expect("echo should exist"),
            args: Vec::new(),
        };
        let response = client.prompt("session-brain", Duration::from_secs(5));
        assert_eq!(response, Some("session-brain".to_string()));
    }

    #[test]
    fn test_prompt_missing_binary() {
        let client = LlmClient {
            program: PathBuf::from("/nonexistent/llm-cli"),
            args: Vec::new(),
        };
        assert_eq!(client.prompt("hi", Duration::from_secs(1)), None);
    }
}
