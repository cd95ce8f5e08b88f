// crates/cli/src/hook.rs
//! Claude Code hook handlers.
//!
//! Each handler reads one hook-input JSON object from stdin, does its
//! work, and exits zero. Hooks sit on the host's critical path, so
//! nothing here is allowed to block it: malformed input means a no-op,
//! storage failures are logged to stderr, and stdout always carries a
//! valid hook response where the event expects one.
//!
//! The recursion guard is checked once at each entry point: when this
//! process was spawned from inside one of our own LLM calls, the handler
//! exits immediately instead of re-triggering the pipeline.

use anyhow::Result;
use chrono::Utc;
use claude_recall_core::snapshot::{self, RepoSnapshot};
use claude_recall_core::{brain, io, llm, paths, transcript};
use claude_recall_db::{
    FeedbackStore, SessionSummary, SkillDetector, ToolExecution, ToolResponse,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stored error messages are bounded.
const MAX_ERROR_CHARS: usize = 500;
/// An opaque response counts as failed only when "error" appears this
/// early in the text; later mentions are usually quoted output.
const OPAQUE_ERROR_SCAN_CHARS: usize = 100;
/// Compact snapshot render: tree lines and hint entries shown at start.
const CONTEXT_TREE_LINES: usize = 40;
const CONTEXT_HINTS: usize = 5;
const CONTEXT_HINT_CHARS: usize = 100;

/// Hook input as delivered by Claude Code on stdin.
///
/// Unknown fields are ignored; missing fields default so a partial
/// payload still parses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub session_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_response: Value,
    pub transcript_path: Option<String>,
    pub prompt: Option<String>,
    pub cwd: Option<String>,
}

/// Read and parse hook input from stdin. Any failure yields the default
/// (empty) input — a hook never errors over a bad payload.
fn read_hook_input() -> HookInput {
    let mut text = String::new();
    if std::io::stdin().read_to_string(&mut text).is_err() {
        return HookInput::default();
    }
    serde_json::from_str(&text).unwrap_or_default()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Success/error classification over the tagged tool response.
///
/// Structured responses: an `error` field always means failure; `stderr`
/// counts only when paired with a non-zero `exit_code`, since tools
/// routinely write informational text there. Opaque responses fail when
/// the text leads with "error".
fn classify_response(response: &ToolResponse) -> (bool, Option<String>) {
    match response {
        ToolResponse::Structured(value) => {
            if let Some(error) = value.get("error") {
                let text = match error {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                if !text.is_empty() {
                    return (false, Some(truncate_chars(&text, MAX_ERROR_CHARS)));
                }
            }
            if let Some(stderr) = value.get("stderr").and_then(Value::as_str) {
                let exit_code = value.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
                if exit_code != 0 && !stderr.is_empty() {
                    return (false, Some(truncate_chars(stderr, MAX_ERROR_CHARS)));
                }
            }
            (true, None)
        }
        ToolResponse::Opaque(text) => {
            let head = truncate_chars(text, OPAQUE_ERROR_SCAN_CHARS).to_lowercase();
            if head.contains("error") {
                (false, Some(truncate_chars(text, MAX_ERROR_CHARS)))
            } else {
                (true, None)
            }
        }
    }
}

/// PostToolUse: attribute the call to a skill and log it to the feedback
/// store. Detection runs without the LLM strategy — this path executes
/// after every tool call and must stay fast.
pub fn post_tool_use() -> Result<()> {
    if llm::guard_active() {
        debug!("recursion guard active, skipping feedback hook");
        return Ok(());
    }

    let input = read_hook_input();
    if input.tool_name.is_empty() {
        return Ok(());
    }

    let response = ToolResponse::from_value(input.tool_response);
    let (success, error_message) = classify_response(&response);

    let transcript_path = input.transcript_path.as_deref().map(Path::new);
    let detector = SkillDetector::open_default().with_llm(false);
    let skill_used = detector.detect(&input.tool_name, &input.tool_input, transcript_path, None);

    let execution = ToolExecution {
        session_id: if input.session_id.is_empty() {
            "unknown".to_string()
        } else {
            input.session_id
        },
        tool_name: input.tool_name,
        tool_input: input.tool_input,
        tool_response: Some(response),
        success,
        error_message,
        // Not present in the hook payload
        duration_ms: None,
        skill_used,
        timestamp: Utc::now().to_rfc3339(),
    };

    match FeedbackStore::open_default() {
        Ok(store) => {
            if let Err(e) = store.log_tool_execution(&execution) {
                warn!(error = %e, "failed to log tool execution");
            }
        }
        Err(e) => warn!(error = %e, "feedback store unavailable"),
    }
    Ok(())
}

/// SessionStart: emit brain context plus a fresh repo snapshot as
/// `additionalContext` in the hook response.
pub fn session_start() -> Result<()> {
    if llm::guard_active() {
        println!("{}", json!({"suppressOutput": true}));
        return Ok(());
    }

    let input = read_hook_input();
    let cwd = input
        .cwd
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok());

    if let Err(e) = paths::ensure_state_dirs() {
        warn!(error = %e, "failed to create state directories");
    }

    let brain = brain::load_brain(&paths::brain_json_path());
    let snap = snapshot::create_snapshot(cwd.as_deref());
    let context = build_session_context(&brain, &snap);

    let output = json!({
        "hookSpecificOutput": {
            "hookEventName": "SessionStart",
            "additionalContext": context,
        },
        "suppressOutput": true,
    });
    println!("{output}");
    Ok(())
}

/// SessionEnd: summarize the session from our own execution log, then
/// save a brain episode for it.
pub fn session_end() -> Result<()> {
    if llm::guard_active() {
        println!("{}", json!({}));
        return Ok(());
    }

    let input = read_hook_input();
    run_session_end(&input);

    // Always a valid (empty) response, whatever happened above
    println!("{}", json!({}));
    Ok(())
}

fn run_session_end(input: &HookInput) {
    let session_id = if input.session_id.is_empty() {
        "unknown".to_string()
    } else {
        input.session_id.clone()
    };

    let transcript_skills = input
        .transcript_path
        .as_deref()
        .map(|p| transcript::skill_reads(Path::new(p)))
        .unwrap_or_default();
    let transcript_lines = input
        .transcript_path
        .as_deref()
        .map(|p| io::read_jsonl(Path::new(p), None).total_lines)
        .unwrap_or(0);

    match FeedbackStore::open_default() {
        Ok(store) => match store.get_session_executions(&session_id) {
            Ok(executions) if !executions.is_empty() => {
                let summary = summarize_session(
                    &session_id,
                    input.prompt.as_deref(),
                    &executions,
                    &transcript_skills,
                );
                if let Err(e) = store.log_session_summary(&summary) {
                    warn!(error = %e, "failed to log session summary");
                }
            }
            Ok(_) => debug!(session = %session_id, "no executions recorded for session"),
            Err(e) => warn!(error = %e, "failed to read session executions"),
        },
        Err(e) => warn!(error = %e, "feedback store unavailable"),
    }

    if let Err(e) = paths::ensure_state_dirs() {
        warn!(error = %e, "failed to create state directories");
        return;
    }

    let mut brain = brain::load_brain(&paths::brain_json_path());
    brain["signals"]["last_session_id"] = json!(session_id);
    brain["signals"]["last_updated_at"] = json!(Utc::now().to_rfc3339());

    let status = match brain::save_brain(&paths::brain_json_path(), &brain) {
        Ok(()) => "success",
        Err(e) => {
            warn!(error = %e, "failed to save brain");
            "save_failed"
        }
    };
    let _ = brain::save_episode(&paths::episodes_dir(), &brain, &session_id);
    if let Err(e) =
        brain::save_last_update(&paths::state_dir(), &session_id, status, None, transcript_lines)
    {
        warn!(error = %e, "failed to write last-update marker");
    }
}

/// Fold the session's execution log into a summary row. Skills seen in
/// the transcript are merged with skills attributed per execution.
fn summarize_session(
    session_id: &str,
    prompt: Option<&str>,
    executions: &[ToolExecution],
    transcript_skills: &[String],
) -> SessionSummary {
    let failed = executions.iter().filter(|e| !e.success).count() as i64;
    let total = executions.len() as i64;

    let tools_used = dedup_preserving_order(executions.iter().map(|e| e.tool_name.clone()));
    let skills_detected = dedup_preserving_order(
        executions
            .iter()
            .filter_map(|e| e.skill_used.clone())
            .chain(transcript_skills.iter().cloned()),
    );

    SessionSummary {
        session_id: session_id.to_string(),
        prompt: prompt.unwrap_or_default().to_string(),
        tools_used,
        skills_detected,
        total_tool_calls: total,
        successful_calls: total - failed,
        failed_calls: failed,
        task_completed: total > 0 && failed == 0,
        completion_feedback: None,
        timestamp: Utc::now().to_rfc3339(),
    }
}

fn dedup_preserving_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Render brain state and snapshot into the injected context string.
fn build_session_context(brain: &Value, snapshot: &RepoSnapshot) -> String {
    let mut sections: Vec<String> = Vec::new();

    let summary = brain["project"]["summary"].as_str().unwrap_or("");
    let goal = brain["working_set"]["current_goal"].as_str().unwrap_or("");
    if !summary.is_empty() || !goal.is_empty() {
        sections.push("## Session Brain".to_string());
        sections.push(String::new());
        if !summary.is_empty() {
            sections.push(format!("Project: {summary}"));
        }
        if !goal.is_empty() {
            sections.push(format!("Goal: {goal}"));
        }
        sections.push(String::new());
    }

    let actions = next_actions(brain);
    if !actions.is_empty() {
        sections.push("## Suggested Next Actions".to_string());
        sections.push(String::new());
        for (i, action) in actions.iter().enumerate() {
            sections.push(format!("{}. {action}", i + 1));
        }
        sections.push(String::new());
    }

    sections.push("## Repo Snapshot".to_string());
    sections.push(String::new());
    sections.push(render_snapshot_compact(snapshot));

    sections.join("\n")
}

/// Up to three next actions: plan steps first, then open questions.
fn next_actions(brain: &Value) -> Vec<String> {
    let working = &brain["working_set"];
    let mut actions: Vec<String> = working["current_plan"]
        .as_array()
        .map(|steps| {
            steps
                .iter()
                .filter_map(Value::as_str)
                .take(3)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(questions) = working["open_questions"].as_array() {
        for q in questions.iter().filter_map(Value::as_str).take(2) {
            if actions.len() >= 3 {
                break;
            }
            actions.push(format!("Resolve: {q}"));
        }
    }
    actions.truncate(3);
    actions
}

/// Compact text rendering of a snapshot for context injection: branch,
/// change count, a bounded tree (or top-level names), and a few hints.
fn render_snapshot_compact(snapshot: &RepoSnapshot) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(branch) = &snapshot.branch {
        lines.push(format!("Branch: {branch}"));
    }
    if !snapshot.status.is_empty() {
        lines.push(format!("Modified: {} file(s)", snapshot.status.len()));
    }

    match &snapshot.file_tree {
        Some(tree) if !tree.trim().is_empty() => {
            lines.push("Tree:".to_string());
            for line in tree.lines().take(CONTEXT_TREE_LINES) {
                lines.push(format!("  {line}"));
            }
        }
        _ => {
            let dirs: Vec<&str> = snapshot
                .top_level
                .iter()
                .filter(|e| e.kind == claude_recall_core::scan::EntryKind::Dir)
                .map(|e| e.name.as_str())
                .take(10)
                .collect();
            let files: Vec<&str> = snapshot
                .top_level
                .iter()
                .filter(|e| e.kind == claude_recall_core::scan::EntryKind::File)
                .map(|e| e.name.as_str())
                .take(5)
                .collect();
            if !dirs.is_empty() {
                lines.push(format!("Dirs: {}", dirs.join(", ")));
            }
            if !files.is_empty() {
                lines.push(format!("Files: {}", files.join(", ")));
            }
        }
    }

    if !snapshot.run_hints.is_empty() {
        lines.push("Hints:".to_string());
        for hint in snapshot.run_hints.iter().take(CONTEXT_HINTS) {
            lines.push(format!("  {}", truncate_chars(hint, CONTEXT_HINT_CHARS)));
        }
    }

    if lines.is_empty() {
        "(empty snapshot)".to_string()
    } else {
        lines.join("\n")
    }
}
