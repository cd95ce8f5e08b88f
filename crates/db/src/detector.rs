// crates/db/src/detector.rs
//! Skill attribution for tool executions.
//!
//! Infers which skill produced a tool call through a fixed cascade, from
//! most accurate to most general:
//!
//! 1. Transcript evidence — the session explicitly read a skill file
//! 2. Learned associations — fast lookup from past attributions
//! 3. Semantic index query — `find-skill`, when installed
//! 4. LLM inference — works for anything, slowest, opt-in
//!
//! Each strategy is a function returning `Option<String>`, composed
//! first-some-wins. External failures (missing binary, timeout, bad JSON,
//! a broken store) degrade to "no answer" inside the strategy — detection
//! never propagates an error onto the caller's critical path. Answers
//! found by the index or LLM strategies are written back as learned
//! associations so future lookups short-circuit at step 2.

use crate::FeedbackStore;
use claude_recall_core::llm::LlmClient;
use claude_recall_core::{proc, transcript};
use serde_json::Value;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Minimum semantic-index score to accept a match.
pub const SEMANTIC_SCORE_THRESHOLD: f64 = 0.5;
/// Deadline for one semantic-index query.
pub const SEMANTIC_TIMEOUT: Duration = Duration::from_secs(5);
/// Confidence recorded for index-derived associations.
pub const CONFIDENCE_SEMANTIC: f64 = 0.8;
/// Confidence recorded for LLM-derived associations.
pub const CONFIDENCE_LLM: f64 = 0.6;

/// Semantic skill search CLI, provided by the external index service.
const SEMANTIC_INDEX_BIN: &str = "find-skill";

/// Bounds on the LLM detection prompt.
const MAX_PROMPT_INPUT_CHARS: usize = 1000;
const MAX_PROMPT_CONTEXT_CHARS: usize = 500;
/// A plausible skill id is short and slug-shaped.
const MAX_SKILL_ID_CHARS: usize = 50;

/// Command keywords that carry skill signal, checked as substrings.
const COMMAND_LIBRARIES: &[&str] = &["docx", "pdf", "xlsx", "pptx", "pandas", "openpyxl"];

/// Detects which skill is being used from tool execution context.
///
/// The store handle and tool-availability probes are lazy, memoized per
/// instance — each hook invocation is a fresh process, so nothing is
/// cached across invocations.
pub struct SkillDetector {
    db_path: PathBuf,
    use_llm: bool,
    llm_timeout: Duration,
    store: OnceCell<Option<FeedbackStore>>,
    semantic_bin: OnceCell<Option<PathBuf>>,
    llm_client: OnceCell<Option<LlmClient>>,
}

impl SkillDetector {
    /// Create a detector over the feedback database at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            use_llm: true,
            llm_timeout: claude_recall_core::llm::DEFAULT_LLM_TIMEOUT,
            store: OnceCell::new(),
            semantic_bin: OnceCell::new(),
            llm_client: OnceCell::new(),
        }
    }

    /// Detector over the project-default feedback database.
    pub fn open_default() -> Self {
        Self::new(claude_recall_core::paths::feedback_db_path())
    }

    /// Enable or disable the LLM fallback strategy.
    pub fn with_llm(mut self, use_llm: bool) -> Self {
        self.use_llm = use_llm;
        self
    }

    /// Set the deadline for one LLM call.
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Disable the external index and LLM strategies entirely, leaving
    /// transcript evidence and learned associations. For sandboxed
    /// environments with no PATH access, and for deterministic tests.
    pub fn offline(self) -> Self {
        let _ = self.semantic_bin.set(None);
        let _ = self.llm_client.set(None);
        self
    }

    /// Resolve a skill id for this tool call, or `None` if it cannot be
    /// attributed. Never fails and never blocks beyond the per-strategy
    /// timeouts.
    pub fn detect(
        &self,
        tool_name: &str,
        tool_input: &Value,
        transcript_path: Option<&Path>,
        session_context: Option<&str>,
    ) -> Option<String> {
        if let Some(path) = transcript_path {
            if let Some(skill) = transcript::latest_skill_read(path) {
                debug!(skill, "detected skill from transcript");
                return Some(skill);
            }
        }

        let context_key = context_key(tool_name, tool_input);
        if let Some(skill) = self.lookup_learned(&context_key) {
            debug!(skill, "detected skill from learned association");
            return Some(skill);
        }

        if let Some(skill) = self.via_semantic_index(tool_name, tool_input) {
            self.learn(&context_key, &skill, CONFIDENCE_SEMANTIC);
            debug!(skill, "detected skill from semantic index");
            return Some(skill);
        }

        if self.use_llm {
            if let Some(skill) = self.via_llm(tool_name, tool_input, session_context) {
                self.learn(&context_key, &skill, CONFIDENCE_LLM);
                debug!(skill, "detected skill from LLM");
                return Some(skill);
            }
        }

        debug!(tool_name, "could not attribute tool call to a skill");
        None
    }

    /// Lazily opened store handle. An unopenable store disables the
    /// learned-association strategy rather than failing detection.
    fn store(&self) -> Option<&FeedbackStore> {
        self.store
            .get_or_init(|| match FeedbackStore::new(&self.db_path) {
                Ok(store) => Some(store),
                Err(e) => {
                    debug!(error = %e, "feedback store unavailable for detection");
                    None
                }
            })
            .as_ref()
    }

    fn lookup_learned(&self, context_key: &str) -> Option<String> {
        match self.store()?.get_learned_association(context_key) {
            Ok(skill) => skill,
            Err(e) => {
                debug!(error = %e, "association lookup failed");
                None
            }
        }
    }

    /// Best-effort write-back; a failing store never fails detection.
    fn learn(&self, context_key: &str, skill_id: &str, confidence: f64) {
        if let Some(store) = self.store() {
            if let Err(e) = store.learn_association(context_key, skill_id, confidence) {
                debug!(error = %e, "failed to learn association");
            }
        }
    }

    /// Availability probe for the semantic index, once per instance.
    fn semantic_binary(&self) -> Option<&Path> {
        self.semantic_bin
            .get_or_init(|| proc::find_in_path(SEMANTIC_INDEX_BIN))
            .as_deref()
    }

    /// Query the semantic skill index for a top-1 match above the score
    /// threshold.
    fn via_semantic_index(&self, tool_name: &str, tool_input: &Value) -> Option<String> {
        let bin = self.semantic_binary()?;
        let query = tool_context_to_query(tool_name, tool_input);

        let mut cmd = Command::new(bin);
        cmd.arg(&query).args(["-k", "1", "--json"]);
        let output = proc::run_with_timeout(&mut cmd, SEMANTIC_TIMEOUT, None)?;
        if !output.status.success() {
            return None;
        }

        let results: Vec<Value> = serde_json::from_slice(&output.stdout).ok()?;
        let top = results.first()?;
        let score = top.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        if score <= SEMANTIC_SCORE_THRESHOLD {
            debug!(score, "semantic match below threshold");
            return None;
        }
        top.get("skill_id")
            .or_else(|| top.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Availability probe for an LLM CLI, once per instance.
    fn llm(&self) -> Option<&LlmClient> {
        self.llm_client.get_or_init(LlmClient::discover).as_ref()
    }

    fn via_llm(
        &self,
        tool_name: &str,
        tool_input: &Value,
        session_context: Option<&str>,
    ) -> Option<String> {
        let client = self.llm()?;
        let prompt = build_detection_prompt(tool_name, tool_input, session_context);
        let response = client.prompt(&prompt, self.llm_timeout)?;
        parse_skill_from_response(&response)
    }
}

/// Coarse fingerprint of a tool invocation, used to key learned
/// associations: `tool_name|file_extension|first_50_chars_of_command`.
pub fn context_key(tool_name: &str, tool_input: &Value) -> String {
    let ext = tool_input
        .get("file_path")
        .and_then(Value::as_str)
        .and_then(|fp| Path::new(fp).extension())
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let command: String = tool_input
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .take(50)
        .collect();

    format!("{tool_name}|{ext}|{command}")
}

/// Convert tool execution context into a natural-language index query.
fn tool_context_to_query(tool_name: &str, tool_input: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    // File extension gives a strong signal
    if let Some(ext) = tool_input
        .get("file_path")
        .and_then(Value::as_str)
        .and_then(|fp| Path::new(fp).extension())
    {
        parts.push(format!("working with .{} files", ext.to_string_lossy()));
    }

    if let Some(command) = tool_input.get("command").and_then(Value::as_str) {
        let lower = command.to_lowercase();
        if lower.contains("python") {
            parts.push("python script".to_string());
        }
        if lower.contains("git") {
            parts.push("git operations".to_string());
        }
        if lower.contains("npm") || lower.contains("node") {
            parts.push("node.js".to_string());
        }
        for lib in COMMAND_LIBRARIES {
            if lower.contains(lib) {
                parts.push(format!("using {lib}"));
            }
        }
    }

    let description = match tool_name {
        "Write" => Some("creating or writing files"),
        "Edit" => Some("editing existing files"),
        "Bash" => Some("running commands"),
        "Read" => Some("reading file contents"),
        "Glob" => Some("finding files"),
        "Grep" => Some("searching code"),
        _ => None,
    };
    if let Some(description) = description {
        parts.push(description.to_string());
    }

    if parts.is_empty() {
        format!("using {tool_name} tool")
    } else {
        parts.join(" ")
    }
}

/// Build the bounded LLM detection prompt.
fn build_detection_prompt(
    tool_name: &str,
    tool_input: &Value,
    session_context: Option<&str>,
) -> String {
    let mut input_str = serde_json::to_string_pretty(tool_input).unwrap_or_default();
    if input_str.chars().count() > MAX_PROMPT_INPUT_CHARS {
        input_str = input_str.chars().take(MAX_PROMPT_INPUT_CHARS).collect();
        input_str.push_str("...");
    }

    let context_part = session_context
        .map(|ctx| {
            let bounded: String = ctx.chars().take(MAX_PROMPT_CONTEXT_CHARS).collect();
            format!("\nSession context: {bounded}")
        })
        .unwrap_or_default();

    format!(
        "Given this Claude Code tool execution, identify which skill is likely being used.\n\
         \n\
         Tool: {tool_name}\n\
         Input: {input_str}{context_part}\n\
         \n\
         Common Claude Skills include:\n\
         - session-brain: session memory and context recall\n\
         - curriculum-planner: planning and task organization\n\
         - skill-factory: creating new skills\n\
         - skill-retrieval: finding relevant skills\n\
         - skill-refinement: feedback and improvement\n\
         \n\
         Return ONLY the skill ID (e.g., \"session-brain\") or \"unknown\" if uncertain.\n\
         Do not explain, just return the skill ID."
    )
}

/// Extract a skill id from a single-line LLM response. Accepts only
/// short slug-shaped tokens; "unknown" and anything prose-like is no
/// answer.
fn parse_skill_from_response(response: &str) -> Option<String> {
    let mut cleaned = response.trim().to_lowercase();
    if cleaned.is_empty() || cleaned == "unknown" {
        return None;
    }

    cleaned = cleaned.replace(['"', '\''], "");
    if let Some(rest) = cleaned.strip_prefix("skill:") {
        cleaned = rest.trim().to_string();
    }

    let plausible = !cleaned.is_empty()
        && cleaned.chars().count() < MAX_SKILL_ID_CHARS
        && cleaned.chars().all(|c| c.is_alphanumeric() || c == '-');
    plausible.then_some(cleaned)
}
