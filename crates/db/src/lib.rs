// crates/db/src/lib.rs
//! SQLite-backed feedback store for skill refinement.
//!
//! Durable record of tool executions, session summaries, and learned
//! context→skill associations, plus the aggregate queries the insights
//! command runs over them.
//!
//! Concurrency model: hook invocations are independent short-lived
//! processes, so every logical operation opens a connection, does its
//! work in one implicit transaction, and closes. SQLite serializes the
//! writers; no application-level locking exists or is needed. Storage
//! errors propagate to the caller — losing feedback data silently would
//! hide a real problem — and the hook layer decides to log-and-continue.

pub mod detector;

pub use detector::SkillDetector;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Tool response as delivered by the host: either a structured object or
/// an opaque text blob. The distinction matters downstream — error
/// classification reads structured fields but can only substring-scan
/// opaque text — so it is preserved through storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolResponse {
    Structured(Value),
    Opaque(String),
}

impl ToolResponse {
    /// Classify a raw hook-input value: JSON strings become opaque text,
    /// everything else stays structured.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => ToolResponse::Opaque(text),
            other => ToolResponse::Structured(other),
        }
    }
}

/// Record of a single tool execution. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub session_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_response: Option<ToolResponse>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub skill_used: Option<String>,
    pub timestamp: String,
}

/// Summary of one Claude Code session. Upserted with replace semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub prompt: String,
    pub tools_used: Vec<String>,
    pub skills_detected: Vec<String>,
    pub total_tool_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub task_completed: bool,
    pub completion_feedback: Option<String>,
    pub timestamp: String,
}

/// A learned context→skill association with reinforcement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedAssociation {
    pub context_key: String,
    pub skill_id: String,
    pub confidence: f64,
    pub hit_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Aggregate execution counts for one skill or tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub success_rate: f64,
}

impl UsageStats {
    fn new(total: i64, successful: i64) -> Self {
        Self {
            total,
            successful,
            failed: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// One distinct error message and how often it occurred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonError {
    pub error: String,
    pub count: i64,
    pub tool: String,
    pub skill: Option<String>,
}

/// Quick totals across the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total_executions: i64,
    pub total_sessions: i64,
    pub total_skills: i64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tool_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    tool_input TEXT,
    tool_response TEXT,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    duration_ms INTEGER,
    skill_used TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_summaries (
    session_id TEXT PRIMARY KEY,
    prompt TEXT,
    tools_used TEXT,
    skills_detected TEXT,
    total_tool_calls INTEGER,
    successful_calls INTEGER,
    failed_calls INTEGER,
    task_completed BOOLEAN,
    completion_feedback TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS learned_associations (
    context_key TEXT PRIMARY KEY,
    skill_id TEXT NOT NULL,
    confidence REAL DEFAULT 1.0,
    hit_count INTEGER DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tool_executions_skill ON tool_executions(skill_used);
CREATE INDEX IF NOT EXISTS idx_tool_executions_session ON tool_executions(session_id);
CREATE INDEX IF NOT EXISTS idx_tool_executions_tool ON tool_executions(tool_name);
CREATE INDEX IF NOT EXISTS idx_tool_executions_success ON tool_executions(success);
";

/// SQLite-backed feedback storage.
///
/// Default location: `<project>/.claude/recall/feedback.db`.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    db_path: PathBuf,
}

impl FeedbackStore {
    /// Open (or create) the store at the given path and initialize the
    /// schema.
    pub fn new(db_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let store = Self { db_path };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %store.db_path.display(), "initialized feedback database");
        Ok(store)
    }

    /// Open the store at the project-default location.
    pub fn open_default() -> StoreResult<Self> {
        Self::new(claude_recall_core::paths::feedback_db_path())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// One connection per logical operation. The busy timeout covers
    /// concurrent hook processes hitting the same file.
    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Append a tool execution. Returns the inserted row id.
    pub fn log_tool_execution(&self, execution: &ToolExecution) -> StoreResult<i64> {
        let response_json = execution
            .tool_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO tool_executions
             (session_id, tool_name, tool_input, tool_response, success,
              error_message, duration_ms, skill_used, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                execution.session_id,
                execution.tool_name,
                execution.tool_input.to_string(),
                response_json,
                execution.success,
                execution.error_message,
                execution.duration_ms,
                execution.skill_used,
                execution.timestamp,
            ],
        )?;
        let row_id = conn.last_insert_rowid();
        debug!(
            tool = %execution.tool_name,
            skill = execution.skill_used.as_deref().unwrap_or("-"),
            success = execution.success,
            "logged tool execution"
        );
        Ok(row_id)
    }

    /// Insert or replace a session summary.
    pub fn log_session_summary(&self, summary: &SessionSummary) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_summaries
             (session_id, prompt, tools_used, skills_detected, total_tool_calls,
              successful_calls, failed_calls, task_completed, completion_feedback, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                summary.session_id,
                summary.prompt,
                serde_json::to_string(&summary.tools_used)?,
                serde_json::to_string(&summary.skills_detected)?,
                summary.total_tool_calls,
                summary.successful_calls,
                summary.failed_calls,
                summary.task_completed,
                summary.completion_feedback,
                summary.timestamp,
            ],
        )?;
        debug!(session = %summary.session_id, "logged session summary");
        Ok(())
    }

    /// All executions for a session, oldest first.
    pub fn get_session_executions(&self, session_id: &str) -> StoreResult<Vec<ToolExecution>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, tool_name, tool_input, tool_response, success,
                    error_message, duration_ms, skill_used, timestamp
             FROM tool_executions WHERE session_id = ?1
             ORDER BY timestamp, id",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut executions = Vec::new();
        for row in rows {
            let (
                session_id,
                tool_name,
                tool_input,
                tool_response,
                success,
                error_message,
                duration_ms,
                skill_used,
                timestamp,
            ) = row?;
            executions.push(ToolExecution {
                session_id,
                tool_name,
                tool_input: tool_input
                    .and_then(|text| serde_json::from_str(&text).ok())
                    .unwrap_or_else(|| Value::Object(Default::default())),
                tool_response: tool_response.and_then(|text| serde_json::from_str(&text).ok()),
                success,
                error_message,
                duration_ms,
                skill_used,
                timestamp,
            });
        }
        Ok(executions)
    }

    /// Execution stats grouped by skill, optionally restricted to one.
    pub fn get_skill_stats(
        &self,
        skill_id: Option<&str>,
    ) -> StoreResult<BTreeMap<String, UsageStats>> {
        let conn = self.connect()?;

        let mut stmt = match skill_id {
            Some(_) => conn.prepare(
                "SELECT skill_used, COUNT(*),
                        SUM(CASE WHEN success THEN 1 ELSE 0 END)
                 FROM tool_executions
                 WHERE skill_used = ?1
                 GROUP BY skill_used",
            )?,
            None => conn.prepare(
                "SELECT skill_used, COUNT(*),
                        SUM(CASE WHEN success THEN 1 ELSE 0 END)
                 FROM tool_executions
                 WHERE skill_used IS NOT NULL
                 GROUP BY skill_used",
            )?,
        };

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        };
        let rows = match skill_id {
            Some(skill) => stmt.query_map(params![skill], map_row)?,
            None => stmt.query_map([], map_row)?,
        };

        let mut stats = BTreeMap::new();
        for row in rows {
            let (skill, total, successful) = row?;
            stats.insert(skill, UsageStats::new(total, successful));
        }
        Ok(stats)
    }

    /// Execution stats grouped by tool name.
    pub fn get_tool_usage_stats(&self) -> StoreResult<BTreeMap<String, UsageStats>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT tool_name, COUNT(*),
                    SUM(CASE WHEN success THEN 1 ELSE 0 END)
             FROM tool_executions
             GROUP BY tool_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (tool, total, successful) = row?;
            stats.insert(tool, UsageStats::new(total, successful));
        }
        Ok(stats)
    }

    /// Most frequent distinct error messages, optionally restricted to a
    /// skill. Grouping is by raw error text.
    pub fn get_common_errors(
        &self,
        skill_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<CommonError>> {
        let conn = self.connect()?;
        let mut errors = Vec::new();

        if let Some(skill) = skill_id {
            let mut stmt = conn.prepare(
                "SELECT error_message, COUNT(*) as count, tool_name
                 FROM tool_executions
                 WHERE skill_used = ?1 AND NOT success AND error_message IS NOT NULL
                 GROUP BY error_message
                 ORDER BY count DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![skill, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (error, count, tool) = row?;
                errors.push(CommonError {
                    error,
                    count,
                    tool,
                    skill: Some(skill.to_string()),
                });
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT error_message, COUNT(*) as count, tool_name, skill_used
                 FROM tool_executions
                 WHERE NOT success AND error_message IS NOT NULL
                 GROUP BY error_message
                 ORDER BY count DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;
            for row in rows {
                let (error, count, tool, skill) = row?;
                errors.push(CommonError {
                    error,
                    count,
                    tool,
                    skill,
                });
            }
        }
        Ok(errors)
    }

    /// Learn or reinforce a context→skill association.
    ///
    /// On repeat observation of the same key, confidence becomes the
    /// running mean over all observations and the hit count increments.
    pub fn learn_association(
        &self,
        context_key: &str,
        skill_id: &str,
        confidence: f64,
    ) -> StoreResult<()> {
        let conn = self.connect()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO learned_associations
             (context_key, skill_id, confidence, hit_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT(context_key) DO UPDATE SET
                 skill_id = excluded.skill_id,
                 confidence = (confidence * hit_count + excluded.confidence) / (hit_count + 1),
                 hit_count = hit_count + 1,
                 updated_at = excluded.updated_at",
            params![context_key, skill_id, confidence, now],
        )?;
        debug!(context_key, skill_id, "learned association");
        Ok(())
    }

    /// Skill id for an exact context key, if one has been learned.
    pub fn get_learned_association(&self, context_key: &str) -> StoreResult<Option<String>> {
        let conn = self.connect()?;
        let skill = conn
            .query_row(
                "SELECT skill_id FROM learned_associations WHERE context_key = ?1",
                params![context_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(skill)
    }

    /// Full association record including reinforcement state.
    pub fn get_association_record(
        &self,
        context_key: &str,
    ) -> StoreResult<Option<LearnedAssociation>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT context_key, skill_id, confidence, hit_count, created_at, updated_at
                 FROM learned_associations WHERE context_key = ?1",
                params![context_key],
                |row| {
                    Ok(LearnedAssociation {
                        context_key: row.get(0)?,
                        skill_id: row.get(1)?,
                        confidence: row.get(2)?,
                        hit_count: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// All learned associations as context_key → skill_id.
    pub fn get_all_learned_associations(&self) -> StoreResult<BTreeMap<String, String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT context_key, skill_id FROM learned_associations")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut associations = BTreeMap::new();
        for row in rows {
            let (key, skill) = row?;
            associations.insert(key, skill);
        }
        Ok(associations)
    }

    /// Most recent session summaries, newest first.
    pub fn get_recent_sessions(&self, limit: usize) -> StoreResult<Vec<SessionSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, prompt, tools_used, skills_detected, total_tool_calls,
                    successful_calls, failed_calls, task_completed, completion_feedback, timestamp
             FROM session_summaries
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (
                session_id,
                prompt,
                tools_used,
                skills_detected,
                total_tool_calls,
                successful_calls,
                failed_calls,
                task_completed,
                completion_feedback,
                timestamp,
            ) = row?;
            sessions.push(SessionSummary {
                session_id,
                prompt: prompt.unwrap_or_default(),
                tools_used: tools_used
                    .and_then(|text| serde_json::from_str(&text).ok())
                    .unwrap_or_default(),
                skills_detected: skills_detected
                    .and_then(|text| serde_json::from_str(&text).ok())
                    .unwrap_or_default(),
                total_tool_calls,
                successful_calls,
                failed_calls,
                task_completed,
                completion_feedback,
                timestamp,
            });
        }
        Ok(sessions)
    }

    /// Quick totals for the insights overview.
    pub fn get_total_counts(&self) -> StoreResult<Totals> {
        let conn = self.connect()?;
        let total_executions =
            conn.query_row("SELECT COUNT(*) FROM tool_executions", [], |row| row.get(0))?;
        let total_sessions = conn.query_row(
            "SELECT COUNT(DISTINCT session_id) FROM tool_executions",
            [],
            |row| row.get(0),
        )?;
        let total_skills = conn.query_row(
            "SELECT COUNT(DISTINCT skill_used) FROM tool_executions WHERE skill_used IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(Totals {
            total_executions,
            total_sessions,
            total_skills,
        })
    }

    /// Delete all rows in all tables.
    pub fn reset(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "DELETE FROM tool_executions;
             DELETE FROM session_summaries;
             DELETE FROM learned_associations;",
        )?;
        tracing::info!("reset feedback database");
        Ok(())
    }
}
