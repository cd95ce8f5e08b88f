// crates/db/tests/store_integration.rs
//! End-to-end feedback flow: log executions across sessions, learn
//! associations through detection, summarize, and query the aggregates —
//! the same sequence the hook binaries drive in production.

use claude_recall_db::{
    FeedbackStore, SessionSummary, SkillDetector, ToolExecution, ToolResponse,
};
use serde_json::json;
use std::io::Write;

fn execution(session: &str, tool: &str, skill: Option<&str>, success: bool) -> ToolExecution {
    ToolExecution {
        session_id: session.to_string(),
        tool_name: tool.to_string(),
        tool_input: json!({"file_path": "notes.docx"}),
        tool_response: Some(ToolResponse::Structured(json!({"ok": success}))),
        success,
        error_message: (!success).then(|| "conversion failed".to_string()),
        duration_ms: Some(100),
        skill_used: skill.map(str::to_string),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[test]
fn feedback_flow_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("feedback.db");
    let store = FeedbackStore::new(&db_path).unwrap();

    // Two sessions' worth of executions
    for i in 0..5 {
        store
            .log_tool_execution(&execution("s1", "Write", Some("docx"), i != 0))
            .unwrap();
    }
    store
        .log_tool_execution(&execution("s2", "Bash", Some("pdf"), true))
        .unwrap();

    // A second store handle over the same file sees everything (each
    // operation is its own connection, as with concurrent hook processes)
    let other = FeedbackStore::new(&db_path).unwrap();
    let stats = other.get_skill_stats(None).unwrap();
    assert_eq!(stats.get("docx").unwrap().total, 5);
    assert_eq!(stats.get("docx").unwrap().failed, 1);
    assert_eq!(stats.get("pdf").unwrap().total, 1);

    let errors = other.get_common_errors(Some("docx"), 5).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error, "conversion failed");

    // Session summary written from the aggregated executions
    let executions = store.get_session_executions("s1").unwrap();
    assert_eq!(executions.len(), 5);
    let failed = executions.iter().filter(|e| !e.success).count() as i64;
    store
        .log_session_summary(&SessionSummary {
            session_id: "s1".into(),
            prompt: "convert the report".into(),
            tools_used: vec!["Write".into()],
            skills_detected: vec!["docx".into()],
            total_tool_calls: executions.len() as i64,
            successful_calls: executions.len() as i64 - failed,
            failed_calls: failed,
            task_completed: failed == 0,
            completion_feedback: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
        .unwrap();

    let sessions = store.get_recent_sessions(10).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].failed_calls, 1);
    assert!(!sessions[0].task_completed);
}

#[test]
fn detection_learns_and_reuses_associations() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("feedback.db");
    let store = FeedbackStore::new(&db_path).unwrap();

    // Simulate what the index strategy would have written back
    store
        .learn_association("Write|.docx|", "docx", 0.8)
        .unwrap();

    let detector = SkillDetector::new(&db_path).with_llm(false).offline();
    let skill = detector.detect("Write", &json!({"file_path": "notes.docx"}), None, None);
    assert_eq!(skill, Some("docx".to_string()));

    // Reinforce: running mean of 0.8 and 0.6
    store
        .learn_association("Write|.docx|", "docx", 0.6)
        .unwrap();
    let record = store
        .get_association_record("Write|.docx|")
        .unwrap()
        .unwrap();
    assert_eq!(record.hit_count, 2);
    assert!((record.confidence - 0.7).abs() < 1e-9);
}

#[test]
fn transcript_evidence_outranks_learned_association() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("feedback.db");
    let store = FeedbackStore::new(&db_path).unwrap();
    store
        .learn_association("Write|.docx|", "docx", 1.0)
        .unwrap();

    let mut transcript = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        transcript,
        r#"{{"tool_name":"Read","tool_input":{{"file_path":"/mnt/skills/session-brain/SKILL.md"}}}}"#
    )
    .unwrap();

    let detector = SkillDetector::new(&db_path).with_llm(false).offline();
    let skill = detector.detect(
        "Write",
        &json!({"file_path": "notes.docx"}),
        Some(transcript.path()),
        None,
    );
    assert_eq!(skill, Some("session-brain".to_string()));
}

#[test]
fn reset_wipes_all_tables() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FeedbackStore::new(tmp.path().join("feedback.db")).unwrap();

    store
        .log_tool_execution(&execution("s1", "Write", Some("docx"), true))
        .unwrap();
    store.learn_association("k", "v", 1.0).unwrap();

    store.reset().unwrap();

    let totals = store.get_total_counts().unwrap();
    assert_eq!(totals.total_executions, 0);
    assert_eq!(totals.total_sessions, 0);
    assert_eq!(totals.total_skills, 0);
    assert!(store.get_all_learned_associations().unwrap().is_empty());
    assert!(store.get_recent_sessions(5).unwrap().is_empty());
}
