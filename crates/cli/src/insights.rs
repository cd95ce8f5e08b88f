// crates/cli/src/insights.rs
//! Feedback insights: per-skill and per-tool statistics plus simple
//! improvement recommendations, rendered as text or JSON.

use anyhow::Result;
use claude_recall_db::{FeedbackStore, UsageStats};
use serde_json::json;

/// Below this success rate a skill gets a review recommendation.
const LOW_SUCCESS_RATE: f64 = 0.7;
/// An error repeated more than this often is flagged as recurring.
const RECURRING_ERROR_THRESHOLD: i64 = 2;
/// Fewer total uses than this hints at a discoverability problem.
const LOW_USAGE_THRESHOLD: i64 = 3;
/// Error text preview length in listings.
const ERROR_PREVIEW_CHARS: usize = 60;
/// Tool table and recommendation list caps.
const MAX_TOOL_ROWS: usize = 10;
const MAX_RECOMMENDATIONS: usize = 5;

fn preview(error: &str, max: usize) -> String {
    error.chars().take(max).collect()
}

fn format_rate(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// Improvement suggestions for one skill, derived from its stats and its
/// most common errors.
fn skill_recommendations(
    store: &FeedbackStore,
    skill_id: &str,
    stats: &UsageStats,
) -> Result<Vec<String>> {
    let mut recommendations = Vec::new();

    if stats.success_rate < LOW_SUCCESS_RATE {
        recommendations.push(format!(
            "Low success rate ({:.0}%). Review common errors and update SKILL.md with better guidance.",
            stats.success_rate * 100.0
        ));
    }

    let errors = store.get_common_errors(Some(skill_id), 3)?;
    if let Some(top) = errors.first() {
        if top.count > RECURRING_ERROR_THRESHOLD {
            recommendations.push(format!(
                "Recurring error ({}x): {}...",
                top.count,
                preview(&top.error, ERROR_PREVIEW_CHARS)
            ));
        }
    }

    if stats.total < LOW_USAGE_THRESHOLD {
        recommendations
            .push("Low usage - consider adding more trigger phrases to SKILL.md".to_string());
    }

    Ok(recommendations)
}

/// Run the insights command against an open store.
pub fn run(
    store: &FeedbackStore,
    skill: Option<&str>,
    show_errors: bool,
    json_output: bool,
) -> Result<()> {
    let counts = store.get_total_counts()?;
    if counts.total_executions == 0 {
        println!("No feedback data yet.");
        println!("Use Claude Code with skills, then check back!");
        return Ok(());
    }

    match skill {
        Some(skill) => single_skill(store, skill, show_errors, json_output),
        None => overview(store, show_errors, json_output),
    }
}

fn single_skill(
    store: &FeedbackStore,
    skill: &str,
    show_errors: bool,
    json_output: bool,
) -> Result<()> {
    let stats = store.get_skill_stats(Some(skill))?;
    let Some(s) = stats.get(skill) else {
        println!("No data for skill: {skill}");
        return Ok(());
    };

    let recommendations = skill_recommendations(store, skill, s)?;

    if json_output {
        let errors = if show_errors {
            store.get_common_errors(Some(skill), 5)?
        } else {
            Vec::new()
        };
        let output = json!({
            "skill": skill,
            "stats": s,
            "errors": errors,
            "recommendations": recommendations,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\nSkill: {skill}");
    println!("  Total uses: {}", s.total);
    println!("  Success rate: {}", format_rate(s.success_rate));
    println!("  Failed: {}", s.failed);

    if show_errors {
        let errors = store.get_common_errors(Some(skill), 5)?;
        if !errors.is_empty() {
            println!("\n  Common errors:");
            for e in &errors {
                println!("    ({}x) {}...", e.count, preview(&e.error, ERROR_PREVIEW_CHARS));
            }
        }
    }

    if !recommendations.is_empty() {
        println!("\n  Recommendations:");
        for rec in &recommendations {
            println!("    - {rec}");
        }
    }
    Ok(())
}

fn overview(store: &FeedbackStore, show_errors: bool, json_output: bool) -> Result<()> {
    let counts = store.get_total_counts()?;
    let skill_stats = store.get_skill_stats(None)?;
    let tool_stats = store.get_tool_usage_stats()?;

    if json_output {
        let mut recommendations = Vec::new();
        for (skill_id, s) in &skill_stats {
            let recs = skill_recommendations(store, skill_id, s)?;
            if !recs.is_empty() {
                recommendations.push(json!({
                    "skill": skill_id,
                    "recommendations": recs,
                }));
            }
        }
        let output = json!({
            "summary": counts,
            "skills": skill_stats,
            "tools": tool_stats,
            "recommendations": recommendations,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\nFeedback Insights");
    println!("{}", "=".repeat(50));
    println!(
        "\nSummary: {} tool calls across {} sessions",
        counts.total_executions, counts.total_sessions
    );
    println!("Skills detected: {}", counts.total_skills);

    // Busiest first
    let mut by_usage: Vec<(&String, &UsageStats)> = skill_stats.iter().collect();
    by_usage.sort_by(|a, b| b.1.total.cmp(&a.1.total));

    if !by_usage.is_empty() {
        println!("\nSkill Performance");
        println!("{}", "-".repeat(50));
        println!("{:<25} {:>8} {:>10} {:>8}", "Skill", "Uses", "Success", "Failed");
        println!("{}", "-".repeat(50));
        for (skill_id, s) in &by_usage {
            println!(
                "{:<25} {:>8} {:>10} {:>8}",
                skill_id,
                s.total,
                format_rate(s.success_rate),
                s.failed
            );
        }
    }

    if !tool_stats.is_empty() {
        let mut tools: Vec<(&String, &UsageStats)> = tool_stats.iter().collect();
        tools.sort_by(|a, b| b.1.total.cmp(&a.1.total));

        println!("\nTool Usage");
        println!("{}", "-".repeat(50));
        println!("{:<20} {:>8} {:>10} {:>8}", "Tool", "Uses", "Success", "Failed");
        println!("{}", "-".repeat(50));
        for (tool_name, s) in tools.iter().take(MAX_TOOL_ROWS) {
            println!(
                "{:<20} {:>8} {:>10} {:>8}",
                tool_name,
                s.total,
                format_rate(s.success_rate),
                s.failed
            );
        }
    }

    if show_errors {
        let errors = store.get_common_errors(None, 5)?;
        if !errors.is_empty() {
            println!("\nTop Errors");
            println!("{}", "-".repeat(50));
            for e in &errors {
                let skill_info = e
                    .skill
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default();
                println!(
                    "  ({}x) [{}{}] {}...",
                    e.count,
                    e.tool,
                    skill_info,
                    preview(&e.error, 50)
                );
            }
        }
    }

    let mut all_recommendations: Vec<(String, String)> = Vec::new();
    for (skill_id, s) in &skill_stats {
        for rec in skill_recommendations(store, skill_id, s)? {
            all_recommendations.push((skill_id.clone(), rec));
        }
    }
    if !all_recommendations.is_empty() {
        println!("\nRecommendations");
        println!("{}", "-".repeat(50));
        for (skill_id, rec) in all_recommendations.iter().take(MAX_RECOMMENDATIONS) {
            println!("  [{skill_id}] {rec}");
        }
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claude_recall_db::ToolExecution;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store_with_executions(specs: &[(&str, Option<&str>, bool, Option<&str>)]) -> (tempfile::TempDir, FeedbackStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(tmp.path().join("feedback.db")).unwrap();
        for (tool, skill, success, error) in specs {
            store
                .log_tool_execution(&ToolExecution {
                    session_id: "s1".into(),
                    tool_name: tool.to_string(),
                    tool_input: json!({}),
                    tool_response: None,
                    success: *success,
                    error_message: error.map(str::to_string),
                    duration_ms: None,
                    skill_used: skill.map(str::to_string),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
                .unwrap();
        }
        (tmp, store)
    }

    #[test]
    fn test_recommendations_low_success_and_recurring_error() {
        let failure = ("Write", Some("docx"), false, Some("conversion failed"));
        let (_tmp, store) = store_with_executions(&[
            failure,
            failure,
            failure,
            ("Write", Some("docx"), true, None),
        ]);

        let stats = store.get_skill_stats(Some("docx")).unwrap();
        let recs = skill_recommendations(&store, "docx", stats.get("docx").unwrap()).unwrap();

        assert!(recs.iter().any(|r| r.starts_with("Low success rate")));
        assert!(recs.iter().any(|r| r.contains("Recurring error (3x)")));
    }

    #[test]
    fn test_recommendations_low_usage() {
        let (_tmp, store) = store_with_executions(&[("Write", Some("pdf"), true, None)]);

        let stats = store.get_skill_stats(Some("pdf")).unwrap();
        let recs = skill_recommendations(&store, "pdf", stats.get("pdf").unwrap()).unwrap();
        assert_eq!(
            recs,
            vec!["Low usage - consider adding more trigger phrases to SKILL.md"]
        );
    }

    #[test]
    fn test_recommendations_healthy_skill() {
        let specs: Vec<_> = (0..5).map(|_| ("Write", Some("docx"), true, None)).collect();
        let (_tmp, store) = store_with_executions(&specs);

        let stats = store.get_skill_stats(Some("docx")).unwrap();
        let recs = skill_recommendations(&store, "docx", stats.get("docx").unwrap()).unwrap();
        assert!(recs.is_empty());
    }

    #[test]
    fn test_preview_bounds() {
        assert_eq!(preview("short", 60), "short");
        assert_eq!(preview(&"x".repeat(100), 60).chars().count(), 60);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(5.0 / 7.0), "71.4%");
        assert_eq!(format_rate(1.0), "100.0%");
    }
}
