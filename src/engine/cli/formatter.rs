//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::Colorize;

use crate::engine::updater::job::{CycleOutcome, VersionStatus};
use crate::engine::updater::state::UpdatePhase;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print one version's status block
    pub fn version_status(status: &VersionStatus) {
        Self::header(&format!("Compatibility version {}", status.version_id));
        let state = &status.state;
        let content = if state.has_content() {
            state.content_version.to_string()
        } else {
            "(none)".to_string()
        };
        Self::kv("Content version", &content);
        Self::kv("Content hash", state.content_hash.as_deref().unwrap_or("(none)"));
        Self::kv("Last success", &format_timestamp(state.last_success_timestamp));
        Self::kv("Last attempt", &format_timestamp(state.last_attempt_timestamp));
        Self::kv("Failures", &state.failure_count.to_string());
        Self::kv("Phase", phase_label(status.phase));
        let next_due = if status.next_due <= 0 {
            "now".to_string()
        } else {
            format_timestamp(status.next_due)
        };
        Self::kv("Next due", &next_due);
        if status.stale {
            Self::warning("Committed log list is stale");
        }
    }

    /// Print the result of one update cycle
    pub fn outcome(version_id: &str, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Skipped { next_due } => {
                Self::info(&format!("{}: not due until {}", version_id, format_timestamp(*next_due)))
            }
            CycleOutcome::Installed { content_version } => {
                Self::success(&format!("{}: installed log list version {}", version_id, content_version))
            }
            CycleOutcome::StaleDuplicate { declared_version, stored_version } => Self::info(&format!(
                "{}: fetched version {} is not newer than {}",
                version_id, declared_version, stored_version
            )),
            CycleOutcome::Failed { kind, failure_count, reason } => Self::error(&format!(
                "{}: {} failure #{}: {}",
                version_id,
                kind.as_str(),
                failure_count,
                reason
            )),
            CycleOutcome::Discarded => {
                Self::warning(&format!("{}: result discarded after cancellation", version_id))
            }
        }
    }
}

fn phase_label(phase: UpdatePhase) -> &'static str {
    match phase {
        UpdatePhase::Idle => "idle",
        UpdatePhase::Fetching => "fetching",
        UpdatePhase::Committing => "committing",
        UpdatePhase::BackingOff => "backing off",
    }
}

fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
