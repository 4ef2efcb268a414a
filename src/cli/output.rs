//! CLI output: error mapping and human-readable formatting.

use crate::error::PipelineError;
use crate::pipeline::state::{RunStatus, StepStatus};
use crate::store::RunRecord;
use crate::telemetry::{EventLevel, RecordedEvent, RunEvent};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &PipelineError) -> String {
    match e {
        PipelineError::RunNotFound(run_id) => format!("No run with id {}", run_id),
        PipelineError::CheckpointMissing(run_id) => {
            format!("Run {} has no checkpoint and was marked failed", run_id)
        }
        other => other.to_string(),
    }
}

pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Done => status.as_str().green().to_string(),
        RunStatus::Failed => status.as_str().red().to_string(),
        RunStatus::Stopped => status.as_str().yellow().to_string(),
        RunStatus::Creating | RunStatus::Running => status.as_str().cyan().to_string(),
    }
}

pub fn format_run_list_text(records: &[RunRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Runs")));
    if records.is_empty() {
        out.push_str("No runs recorded.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Run", "Title", "Status", "Phase", "Steps", "Created"]);
    for record in records {
        let done = record
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Done)
            .count();
        table.add_row(vec![
            record.run_id.to_string(),
            record.title.clone(),
            status_label(record.status),
            record.phase.to_string(),
            format!("{}/{}", done, record.steps.len()),
            record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    out.push_str(&format!("{}\n", table));
    out
}

pub fn format_run_status_text(record: &RunRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Run {}", record.run_id))
    ));
    out.push_str(&format!("  Title: {}\n", record.title));
    out.push_str(&format!("  Status: {}\n", status_label(record.status)));
    out.push_str(&format!("  Phase: {}\n", record.phase));
    out.push_str(&format!("  Retries: {}\n", record.retry_count));
    if record.completed_with_warnings {
        out.push_str(&format!("  {}\n", "Finished with warnings".yellow()));
    }
    if let Some(error) = &record.error {
        out.push_str(&format!("  Error: {}\n", error.red()));
    }
    out.push_str(&format!(
        "  Updated: {}\n\n",
        record.updated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if !record.steps.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Step", "Name", "Status"]);
        for step in &record.steps {
            table.add_row(vec![
                step.id.to_string(),
                step.name.clone(),
                step.status.as_str().to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }
    out
}

pub fn format_events_text(events: &[RecordedEvent]) -> String {
    if events.is_empty() {
        return "No events recorded.".to_string();
    }
    events
        .iter()
        .map(|recorded| format!("{:>5} {}", recorded.seq, format_event_line(&recorded.event)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line rendering used for both recorded and live events.
pub fn format_event_line(event: &RunEvent) -> String {
    let level = match event.level {
        EventLevel::Info => event.level.as_str().blue().to_string(),
        EventLevel::Warning => event.level.as_str().yellow().to_string(),
        EventLevel::Error => event.level.as_str().red().to_string(),
    };
    match &event.agent {
        Some(agent) => format!(
            "{} {} [{}] {}: {}",
            event.ts.dimmed(),
            level,
            event.kind,
            agent,
            event.message
        ),
        None => format!(
            "{} {} [{}] {}",
            event.ts.dimmed(),
            level,
            event.kind,
            event.message
        ),
    }
}
