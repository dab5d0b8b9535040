use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub agent_id: String,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            agent_id: agent_id.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

/// Ordered record of what each agent did during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, agent_id: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(agent_id, message));
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub agent_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                agent_id: event.agent_id.clone(),
                message: event.message.clone(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Run Trace\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. {} -> {}",
                step.index, step.agent_id, step.message
            );
        }
        output
    }
}

/// Write `events` to `<dir>/<run_id>.json`.
pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_steps() {
        let mut collector = TraceCollector::new();
        collector.record("planner", "plan ready with 3 steps");
        collector.record("researcher-1", "done with 2 sources");

        let markdown = collector.summary().render_markdown();

        assert!(markdown.contains("1. planner -> plan ready"));
        assert!(markdown.contains("2. researcher-1"));
    }

    #[test]
    fn empty_summary_renders_placeholder() {
        let summary = TraceSummary::default();
        assert_eq!(summary.render_markdown(), "No trace events recorded.");
    }

    #[test]
    fn persist_writes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let events = vec![TraceEvent::new("planner", "started")];

        let path = persist_trace(dir.path(), "run-42", &events).unwrap();
        assert_eq!(path.file_name().unwrap(), "run-42.json");

        let stored: Vec<TraceEvent> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].agent_id, "planner");
    }
}
