//! Event bus for live observation of a run.
//!
//! The state store and orchestrator publish every committed change here so a
//! presentation layer can subscribe instead of polling snapshots.

use crate::state::{AgentId, AgentRole, AgentStatus};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Unique identifier for an event
pub type EventId = String;

/// How a run ended, as reported on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed { reason: String },
}

/// Run and agent lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A run passed validation and reset the store
    RunStarted {
        event_id: EventId,
        timestamp: u64,
        run_id: String,
        topic: String,
    },
    /// An agent moved through its state machine
    StatusChanged {
        event_id: EventId,
        timestamp: u64,
        agent_id: AgentId,
        role: AgentRole,
        from: AgentStatus,
        to: AgentStatus,
    },
    /// A fragment was appended to an agent's output
    OutputAppended {
        event_id: EventId,
        timestamp: u64,
        agent_id: AgentId,
        fragment: String,
    },
    /// An unused agent's output was replaced by a placeholder
    OutputReset {
        event_id: EventId,
        timestamp: u64,
        agent_id: AgentId,
        output: String,
    },
    /// Grounding sources were attached to an agent
    SourcesSet {
        event_id: EventId,
        timestamp: u64,
        agent_id: AgentId,
        count: usize,
    },
    /// The run reached a final report or a terminal error
    RunFinished {
        event_id: EventId,
        timestamp: u64,
        run_id: String,
        outcome: RunOutcome,
    },
}

impl PipelineEvent {
    pub fn event_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { event_id, .. }
            | PipelineEvent::StatusChanged { event_id, .. }
            | PipelineEvent::OutputAppended { event_id, .. }
            | PipelineEvent::OutputReset { event_id, .. }
            | PipelineEvent::SourcesSet { event_id, .. }
            | PipelineEvent::RunFinished { event_id, .. } => event_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PipelineEvent::RunStarted { timestamp, .. }
            | PipelineEvent::StatusChanged { timestamp, .. }
            | PipelineEvent::OutputAppended { timestamp, .. }
            | PipelineEvent::OutputReset { timestamp, .. }
            | PipelineEvent::SourcesSet { timestamp, .. }
            | PipelineEvent::RunFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Agent the event concerns, if any.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::StatusChanged { agent_id, .. }
            | PipelineEvent::OutputAppended { agent_id, .. }
            | PipelineEvent::OutputReset { agent_id, .. }
            | PipelineEvent::SourcesSet { agent_id, .. } => Some(agent_id),
            PipelineEvent::RunStarted { .. } | PipelineEvent::RunFinished { .. } => None,
        }
    }
}

/// Sending half of the event bus
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit_run_started(&self, run_id: String, topic: String) {
        self.send(PipelineEvent::RunStarted {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            run_id,
            topic,
        });
    }

    pub fn emit_status(
        &self,
        agent_id: AgentId,
        role: AgentRole,
        from: AgentStatus,
        to: AgentStatus,
    ) {
        self.send(PipelineEvent::StatusChanged {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            agent_id,
            role,
            from,
            to,
        });
    }

    pub fn emit_output(&self, agent_id: AgentId, fragment: String) {
        self.send(PipelineEvent::OutputAppended {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            agent_id,
            fragment,
        });
    }

    pub fn emit_output_reset(&self, agent_id: AgentId, output: String) {
        self.send(PipelineEvent::OutputReset {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            agent_id,
            output,
        });
    }

    pub fn emit_sources(&self, agent_id: AgentId, count: usize) {
        self.send(PipelineEvent::SourcesSet {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            agent_id,
            count,
        });
    }

    pub fn emit_run_finished(&self, run_id: String, outcome: RunOutcome) {
        self.send(PipelineEvent::RunFinished {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            run_id,
            outcome,
        });
    }

    fn send(&self, event: PipelineEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(error = %e, "Failed to emit pipeline event");
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new().0
    }
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

/// Current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
