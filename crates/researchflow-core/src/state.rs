//! Authoritative agent lifecycle records for a single run.
//!
//! Every participating agent has one [`AgentState`]. The store serializes all
//! writes behind one lock so per-agent fragment order holds and snapshots are
//! never observed mid-mutation. Committed mutations are mirrored onto the
//! optional [`EventCollector`] for subscribers.

use crate::events::EventCollector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Stable identifier of an agent within a run (`planner`, `researcher-1`, ...).
pub type AgentId = String;

/// Role of an agent; fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Decomposes the topic into research steps
    Planner,
    /// Investigates one research step
    Researcher,
    /// Synthesizes findings into the report
    Writer,
    /// Critiques the final report
    Reviewer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "Planner",
            AgentRole::Researcher => "Researcher",
            AgentRole::Writer => "Writer",
            AgentRole::Reviewer => "Reviewer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status: `Idle -> Working -> {Done, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Done,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        matches!(
            (self, next),
            (AgentStatus::Idle, AgentStatus::Working)
                | (AgentStatus::Working, AgentStatus::Done)
                | (AgentStatus::Working, AgentStatus::Error)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Citation attached to research output. Unique by `uri` within one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

impl GroundingSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

/// Registration entry used when resetting the store for a new run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub id: AgentId,
    pub role: AgentRole,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Observable state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub output: String,
    pub sources: Option<Vec<GroundingSource>>,
}

impl AgentState {
    pub fn new(id: impl Into<AgentId>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
            status: AgentStatus::Idle,
            output: String::new(),
            sources: None,
        }
    }
}

/// Misuse of the store. These indicate orchestration bugs, not generator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("agent '{0}' is not registered")]
    UnknownAgent(AgentId),
    #[error("agent '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },
    #[error("agent '{id}' is {status}; output can only be appended while working")]
    NotWorking { id: AgentId, status: AgentStatus },
    #[error("agent '{id}' is {status}; only idle agents can be marked unused")]
    NotIdle { id: AgentId, status: AgentStatus },
    #[error("sources for agent '{0}' were already set")]
    SourcesAlreadySet(AgentId),
    #[error("agent id '{0}' appears twice in the roster")]
    DuplicateAgent(AgentId),
}

#[derive(Default)]
struct StoreInner {
    order: Vec<AgentId>,
    agents: HashMap<AgentId, AgentState>,
}

impl StoreInner {
    fn agent_mut(&mut self, id: &str) -> Result<&mut AgentState, StateError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownAgent(id.to_string()))
    }
}

/// Keyed collection of agent states shared between the orchestrator and observers.
#[derive(Clone, Default)]
pub struct AgentStateStore {
    inner: Arc<RwLock<StoreInner>>,
    events: Option<EventCollector>,
}

impl AgentStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every committed mutation onto `collector`.
    pub fn with_events(mut self, collector: EventCollector) -> Self {
        self.events = Some(collector);
        self
    }

    /// Discard all prior state and register `roster` as Idle agents.
    pub async fn reset(&self, roster: &[AgentSpec]) -> Result<(), StateError> {
        let mut order = Vec::with_capacity(roster.len());
        let mut agents = HashMap::with_capacity(roster.len());
        for spec in roster {
            if agents
                .insert(spec.id.clone(), AgentState::new(spec.id.clone(), spec.role))
                .is_some()
            {
                return Err(StateError::DuplicateAgent(spec.id.clone()));
            }
            order.push(spec.id.clone());
        }

        let mut inner = self.inner.write().await;
        inner.order = order;
        inner.agents = agents;
        tracing::debug!(agents = inner.order.len(), "agent state store reset");
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: AgentStatus) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        let agent = inner.agent_mut(id)?;
        if !agent.status.can_transition_to(status) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from: agent.status,
                to: status,
            });
        }

        let from = agent.status;
        agent.status = status;
        if let Some(events) = &self.events {
            events.emit_status(agent.id.clone(), agent.role, from, status);
        }
        Ok(())
    }

    /// Concatenate `fragment` to the agent's output. Only valid while Working.
    pub async fn append_output(&self, id: &str, fragment: &str) -> Result<(), StateError> {
        if fragment.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().await;
        let agent = inner.agent_mut(id)?;
        if agent.status != AgentStatus::Working {
            return Err(StateError::NotWorking {
                id: id.to_string(),
                status: agent.status,
            });
        }

        agent.output.push_str(fragment);
        if let Some(events) = &self.events {
            events.emit_output(agent.id.clone(), fragment.to_string());
        }
        Ok(())
    }

    /// Set the agent's source list. May happen once per run.
    pub async fn set_sources(
        &self,
        id: &str,
        sources: Vec<GroundingSource>,
    ) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        let agent = inner.agent_mut(id)?;
        if agent.sources.is_some() {
            return Err(StateError::SourcesAlreadySet(id.to_string()));
        }

        let count = sources.len();
        agent.sources = Some(sources);
        if let Some(events) = &self.events {
            events.emit_sources(agent.id.clone(), count);
        }
        Ok(())
    }

    /// Replace an Idle agent's output with a fixed placeholder.
    pub async fn mark_unused(&self, id: &str, placeholder: &str) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        let agent = inner.agent_mut(id)?;
        if agent.status != AgentStatus::Idle {
            return Err(StateError::NotIdle {
                id: id.to_string(),
                status: agent.status,
            });
        }

        agent.output = placeholder.to_string();
        if let Some(events) = &self.events {
            events.emit_output_reset(agent.id.clone(), placeholder.to_string());
        }
        Ok(())
    }

    /// Move every Working agent to Error, appending `note` to each. Returns the affected ids.
    pub async fn fail_working(&self, note: &str) -> Vec<AgentId> {
        let mut inner = self.inner.write().await;
        let StoreInner { order, agents } = &mut *inner;

        let mut failed = Vec::new();
        for id in order.iter() {
            let Some(agent) = agents.get_mut(id) else {
                continue;
            };
            if agent.status != AgentStatus::Working {
                continue;
            }

            agent.output.push_str(note);
            agent.status = AgentStatus::Error;
            if let Some(events) = &self.events {
                events.emit_output(agent.id.clone(), note.to_string());
                events.emit_status(
                    agent.id.clone(),
                    agent.role,
                    AgentStatus::Working,
                    AgentStatus::Error,
                );
            }
            failed.push(agent.id.clone());
        }
        failed
    }

    pub async fn get(&self, id: &str) -> Option<AgentState> {
        self.inner.read().await.agents.get(id).cloned()
    }

    /// Consistent copy of every agent in registration order.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id).cloned())
            .collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }
}
