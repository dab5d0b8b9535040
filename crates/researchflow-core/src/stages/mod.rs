//! Pipeline stages. Each stage issues generation calls, forwards streamed
//! fragments to an [`OutputSink`] and returns its final value.

mod plan;
mod research;
mod review;
mod writer;

pub use plan::{PlanBounds, PlanStage, ResearchPlan};
pub use research::{ResearchFindings, ResearchStage, SourceSet};
pub use review::ReviewerStage;
pub use writer::WriterStage;

use crate::error::{PipelineError, Stage};
use crate::generator::{ContentGenerator, GenerationRequest, StreamOptions};
use crate::state::{AgentId, AgentStateStore, GroundingSource};
use async_trait::async_trait;
use futures::StreamExt;

/// Destination for the fragments a stage produces while it runs.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn push(&self, fragment: &str) -> Result<(), PipelineError>;
}

/// Sink that appends to one agent's buffer in the state store.
#[derive(Clone)]
pub struct AgentSink {
    store: AgentStateStore,
    agent_id: AgentId,
}

impl AgentSink {
    pub fn new(store: AgentStateStore, agent_id: impl Into<AgentId>) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[async_trait]
impl OutputSink for AgentSink {
    async fn push(&self, fragment: &str) -> Result<(), PipelineError> {
        self.store.append_output(&self.agent_id, fragment).await?;
        Ok(())
    }
}

/// Sink that drops everything.
pub struct DiscardSink;

#[async_trait]
impl OutputSink for DiscardSink {
    async fn push(&self, _fragment: &str) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Text and deduplicated citations gathered from one streaming call.
#[derive(Debug, Default)]
pub(crate) struct Accumulated {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// Drive one streaming call to completion, forwarding every fragment in order.
pub(crate) async fn stream_and_accumulate(
    generator: &dyn ContentGenerator,
    stage: Stage,
    request: GenerationRequest,
    options: StreamOptions,
    sink: &dyn OutputSink,
) -> Result<Accumulated, PipelineError> {
    let agent_id = request.agent_id.clone();
    let mut stream = generator
        .generate_stream(request, options)
        .await
        .map_err(|err| PipelineError::stage(stage, err))?;

    let mut text = String::new();
    let mut sources = SourceSet::default();
    let mut fragments = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| PipelineError::stage(stage, err))?;
        if !chunk.text.is_empty() {
            sink.push(&chunk.text).await?;
            text.push_str(&chunk.text);
            fragments += 1;
        }
        sources.extend(chunk.sources);
    }

    tracing::debug!(
        agent_id = %agent_id,
        stage = %stage,
        fragments,
        chars = text.len(),
        sources = sources.len(),
        "stream drained"
    );

    Ok(Accumulated {
        text,
        sources: sources.into_vec(),
    })
}
