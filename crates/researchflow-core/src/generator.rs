//! Boundary to the external content-generation service.
//!
//! Stages only see the [`ContentGenerator`] trait: a single-shot structured call
//! used for planning and a lazy fragment stream used by every other stage.

use crate::config::GeneratorConfig;
use crate::error::{GenerationError, PipelineError};
use crate::state::{AgentId, GroundingSource};
use crate::stub::StubGenerator;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One generation call, tagged with the agent it runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub agent_id: AgentId,
    pub prompt: String,
    pub system_instruction: String,
}

impl GenerationRequest {
    pub fn new(
        agent_id: impl Into<AgentId>,
        prompt: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            system_instruction: system_instruction.into(),
        }
    }
}

/// Knobs for streaming calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Ground the answer in web search results
    pub search_grounding: bool,
    /// Skip extended deliberation in favour of latency
    pub low_latency: bool,
}

impl StreamOptions {
    pub fn grounded() -> Self {
        Self {
            search_grounding: true,
            ..Self::default()
        }
    }

    pub fn low_latency() -> Self {
        Self {
            low_latency: true,
            ..Self::default()
        }
    }
}

/// One batch of streamed output with the citations that accompanied it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: GroundingSource) -> Self {
        self.sources.push(source);
        self
    }
}

/// Lazy, finite, non-restartable sequence of chunks in production order.
pub type FragmentStream = BoxStream<'static, Result<StreamChunk, GenerationError>>;

/// External content-generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Single-shot generation constrained by a JSON schema. Returns the raw payload.
    async fn generate_structured(
        &self,
        request: GenerationRequest,
        schema: serde_json::Value,
    ) -> Result<String, GenerationError>;

    /// Start a streaming generation call.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
        options: StreamOptions,
    ) -> Result<FragmentStream, GenerationError>;

    /// Short provider label used in logs.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Build the generator named by `config.provider`.
///
/// Only the offline `stub` provider ships with this workspace; any other
/// provider is reported as unconfigured.
pub fn build_generator(
    config: &GeneratorConfig,
) -> Result<Arc<dyn ContentGenerator>, PipelineError> {
    match config.provider.trim() {
        "stub" => {
            tracing::info!(model = %config.model, "using offline stub generator");
            Ok(Arc::new(StubGenerator::new()))
        }
        other => Err(PipelineError::Config(format!(
            "provider '{other}' is not available in this build"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_provider_builds() {
        let generator = build_generator(&GeneratorConfig::default()).unwrap();
        assert_eq!(generator.name(), "stub");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = GeneratorConfig {
            provider: "acme-llm".into(),
            ..GeneratorConfig::default()
        };
        let err = build_generator(&config).err().unwrap();
        assert!(matches!(err, PipelineError::Config(msg) if msg.contains("acme-llm")));
    }

    #[test]
    fn chunk_builder_attaches_sources() {
        let chunk = StreamChunk::text("hello").with_source(GroundingSource::new("u", "t"));
        assert_eq!(chunk.sources.len(), 1);
        assert!(StreamOptions::grounded().search_grounding);
        assert!(!StreamOptions::grounded().low_latency);
    }
}
