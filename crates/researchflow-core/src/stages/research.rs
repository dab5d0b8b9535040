//! Search-grounded investigation of a single research step.

use super::{OutputSink, stream_and_accumulate};
use crate::error::{PipelineError, Stage};
use crate::generator::{ContentGenerator, GenerationRequest, StreamOptions};
use crate::prompts;
use crate::state::GroundingSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Grounding sources unique by uri, kept in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    seen: HashSet<String>,
    sources: Vec<GroundingSource>,
}

impl SourceSet {
    /// Insert `source` unless its uri is already present. Returns whether it was added.
    pub fn insert(&mut self, source: GroundingSource) -> bool {
        if !self.seen.insert(source.uri.clone()) {
            return false;
        }
        self.sources.push(source);
        true
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn into_vec(self) -> Vec<GroundingSource> {
        self.sources
    }
}

impl Extend<GroundingSource> for SourceSet {
    fn extend<I: IntoIterator<Item = GroundingSource>>(&mut self, iter: I) {
        for source in iter {
            self.insert(source);
        }
    }
}

/// Result of one research task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub query: String,
    pub summary: String,
    pub sources: Vec<GroundingSource>,
}

/// Researcher stage that investigates one research step
#[derive(Clone)]
pub struct ResearchStage {
    generator: Arc<dyn ContentGenerator>,
}

impl ResearchStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    #[instrument(name = "stage.research", skip(self, sink))]
    pub async fn run(
        &self,
        agent_id: &str,
        query: &str,
        sink: &dyn OutputSink,
    ) -> Result<ResearchFindings, PipelineError> {
        let request = GenerationRequest::new(
            agent_id,
            prompts::research_prompt(query),
            prompts::RESEARCHER_INSTRUCTION,
        );

        let accumulated = stream_and_accumulate(
            self.generator.as_ref(),
            Stage::Research,
            request,
            StreamOptions::grounded(),
            sink,
        )
        .await?;

        tracing::info!(
            agent_id,
            sources = accumulated.sources.len(),
            "research task finished"
        );

        Ok(ResearchFindings {
            query: query.to_string(),
            summary: accumulated.text.trim().to_string(),
            sources: accumulated.sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::stages::test_support::RecordingSink;
    use crate::stub::StubGenerator;

    #[test]
    fn source_set_keeps_first_title() {
        let mut set = SourceSet::default();
        assert!(set.insert(GroundingSource::new("https://a.example", "First")));
        assert!(set.insert(GroundingSource::new("https://b.example", "B")));
        assert!(!set.insert(GroundingSource::new("https://a.example", "Second")));

        let sources = set.into_vec();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "First");
        assert_eq!(sources[1].uri, "https://b.example");
    }

    #[tokio::test]
    async fn duplicate_citations_collapse() {
        let generator = Arc::new(StubGenerator::new());
        let stage = ResearchStage::new(generator.clone());
        let sink = RecordingSink::default();

        let findings = stage
            .run("researcher-1", "perovskite cell stability", &sink)
            .await
            .unwrap();

        let uris: Vec<_> = findings.sources.iter().map(|s| s.uri.as_str()).collect();
        let unique: HashSet<_> = uris.iter().collect();
        assert_eq!(uris.len(), unique.len());
        assert!(!findings.sources.is_empty());
        assert_eq!(findings.query, "perovskite cell stability");
        assert_eq!(findings.summary, sink.fragments().await.concat().trim());
        assert!(generator.options_for("researcher-1").unwrap().search_grounding);
    }

    #[tokio::test]
    async fn mid_stream_failure_is_reported() {
        let generator = Arc::new(StubGenerator::new().failing_mid_stream_for(
            "researcher-2",
            GenerationError::MalformedStream("truncated chunk".into()),
        ));
        let stage = ResearchStage::new(generator);
        let sink = RecordingSink::default();

        let err = stage
            .run("researcher-2", "grid storage", &sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageFailure {
                stage: Stage::Research,
                ..
            }
        ));
        assert!(!sink.fragments().await.is_empty());
    }
}
