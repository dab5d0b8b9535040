use super::{OutputSink, stream_and_accumulate};
use crate::error::{PipelineError, Stage};
use crate::generator::{ContentGenerator, GenerationRequest, StreamOptions};
use crate::prompts;
use std::sync::Arc;
use tracing::instrument;

/// Reviewer stage that critiques the final report
pub struct ReviewerStage {
    generator: Arc<dyn ContentGenerator>,
}

impl ReviewerStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    #[instrument(
        name = "stage.review",
        skip(self, report, sink),
        fields(report_chars = report.len())
    )]
    pub async fn run(
        &self,
        agent_id: &str,
        report: &str,
        sink: &dyn OutputSink,
    ) -> Result<String, PipelineError> {
        let request = GenerationRequest::new(
            agent_id,
            prompts::reviewer_prompt(report),
            prompts::REVIEWER_INSTRUCTION,
        );

        // Output feeds no later stage.
        let accumulated = stream_and_accumulate(
            self.generator.as_ref(),
            Stage::Review,
            request,
            StreamOptions::low_latency(),
            sink,
        )
        .await?;

        Ok(accumulated.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::DiscardSink;
    use crate::stub::StubGenerator;

    #[tokio::test]
    async fn reviewer_requests_low_latency() {
        let generator = Arc::new(StubGenerator::new());
        let stage = ReviewerStage::new(generator.clone());

        let critique = stage
            .run("reviewer", "# Report\n\nBody.", &DiscardSink)
            .await
            .unwrap();

        assert!(critique.starts_with("- "));
        let options = generator.options_for("reviewer").unwrap();
        assert!(options.low_latency);
        assert!(!options.search_grounding);
        assert!(generator.calls()[0].prompt.contains("# Report"));
    }
}
