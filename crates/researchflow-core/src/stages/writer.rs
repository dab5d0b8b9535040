use super::{OutputSink, stream_and_accumulate};
use crate::error::{PipelineError, Stage};
use crate::generator::{ContentGenerator, GenerationRequest, StreamOptions};
use crate::prompts;
use std::sync::Arc;
use tracing::instrument;

/// Writer stage that synthesizes research summaries into one report
pub struct WriterStage {
    generator: Arc<dyn ContentGenerator>,
}

impl WriterStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    /// Stream the report for `topic` from `summaries` (in plan order). Returns the trimmed text.
    #[instrument(
        name = "stage.write",
        skip(self, summaries, sink),
        fields(summaries = summaries.len())
    )]
    pub async fn run(
        &self,
        agent_id: &str,
        topic: &str,
        summaries: &[String],
        sink: &dyn OutputSink,
    ) -> Result<String, PipelineError> {
        let request = GenerationRequest::new(
            agent_id,
            prompts::writer_prompt(topic, summaries),
            prompts::WRITER_INSTRUCTION,
        );

        let accumulated = stream_and_accumulate(
            self.generator.as_ref(),
            Stage::Write,
            request,
            StreamOptions::default(),
            sink,
        )
        .await?;

        Ok(accumulated.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::RecordingSink;
    use crate::stub::StubGenerator;

    #[tokio::test]
    async fn report_is_trimmed_and_streamed() {
        let generator = Arc::new(StubGenerator::new());
        let stage = WriterStage::new(generator.clone());
        let sink = RecordingSink::default();

        let summaries = vec!["alpha findings".to_string(), "beta findings".to_string()];
        let report = stage
            .run("writer", "heat pumps", &summaries, &sink)
            .await
            .unwrap();

        assert_eq!(report, report.trim());
        assert_eq!(report, sink.fragments().await.concat().trim());
        assert!(report.starts_with("# "));

        let prompt = &generator.calls()[0].prompt;
        assert!(prompt.find("alpha findings").unwrap() < prompt.find("beta findings").unwrap());
    }
}
