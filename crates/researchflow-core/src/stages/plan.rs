//! Topic decomposition into an ordered list of research steps.
//!
//! The planner's structured payload is treated as untrusted input: it is
//! validated for field presence and a non-empty step list before use.

use super::OutputSink;
use crate::error::{PipelineError, Stage};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\s*```\s*$").expect("invalid code fence regex")
});

/// Ordered research steps plus the assumptions behind them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub steps: Vec<String>,
    pub assumptions: String,
}

impl ResearchPlan {
    /// Parse and validate a planner payload.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let body = CODE_FENCE
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw);

        let payload: RawPlan = serde_json::from_str(body.trim())
            .map_err(|err| PipelineError::PlanParse(format!("invalid JSON: {err}")))?;

        let steps = payload
            .steps
            .ok_or_else(|| PipelineError::PlanParse("missing field `steps`".into()))?;
        let assumptions = payload
            .assumptions
            .ok_or_else(|| PipelineError::PlanParse("missing field `assumptions`".into()))?;

        let steps: Vec<String> = steps
            .into_iter()
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .collect();
        if steps.is_empty() {
            return Err(PipelineError::PlanParse(
                "`steps` must contain at least one non-empty entry".into(),
            ));
        }

        Ok(Self {
            steps,
            assumptions: assumptions.trim().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Option<Vec<String>>,
    assumptions: Option<String>,
}

/// Step count the planner is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanBounds {
    pub min_steps: usize,
    pub max_steps: usize,
}

impl Default for PlanBounds {
    fn default() -> Self {
        Self {
            min_steps: 3,
            max_steps: 5,
        }
    }
}

/// Planner stage that decomposes a topic into research steps
pub struct PlanStage {
    generator: Arc<dyn ContentGenerator>,
    bounds: PlanBounds,
}

impl PlanStage {
    pub fn new(generator: Arc<dyn ContentGenerator>, bounds: PlanBounds) -> Self {
        Self { generator, bounds }
    }

    /// Request a plan for `topic`. The raw payload is forwarded to `sink` for display.
    #[instrument(name = "stage.plan", skip(self, sink))]
    pub async fn run(
        &self,
        agent_id: &str,
        topic: &str,
        sink: &dyn OutputSink,
    ) -> Result<ResearchPlan, PipelineError> {
        let request = GenerationRequest::new(
            agent_id,
            prompts::plan_prompt(topic, self.bounds.min_steps, self.bounds.max_steps),
            prompts::PLANNER_INSTRUCTION,
        );

        let raw = self
            .generator
            .generate_structured(request, prompts::plan_schema())
            .await
            .map_err(|err| PipelineError::stage(Stage::Plan, err))?;
        sink.push(&raw).await?;

        let plan = ResearchPlan::parse(&raw)?;
        if plan.len() < self.bounds.min_steps || plan.len() > self.bounds.max_steps {
            tracing::warn!(
                steps = plan.len(),
                min = self.bounds.min_steps,
                max = self.bounds.max_steps,
                "planner returned a step count outside the requested range"
            );
        }

        tracing::info!(steps = plan.len(), "research plan ready");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::stages::test_support::RecordingSink;
    use crate::stub::StubGenerator;
    use serde_json::json;

    #[test]
    fn parses_well_formed_payload() {
        let raw = json!({
            "steps": ["  Survey cell chemistries ", "Compare costs"],
            "assumptions": "Consumer market only"
        })
        .to_string();

        let plan = ResearchPlan::parse(&raw).unwrap();
        assert_eq!(plan.steps, vec!["Survey cell chemistries", "Compare costs"]);
        assert_eq!(plan.assumptions, "Consumer market only");
    }

    #[test]
    fn strips_markdown_code_fence() {
        let raw = "```json\n{\"steps\": [\"One\"], \"assumptions\": \"\"}\n```";
        let plan = ResearchPlan::parse(raw).unwrap();
        assert_eq!(plan.steps, vec!["One"]);
    }

    #[test]
    fn rejects_missing_fields() {
        let err = ResearchPlan::parse(r#"{"steps": ["One"]}"#).unwrap_err();
        assert!(matches!(err, PipelineError::PlanParse(msg) if msg.contains("assumptions")));

        let err = ResearchPlan::parse(r#"{"assumptions": "none"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::PlanParse(msg) if msg.contains("steps")));
    }

    #[test]
    fn rejects_empty_or_blank_steps() {
        let err = ResearchPlan::parse(r#"{"steps": [], "assumptions": ""}"#).unwrap_err();
        assert!(matches!(err, PipelineError::PlanParse(_)));

        let err = ResearchPlan::parse(r#"{"steps": ["  ", ""], "assumptions": ""}"#).unwrap_err();
        assert!(matches!(err, PipelineError::PlanParse(_)));
    }

    #[test]
    fn rejects_non_json() {
        let err = ResearchPlan::parse("Step 1: read things").unwrap_err();
        assert!(matches!(err, PipelineError::PlanParse(_)));
    }

    #[tokio::test]
    async fn forwards_raw_payload_and_returns_plan() {
        let generator = Arc::new(StubGenerator::new().with_plan_steps(4));
        let stage = PlanStage::new(generator.clone(), PlanBounds::default());
        let sink = RecordingSink::default();

        let plan = stage.run("planner", "tidal energy", &sink).await.unwrap();
        assert_eq!(plan.len(), 4);

        let fragments = sink.fragments().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("\"steps\""));
        assert_eq!(generator.calls()[0].agent_id, "planner");
    }

    #[tokio::test]
    async fn generator_failure_is_a_stage_failure() {
        let generator = Arc::new(
            StubGenerator::new()
                .failing_for("planner", GenerationError::unavailable("quota exceeded")),
        );
        let stage = PlanStage::new(generator, PlanBounds::default());

        let err = stage
            .run("planner", "tidal energy", &RecordingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageFailure {
                stage: Stage::Plan,
                ..
            }
        ));
    }
}
