//! Deterministic offline [`ContentGenerator`] used by the CLI demo and tests.
//!
//! Produces canned plans, grounded summaries, reports and critiques derived
//! from the request text, with optional per-agent latency and failure
//! injection.

use crate::error::GenerationError;
use crate::generator::{
    ContentGenerator, FragmentStream, GenerationRequest, StreamChunk, StreamOptions,
};
use crate::state::{AgentId, GroundingSource};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const STEP_TEMPLATES: [&str; 5] = [
    "Background and key definitions of",
    "Current state and recent developments in",
    "Main drivers and constraints shaping",
    "Open problems and competing viewpoints on",
    "Near-term outlook for",
];

const WORDS_PER_FRAGMENT: usize = 4;

#[derive(Debug, Clone)]
enum Failure {
    AtStart(GenerationError),
    MidStream(GenerationError),
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(GenerationRequest, Option<StreamOptions>)>>,
    completed: Mutex<Vec<AgentId>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn stream_started(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn stream_finished(&self, agent_id: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        lock(&self.completed).push(agent_id.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Offline generator with canned, topic-derived output.
pub struct StubGenerator {
    plan_steps: usize,
    plan_payload: Option<String>,
    fragment_delay: Duration,
    delays: HashMap<AgentId, Duration>,
    failures: HashMap<AgentId, Failure>,
    recorder: Arc<Recorder>,
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            plan_steps: 3,
            plan_payload: None,
            fragment_delay: Duration::ZERO,
            delays: HashMap::new(),
            failures: HashMap::new(),
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Number of steps in generated plans.
    pub fn with_plan_steps(mut self, steps: usize) -> Self {
        self.plan_steps = steps;
        self
    }

    /// Return `payload` verbatim from the structured call.
    pub fn with_plan_payload(mut self, payload: impl Into<String>) -> Self {
        self.plan_payload = Some(payload.into());
        self
    }

    /// Delay applied before every streamed fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// Per-fragment delay for one agent, overriding the global delay.
    pub fn with_delay_for(mut self, agent_id: impl Into<AgentId>, delay: Duration) -> Self {
        self.delays.insert(agent_id.into(), delay);
        self
    }

    /// Fail the call for `agent_id` before any fragment is produced.
    pub fn failing_for(mut self, agent_id: impl Into<AgentId>, error: GenerationError) -> Self {
        self.failures
            .insert(agent_id.into(), Failure::AtStart(error));
        self
    }

    /// Emit one fragment for `agent_id`, then fail the stream.
    pub fn failing_mid_stream_for(
        mut self,
        agent_id: impl Into<AgentId>,
        error: GenerationError,
    ) -> Self {
        self.failures
            .insert(agent_id.into(), Failure::MidStream(error));
        self
    }

    /// Every request received so far, in call order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        lock(&self.recorder.calls)
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    /// Whether any call was made for `agent_id`.
    pub fn was_called_for(&self, agent_id: &str) -> bool {
        lock(&self.recorder.calls)
            .iter()
            .any(|(request, _)| request.agent_id == agent_id)
    }

    /// Options of the first streaming call made for `agent_id`.
    pub fn options_for(&self, agent_id: &str) -> Option<StreamOptions> {
        lock(&self.recorder.calls)
            .iter()
            .find(|(request, _)| request.agent_id == agent_id)
            .and_then(|(_, options)| *options)
    }

    /// Agent ids whose streams were drained to their last item, in that order.
    pub fn completion_order(&self) -> Vec<AgentId> {
        lock(&self.recorder.completed).clone()
    }

    /// Highest number of streams that were open at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.recorder.peak.load(Ordering::SeqCst)
    }

    fn record(&self, request: &GenerationRequest, options: Option<StreamOptions>) {
        lock(&self.recorder.calls).push((request.clone(), options));
    }

    fn canned_plan(&self, prompt: &str) -> String {
        let topic = extract_topic(prompt);
        let steps: Vec<String> = (0..self.plan_steps)
            .map(|idx| match STEP_TEMPLATES.get(idx) {
                Some(template) => format!("{template} {topic}"),
                None => format!("Additional angle {} on {topic}", idx + 1),
            })
            .collect();

        json!({
            "steps": steps,
            "assumptions": format!("General audience; publicly available sources on {topic}."),
        })
        .to_string()
    }

    fn canned_chunks(
        &self,
        request: &GenerationRequest,
        options: StreamOptions,
    ) -> Vec<StreamChunk> {
        if options.search_grounding {
            research_chunks(&request.prompt)
        } else if options.low_latency {
            split_fragments(
                "- Tighten the introduction so the scope is stated in one sentence.\n\
- Cite a source for each quantitative claim in the body.\n\
- The conclusion is consistent with the findings.\n",
            )
        } else {
            report_chunks(&request.prompt)
        }
    }
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn generate_structured(
        &self,
        request: GenerationRequest,
        _schema: serde_json::Value,
    ) -> Result<String, GenerationError> {
        self.record(&request, None);
        if let Some(Failure::AtStart(err) | Failure::MidStream(err)) =
            self.failures.get(&request.agent_id)
        {
            return Err(err.clone());
        }

        let delay = self
            .delays
            .get(&request.agent_id)
            .copied()
            .unwrap_or(self.fragment_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .plan_payload
            .clone()
            .unwrap_or_else(|| self.canned_plan(&request.prompt)))
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        options: StreamOptions,
    ) -> Result<FragmentStream, GenerationError> {
        self.record(&request, Some(options));

        let mut items: Vec<Result<StreamChunk, GenerationError>> = self
            .canned_chunks(&request, options)
            .into_iter()
            .map(Ok)
            .collect();
        match self.failures.get(&request.agent_id) {
            Some(Failure::AtStart(err)) => return Err(err.clone()),
            Some(Failure::MidStream(err)) => {
                items.truncate(1);
                items.push(Err(err.clone()));
            }
            None => {}
        }

        let delay = self
            .delays
            .get(&request.agent_id)
            .copied()
            .unwrap_or(self.fragment_delay);
        let recorder = self.recorder.clone();
        let agent_id = request.agent_id;
        let last = items.len().saturating_sub(1);
        recorder.stream_started();

        let stream = stream::iter(items.into_iter().enumerate()).then(move |(idx, item)| {
            let recorder = recorder.clone();
            let agent_id = agent_id.clone();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if idx == last {
                    recorder.stream_finished(&agent_id);
                }
                item
            }
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Pull the text after the first `Topic:` / `Research question:` label.
fn extract_topic(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| {
            line.strip_prefix("Topic:")
                .or_else(|| line.strip_prefix("Research question:"))
        })
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "the topic".to_string())
}

fn slug(text: &str) -> String {
    let slug: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    slug.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Split `text` into fragments of a few words, keeping whitespace intact.
fn split_fragments(text: &str) -> Vec<StreamChunk> {
    let words: Vec<&str> = text.split_inclusive(' ').collect();
    words
        .chunks(WORDS_PER_FRAGMENT)
        .map(|group| StreamChunk::text(group.concat()))
        .collect()
}

fn research_chunks(prompt: &str) -> Vec<StreamChunk> {
    let query = extract_topic(prompt);
    let slug = slug(&query);
    let primary = GroundingSource::new(
        format!("https://example.com/research/{slug}"),
        format!("Overview: {query}"),
    );
    let secondary = GroundingSource::new(
        format!("https://example.org/{slug}/data"),
        format!("Dataset notes: {query}"),
    );

    let summary = format!(
        "Published analyses of {query} agree on the core facts and disagree mainly on timing. \
Most surveys report steady, measurable progress over the last five years.\n\n\
Reviewers caution that headline figures often come from laboratory conditions, and \
field results trail them by a noticeable margin. "
    );

    let mut chunks = split_fragments(&summary);
    if let Some(first) = chunks.first_mut() {
        first.sources.push(primary.clone());
    }
    if let Some(last) = chunks.last_mut() {
        // The same citation is reported again, with a different title.
        last.sources.push(GroundingSource::new(
            primary.uri.clone(),
            "Overview (duplicate)",
        ));
        last.sources.push(secondary);
    }
    chunks
}

fn report_chunks(prompt: &str) -> Vec<StreamChunk> {
    let topic = extract_topic(prompt);
    let findings = prompt.matches("### Finding").count();

    let mut report = format!(
        "\n# {topic}\n\n## Introduction\n\nThis report covers {topic} across {findings} \
research areas.\n\n## Key Points\n\n"
    );
    for idx in 1..=findings {
        report.push_str(&format!("- Area {idx}: progress is steady but uneven.\n"));
    }
    report.push_str(
        "\n## Conclusion\n\nThe evidence points to continued incremental gains rather than \
abrupt change.\n\n",
    );
    split_fragments(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::ResearchPlan;

    #[tokio::test]
    async fn canned_plan_parses() {
        let generator = StubGenerator::new().with_plan_steps(5);
        let raw = generator
            .generate_structured(
                GenerationRequest::new("planner", "Topic: wind turbines\n\nPlan it.", ""),
                json!({}),
            )
            .await
            .unwrap();

        let plan = ResearchPlan::parse(&raw).unwrap();
        assert_eq!(plan.len(), 5);
        assert!(plan.steps.iter().all(|step| step.ends_with("wind turbines")));
    }

    #[tokio::test]
    async fn research_stream_repeats_a_citation() {
        let generator = StubGenerator::new();
        let chunks: Vec<_> = generator
            .generate_stream(
                GenerationRequest::new("researcher-1", "Research question: tides", ""),
                StreamOptions::grounded(),
            )
            .await
            .unwrap()
            .collect()
            .await;

        let uris: Vec<String> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().sources)
            .map(|source| source.uri)
            .collect();
        assert_eq!(uris.len(), 3);
        assert_eq!(uris[0], uris[1]);
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slug("Solar  panel, efficiency!"), "solar-panel-efficiency");
    }

    #[test]
    fn fragments_rejoin_to_original() {
        let text = "one two three four five six seven eight nine";
        let joined: String = split_fragments(text)
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        assert_eq!(joined, text);
    }
}
