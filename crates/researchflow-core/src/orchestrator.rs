//! Run orchestration: planner, researcher fan-out, writer and reviewer.
//!
//! The orchestrator is the only component that changes agent status or
//! attaches sources. Stages stream their output through an [`AgentSink`]
//! bound to their agent id. Research runs as a [`JoinSet`] capped at
//! `max_researchers`; the join waits for every task to settle before a
//! failure is reported, and results are slotted back by plan position.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage, failure_note};
use crate::events::{EventCollector, RunOutcome};
use crate::generator::ContentGenerator;
use crate::metrics;
use crate::stages::{
    AgentSink, PlanStage, ResearchFindings, ResearchPlan, ResearchStage, ReviewerStage,
    WriterStage,
};
use crate::state::{AgentRole, AgentSpec, AgentState, AgentStateStore, AgentStatus};
use crate::trace::{TraceCollector, TraceEvent, TraceSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

pub const PLANNER_ID: &str = "planner";
pub const WRITER_ID: &str = "writer";
pub const REVIEWER_ID: &str = "reviewer";

/// Id of the researcher occupying 1-based `slot`.
pub fn researcher_id(slot: usize) -> String {
    format!("researcher-{slot}")
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub topic: String,
    pub plan: ResearchPlan,
    /// One entry per researched step, in plan order.
    pub findings: Vec<ResearchFindings>,
    pub report: String,
    pub critique: String,
    pub agents: Vec<AgentState>,
    pub trace: TraceSummary,
    pub trace_events: Vec<TraceEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct RunOutput {
    plan: ResearchPlan,
    findings: Vec<ResearchFindings>,
    report: String,
    critique: String,
}

/// Drives one run at a time over a shared [`AgentStateStore`].
pub struct Orchestrator {
    generator: Option<Arc<dyn ContentGenerator>>,
    config: PipelineConfig,
    store: AgentStateStore,
    events: Option<EventCollector>,
    run_lock: Mutex<()>,
}

impl Orchestrator {
    /// `config.max_researchers` is clamped to `1..=PipelineConfig::MAX_RESEARCHERS`.
    pub fn new(generator: Option<Arc<dyn ContentGenerator>>, mut config: PipelineConfig) -> Self {
        let cap = config
            .max_researchers
            .clamp(1, PipelineConfig::MAX_RESEARCHERS);
        if cap != config.max_researchers {
            tracing::warn!(
                requested = config.max_researchers,
                using = cap,
                "researcher cap out of range; clamping"
            );
            config.max_researchers = cap;
        }
        Self {
            generator,
            config,
            store: AgentStateStore::new(),
            events: None,
            run_lock: Mutex::new(()),
        }
    }

    /// Publish run and agent events to `collector`.
    pub fn with_events(mut self, collector: EventCollector) -> Self {
        self.store = self.store.with_events(collector.clone());
        self.events = Some(collector);
        self
    }

    pub fn store(&self) -> &AgentStateStore {
        &self.store
    }

    pub async fn snapshot(&self) -> Vec<AgentState> {
        self.store.snapshot().await
    }

    /// Agents registered at the start of every run.
    pub fn roster(&self) -> Vec<AgentSpec> {
        let mut roster = vec![AgentSpec::new(PLANNER_ID, AgentRole::Planner)];
        roster.extend(
            (1..=self.config.max_researchers)
                .map(|slot| AgentSpec::new(researcher_id(slot), AgentRole::Researcher)),
        );
        roster.push(AgentSpec::new(WRITER_ID, AgentRole::Writer));
        roster.push(AgentSpec::new(REVIEWER_ID, AgentRole::Reviewer));
        roster
    }

    /// Run the full pipeline for `topic`.
    ///
    /// Blank topics and a missing generator are rejected before any agent
    /// state changes. Any later failure marks every Working agent as Error and
    /// is returned as the run's single top-level error.
    pub async fn start_run(&self, topic: &str) -> Result<RunReport, PipelineError> {
        let generator = self
            .generator
            .clone()
            .ok_or_else(|| PipelineError::Config("no content generator configured".into()))?;
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::Validation(
                "topic must not be empty or whitespace".into(),
            ));
        }

        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.store.reset(&self.roster()).await?;
        if let Some(events) = &self.events {
            events.emit_run_started(run_id.clone(), topic.to_string());
        }

        tracing::info!(
            run_id = %run_id,
            topic,
            generator = generator.name(),
            "starting research run"
        );

        let mut trace = TraceCollector::new();
        match self.drive(generator, topic, &mut trace).await {
            Ok(output) => {
                metrics::record_run("completed");
                if let Some(events) = &self.events {
                    events.emit_run_finished(run_id.clone(), RunOutcome::Completed);
                }
                tracing::info!(run_id = %run_id, "research run completed");

                Ok(RunReport {
                    run_id,
                    topic: topic.to_string(),
                    plan: output.plan,
                    findings: output.findings,
                    report: output.report,
                    critique: output.critique,
                    agents: self.store.snapshot().await,
                    trace: trace.summary(),
                    trace_events: trace.into_events(),
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(err) => {
                let failed = self.store.fail_working(&failure_note(&err)).await;
                tracing::error!(
                    run_id = %run_id,
                    error = %err,
                    failed_agents = ?failed,
                    "research run failed"
                );
                metrics::record_run("failed");
                if let Some(events) = &self.events {
                    events.emit_run_finished(
                        run_id,
                        RunOutcome::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        generator: Arc<dyn ContentGenerator>,
        topic: &str,
        trace: &mut TraceCollector,
    ) -> Result<RunOutput, PipelineError> {
        let plan = self.plan(generator.clone(), topic, trace).await?;

        let queries: Vec<String> = plan
            .steps
            .iter()
            .take(self.config.max_researchers)
            .cloned()
            .collect();
        if plan.len() > queries.len() {
            tracing::info!(
                planned = plan.len(),
                researched = queries.len(),
                "plan truncated to researcher cap"
            );
        }
        for slot in queries.len() + 1..=self.config.max_researchers {
            let agent_id = researcher_id(slot);
            self.store
                .mark_unused(&agent_id, &self.config.unused_placeholder)
                .await?;
            trace.record(&agent_id, "not needed for this plan");
        }

        let findings = self.research(generator.clone(), &queries, trace).await?;
        let summaries: Vec<String> = findings.iter().map(|f| f.summary.clone()).collect();

        let report = self.write(generator.clone(), topic, &summaries, trace).await?;
        let critique = self.review(generator, &report, trace).await?;

        Ok(RunOutput {
            plan,
            findings,
            report,
            critique,
        })
    }

    async fn plan(
        &self,
        generator: Arc<dyn ContentGenerator>,
        topic: &str,
        trace: &mut TraceCollector,
    ) -> Result<ResearchPlan, PipelineError> {
        self.begin(PLANNER_ID, trace, "planning").await?;
        let stage = PlanStage::new(generator, self.config.plan_bounds());
        let sink = AgentSink::new(self.store.clone(), PLANNER_ID);

        let started = Instant::now();
        let result = stage.run(PLANNER_ID, topic, &sink).await;
        observe(Stage::Plan, started, result.is_ok());
        let plan = result?;

        self.store.set_status(PLANNER_ID, AgentStatus::Done).await?;
        trace.record(PLANNER_ID, format!("plan ready with {} steps", plan.len()));
        Ok(plan)
    }

    async fn research(
        &self,
        generator: Arc<dyn ContentGenerator>,
        queries: &[String],
        trace: &mut TraceCollector,
    ) -> Result<Vec<ResearchFindings>, PipelineError> {
        let stage = ResearchStage::new(generator);
        let mut tasks = JoinSet::new();

        for (idx, query) in queries.iter().enumerate() {
            let agent_id = researcher_id(idx + 1);
            self.begin(&agent_id, trace, &format!("researching \"{query}\""))
                .await?;

            let stage = stage.clone();
            let sink = AgentSink::new(self.store.clone(), agent_id);
            let query = query.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let result = stage.run(sink.agent_id(), &query, &sink).await;
                (idx, result, started)
            });
        }

        let mut slots: Vec<Option<ResearchFindings>> = vec![None; queries.len()];
        let mut failure: Option<PipelineError> = None;

        // All tasks settle before a failure is acted on.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(findings), started)) => {
                    observe(Stage::Research, started, true);
                    let agent_id = researcher_id(idx + 1);
                    match self.complete_researcher(&agent_id, &findings).await {
                        Ok(()) => {
                            trace.record(
                                &agent_id,
                                format!("done with {} sources", findings.sources.len()),
                            );
                            slots[idx] = Some(findings);
                        }
                        Err(err) => {
                            failure.get_or_insert(err);
                        }
                    }
                }
                Ok((idx, Err(err), started)) => {
                    observe(Stage::Research, started, false);
                    let agent_id = researcher_id(idx + 1);
                    tracing::warn!(agent_id = %agent_id, error = %err, "research task failed");
                    trace.record(&agent_id, format!("failed: {err}"));
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "research task aborted");
                    failure.get_or_insert(PipelineError::stage(
                        Stage::Research,
                        format!("research task aborted: {join_err}"),
                    ));
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PipelineError::stage(Stage::Research, "research result missing"))
    }

    async fn complete_researcher(
        &self,
        agent_id: &str,
        findings: &ResearchFindings,
    ) -> Result<(), PipelineError> {
        metrics::record_research_sources(findings.sources.len());
        self.store
            .set_sources(agent_id, findings.sources.clone())
            .await?;
        self.store.set_status(agent_id, AgentStatus::Done).await?;
        Ok(())
    }

    async fn write(
        &self,
        generator: Arc<dyn ContentGenerator>,
        topic: &str,
        summaries: &[String],
        trace: &mut TraceCollector,
    ) -> Result<String, PipelineError> {
        self.begin(WRITER_ID, trace, "writing report").await?;
        let stage = WriterStage::new(generator);
        let sink = AgentSink::new(self.store.clone(), WRITER_ID);

        let started = Instant::now();
        let result = stage.run(WRITER_ID, topic, summaries, &sink).await;
        observe(Stage::Write, started, result.is_ok());
        let report = result?;

        self.store.set_status(WRITER_ID, AgentStatus::Done).await?;
        trace.record(WRITER_ID, format!("report ready ({} chars)", report.len()));
        Ok(report)
    }

    async fn review(
        &self,
        generator: Arc<dyn ContentGenerator>,
        report: &str,
        trace: &mut TraceCollector,
    ) -> Result<String, PipelineError> {
        self.begin(REVIEWER_ID, trace, "reviewing report").await?;
        let stage = ReviewerStage::new(generator);
        let sink = AgentSink::new(self.store.clone(), REVIEWER_ID);

        let started = Instant::now();
        let result = stage.run(REVIEWER_ID, report, &sink).await;
        observe(Stage::Review, started, result.is_ok());
        let critique = result?;

        self.store
            .set_status(REVIEWER_ID, AgentStatus::Done)
            .await?;
        trace.record(REVIEWER_ID, "critique ready");
        Ok(critique)
    }

    async fn begin(
        &self,
        agent_id: &str,
        trace: &mut TraceCollector,
        activity: &str,
    ) -> Result<(), PipelineError> {
        self.store
            .set_status(agent_id, AgentStatus::Working)
            .await?;
        tracing::info!(agent_id, activity, "agent started");
        trace.record(agent_id, activity);
        Ok(())
    }
}

fn observe(stage: Stage, started: Instant, ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    metrics::record_stage(stage, status, started.elapsed().as_millis() as u64);
}
