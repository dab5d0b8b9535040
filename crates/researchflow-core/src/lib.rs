//! ResearchFlow core: a planner, up to three parallel researchers, a writer
//! and a reviewer cooperating to turn one topic into a reviewed report.
//!
//! The [`Orchestrator`] drives the stages and is the single writer of agent
//! status; observers read the [`AgentStateStore`] or subscribe to
//! [`PipelineEvent`]s. Text generation sits behind the [`ContentGenerator`]
//! trait.

mod config;
mod error;
mod events;
mod generator;
pub mod metrics;
mod orchestrator;
mod prompts;
mod stages;
mod state;
mod stub;
mod telemetry;
mod trace;

pub use config::{
    Config, ConfigLoader, GeneratorConfig, LoggingConfig, PipelineConfig, TraceConfig,
};
pub use error::{GenerationError, PipelineError, Stage};
pub use events::{EventCollector, EventId, PipelineEvent, RunOutcome};
pub use generator::{
    ContentGenerator, FragmentStream, GenerationRequest, StreamChunk, StreamOptions,
    build_generator,
};
pub use orchestrator::{
    Orchestrator, PLANNER_ID, REVIEWER_ID, RunReport, WRITER_ID, researcher_id,
};
pub use stages::{
    AgentSink, DiscardSink, OutputSink, PlanBounds, PlanStage, ResearchFindings, ResearchPlan,
    ResearchStage, ReviewerStage, SourceSet, WriterStage,
};
pub use state::{
    AgentId, AgentRole, AgentSpec, AgentState, AgentStateStore, AgentStatus, GroundingSource,
    StateError,
};
pub use stub::StubGenerator;
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
