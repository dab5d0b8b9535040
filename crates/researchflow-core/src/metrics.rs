use crate::error::Stage;
use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    runs: Counter<u64>,
    stage_duration_ms: Histogram<f64>,
    research_sources: Histogram<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("researchflow.pipeline");
        PipelineMetrics {
            runs: meter
                .u64_counter("pipeline_runs_total")
                .with_description("Total pipeline runs by outcome")
                .init(),
            stage_duration_ms: meter
                .f64_histogram("pipeline_stage_duration_ms")
                .with_description("Stage runtime in milliseconds")
                .init(),
            research_sources: meter
                .u64_histogram("pipeline_research_sources")
                .with_description("Deduplicated grounding sources per research task")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("RESEARCHFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            service = service_name,
            "metrics endpoint set; install an OTLP meter provider to export metrics"
        );
    }
    Ok(())
}

/// Record the outcome of one run (no-op if no provider installed).
pub fn record_run(status: &str) {
    handles()
        .runs
        .add(1, &[KeyValue::new("status", status.to_string())]);
}

pub fn record_stage(stage: Stage, status: &str, duration_ms: u64) {
    let attrs = [
        KeyValue::new("stage", stage.as_str()),
        KeyValue::new("status", status.to_string()),
    ];
    handles()
        .stage_duration_ms
        .record(duration_ms as f64, &attrs);
}

pub fn record_research_sources(count: usize) {
    handles().research_sources.record(count as u64, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_provider_is_a_noop() {
        init_metrics_from_env("researchflow-test").unwrap();
        record_run("completed");
        record_stage(Stage::Plan, "ok", 12);
        record_research_sources(2);
    }
}
