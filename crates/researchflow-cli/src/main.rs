use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use researchflow_core::{
    Config, ConfigLoader, ContentGenerator, EventCollector, Orchestrator, PipelineEvent, RunReport,
    StubGenerator, TelemetryOptions, build_generator, init_telemetry, metrics, persist_trace,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "researchflow-cli",
    version,
    about = "Plan, research, write and review a report on one topic"
)]
struct Cli {
    /// Configuration file (defaults to $RESEARCHFLOW_CONFIG or ./researchflow.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline for a topic.
    Run(RunArgs),
    /// Print the agents registered for every run.
    Agents,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topic to research.
    #[arg(long)]
    topic: String,

    /// Write the run trace to this directory (overrides `[trace]`).
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Number of plan steps the offline generator produces.
    #[arg(long)]
    steps: Option<usize>,

    /// Print the full run report as JSON instead of Markdown.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Do not stream agent output to stderr while the run progresses.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_or_default(cli.config.clone())
        .context("failed to load configuration")?;

    init_telemetry(TelemetryOptions::from_level(&config.logging.level))?;
    metrics::init_metrics_from_env("researchflow-cli")?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(config, args).await?,
            Command::Agents => agents_command(config),
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(config: Config, args: RunArgs) -> Result<()> {
    info!(topic = %args.topic, "starting ResearchFlow run");

    let generator: Arc<dyn ContentGenerator> = match args.steps {
        Some(steps) if config.generator.provider == "stub" => {
            Arc::new(StubGenerator::new().with_plan_steps(steps))
        }
        Some(_) => {
            warn!("--steps only applies to the stub provider; ignoring");
            build_generator(&config.generator)?
        }
        None => build_generator(&config.generator)?,
    };

    let orchestrator = Orchestrator::new(Some(generator), config.pipeline.clone());
    let (orchestrator, printer) = if args.quiet {
        (orchestrator, None)
    } else {
        let (collector, receiver) = EventCollector::new();
        (
            orchestrator.with_events(collector),
            Some(tokio::spawn(stream_events(receiver))),
        )
    };

    let result = orchestrator.start_run(&args.topic).await;
    drop(orchestrator);
    if let Some(printer) = printer {
        printer.await.context("event printer panicked")?;
    }

    let report = match result {
        Ok(report) => report,
        Err(err) if err.is_rejection() => bail!("{err}"),
        Err(err) => bail!("research run failed: {err}"),
    };

    let trace_dir = args
        .trace_dir
        .or_else(|| config.trace.enabled.then(|| config.trace.dir.clone()));
    if let Some(dir) = trace_dir {
        let path = persist_trace(&dir, &report.run_id, &report.trace_events)?;
        info!(path = %path.display(), "trace written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn agents_command(config: Config) {
    let orchestrator = Orchestrator::new(None, config.pipeline);
    for spec in orchestrator.roster() {
        println!("{:<14} {}", spec.id, spec.role);
    }
}

/// Mirror live agent activity to stderr until the run's collector is dropped.
async fn stream_events(mut receiver: UnboundedReceiver<PipelineEvent>) {
    let mut current: Option<String> = None;
    while let Some(event) = receiver.recv().await {
        match event {
            PipelineEvent::StatusChanged {
                agent_id, from, to, ..
            } => {
                eprintln!("\n[{agent_id}] {from} -> {to}");
                current = None;
            }
            PipelineEvent::OutputAppended {
                agent_id, fragment, ..
            } => {
                if current.as_deref() != Some(agent_id.as_str()) {
                    eprint!("\n[{agent_id}] ");
                    current = Some(agent_id);
                }
                eprint!("{fragment}");
            }
            PipelineEvent::OutputReset {
                agent_id, output, ..
            } => {
                eprintln!("\n[{agent_id}] {output}");
                current = None;
            }
            PipelineEvent::SourcesSet {
                agent_id, count, ..
            } => {
                eprintln!("\n[{agent_id}] {count} sources");
                current = None;
            }
            PipelineEvent::RunStarted { .. } | PipelineEvent::RunFinished { .. } => {}
        }
    }
    eprintln!();
}

fn print_report(report: &RunReport) {
    println!("{}\n", report.report);

    println!("## Sources\n");
    let mut numbered = 0;
    for findings in &report.findings {
        for source in &findings.sources {
            numbered += 1;
            println!("{numbered}. [{}]({})", source.title, source.uri);
        }
    }
    if numbered == 0 {
        println!("(none recorded)");
    }

    println!("\n## Review\n\n{}\n", report.critique);
    println!("{}", report.trace.render_markdown());
}
