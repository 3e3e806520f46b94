use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use deepsearch_core::metrics::init_metrics_from_env;
use deepsearch_core::telemetry::{TelemetryOptions, init_telemetry};
use deepsearch_core::{
    AnswerRelevancyScorer, ConfigLoader, DatasetRunner, EvaluationHarness, ProgressAnnotation,
    ProgressSink, ResearchServices, SessionOptions, UserLocation, load_dataset, log_base_dir,
    remove_session_logs, run_research_session,
};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "deepsearch",
    version,
    about = "Iterative web research with cited answers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a question and stream the answer to stdout.
    Ask(AskArgs),
    /// Evaluate past sessions or a question dataset.
    Eval(EvalArgs),
    /// Delete every logged record of a session.
    Forget(ForgetArgs),
}

#[derive(Args, Debug)]
struct AskArgs {
    /// Question to research.
    question: String,

    /// Path to the configuration file (defaults to `DEEPSEARCH_CONFIG`, then `./config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// City used to bias searches and the answer.
    #[arg(long)]
    city: Option<String>,

    /// Country used to bias searches and the answer.
    #[arg(long)]
    country: Option<String>,

    /// Override the configured research budget.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Optional session ID; a fresh one is generated when omitted.
    #[arg(long)]
    session: Option<String>,

    /// Directory where the reasoning trace is written as `<session>.json`.
    #[arg(long)]
    trace_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[command(subcommand)]
    mode: EvalMode,
}

#[derive(Subcommand, Debug)]
enum EvalMode {
    /// Summarise a JSONL session log.
    Log {
        /// Session log file to analyse.
        path: PathBuf,
    },
    /// Research every question in a JSON dataset and score the answers.
    Dataset {
        /// JSON array of `{id, question, expected?}` cases.
        path: PathBuf,

        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only check for citation links; skip the LLM relevancy judge.
        #[arg(long)]
        no_judge: bool,

        /// Write the per-case report as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ForgetArgs {
    /// Session whose log records should be removed.
    session: String,

    /// Log directory (defaults to `DEEPSEARCH_LOG_DIR`, then `data/logs`).
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Prints each research step to stderr as it is announced.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn notify(&self, annotation: ProgressAnnotation) {
        let action = annotation.action();
        let mut line = format!("» {} ({})", action.title(), action.kind());
        if let Some(plan) = annotation.plan() {
            for query in &plan.queries {
                line.push_str(&format!("\n    - {query}"));
            }
        }
        eprintln!("{line}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Ask(args) => ask_command(args).await?,
            Command::Eval(args) => match args.mode {
                EvalMode::Log { path } => eval_log_command(path)?,
                EvalMode::Dataset {
                    path,
                    config,
                    no_judge,
                    report,
                } => eval_dataset_command(path, config, no_judge, report).await?,
            },
            Command::Forget(args) => forget_command(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn ask_command(args: AskArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config).context("failed to load configuration")?;
    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("deepsearch-cli")?;

    let services = ResearchServices::from_config(&config)?;

    let mut options =
        SessionOptions::question(&args.question).with_progress(Arc::new(StderrProgress));
    if args.city.is_some() || args.country.is_some() {
        options = options.with_location(UserLocation {
            city: args.city,
            country: args.country,
            ..UserLocation::default()
        });
    }
    if let Some(max_steps) = args.max_steps {
        options = options.with_max_steps(max_steps);
    }
    if let Some(session_id) = args.session {
        options = options.with_session_id(session_id);
    }
    if let Some(dir) = args.trace_dir {
        options = options.with_trace_dir(dir);
    }

    info!(question = %args.question, "starting research session");
    let session = run_research_session(&services, options).await?;

    let mut stdout = io::stdout();
    let outcome = session
        .collect_with(|delta| {
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    println!();

    eprintln!();
    eprintln!("{}", outcome.trace.render_markdown());
    if outcome.is_final {
        eprintln!("Research budget exhausted after {} steps.", outcome.steps);
    }
    if let Some(path) = outcome.trace_path {
        eprintln!("Trace written to {}", path.display());
    }
    info!(
        session_id = %outcome.session_id,
        sources = outcome.sources.len(),
        "research session finished"
    );
    Ok(())
}

fn eval_log_command(path: PathBuf) -> Result<()> {
    init_telemetry(TelemetryOptions::default())?;
    if !path.exists() {
        bail!("log file {} does not exist", path.display());
    }

    let metrics = EvaluationHarness::analyze_log(&path)?;
    println!("{}", metrics.summary());
    for session_id in &metrics.uncited {
        println!("uncited: {session_id}");
    }
    Ok(())
}

async fn eval_dataset_command(
    path: PathBuf,
    config: Option<PathBuf>,
    no_judge: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let config = ConfigLoader::load(config).context("failed to load configuration")?;
    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;

    let cases = load_dataset(&path)?;
    info!(cases = cases.len(), dataset = %path.display(), "running evaluation dataset");
    let services = ResearchServices::from_config(&config)?;

    let mut runner = DatasetRunner::new(&services);
    if !no_judge {
        runner = runner.with_scorer(AnswerRelevancyScorer::new(services.oracle().clone()));
    }
    let report = runner.run(&cases).await;

    for case in &report.cases {
        let relevancy = case
            .relevancy
            .map(|score| format!("{score:.2}"))
            .unwrap_or_else(|| "-".to_string());
        match &case.error {
            Some(err) => println!("[{}] failed: {err}", case.id),
            None => println!(
                "[{}] links: {} • relevancy: {relevancy}",
                case.id,
                if case.contains_links { "yes" } else { "no" }
            ),
        }
    }
    println!("{}", report.summary());

    if let Some(report_path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&report_path, json)
            .with_context(|| format!("failed to write report {}", report_path.display()))?;
    }
    Ok(())
}

fn forget_command(args: ForgetArgs) -> Result<()> {
    init_telemetry(TelemetryOptions::default())?;
    let dir = log_base_dir(args.log_dir.as_deref());
    let removed = remove_session_logs(&args.session, Some(&dir))?;
    println!(
        "Removed {removed} log record(s) for session {} from {}",
        args.session,
        dir.display()
    );
    Ok(())
}
