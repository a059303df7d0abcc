use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shipcheck::classifier;
use shipcheck::cli::{Cli, CliCommand};
use shipcheck::config::Config;
use shipcheck::debounce::Debouncer;
use shipcheck::error::{Error, Result};
use shipcheck::events::Dispatcher;
use shipcheck::model::OpenAiClient;
use shipcheck::pipeline::{AnalysisReport, Pipeline};
use shipcheck::platform::github::GitHubPlatform;
use shipcheck::rules::RuleCatalog;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        max_diff_chars = config.max_diff_chars,
        model = %config.model,
        rules = config.rules.len(),
        dry_run = config.dry_run,
        "config loaded"
    );

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: CliCommand, config: Config) -> Result<()> {
    let catalog = config.catalog()?;
    match command {
        CliCommand::Classify { diff, json } => classify(&catalog, diff.as_deref(), json),
        CliCommand::Rules { json } => list_rules(&catalog, json),
        CliCommand::Analyze { number } => {
            let pipeline = build_pipeline(catalog, config)?;
            let report = blocking(move || pipeline.analyze(number)).await?;
            print_report(&report);
            Ok(())
        }
        CliCommand::Check { number } => {
            let pipeline = build_pipeline(catalog, config)?;
            let verdict = blocking(move || pipeline.refresh_decision(number)).await?;
            println!("{}: {}", verdict.decision, verdict.message);
            Ok(())
        }
        CliCommand::Listen => {
            let debouncer = Debouncer::new(Duration::from_millis(config.debounce_ms));
            let pipeline = Arc::new(build_pipeline(catalog, config)?);
            let dispatcher = Dispatcher::new(pipeline, debouncer);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let dispatched = dispatcher.run(stdin).await?;
            info!(dispatched, "listener finished");
            Ok(())
        }
    }
}

fn build_pipeline(catalog: RuleCatalog, config: Config) -> Result<Pipeline> {
    let source = Arc::new(GitHubPlatform::new(&config));
    let model = Arc::new(OpenAiClient::new(&config)?);
    Ok(Pipeline::new(source, model, catalog, config))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Platform(format!("worker task failed: {e}")))?
}

fn classify(catalog: &RuleCatalog, diff_path: Option<&str>, json: bool) -> Result<()> {
    let diff = match diff_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let paths = classifier::paths_from_diff(&diff);
    let classification = classifier::classify(catalog, &paths, &diff);

    if json {
        let out = json!({
            "files": paths,
            "active": classification.active_ids(),
            "uncovered": classification.uncovered,
        });
        println!("{out:#}");
        return Ok(());
    }

    if classification.is_empty() {
        println!("No rules fired.");
    } else {
        println!("Active rules:");
        for rule in &classification.active {
            println!("  {:<26} {}", rule.id(), rule.rule().description);
        }
    }
    if !classification.uncovered.is_empty() {
        println!("Uncovered files:");
        for path in &classification.uncovered {
            println!("  {path}");
        }
    }
    Ok(())
}

fn list_rules(catalog: &RuleCatalog, json: bool) -> Result<()> {
    if json {
        let rules: Vec<_> = catalog.iter().map(|r| r.rule()).collect();
        let out = serde_json::to_string_pretty(&rules)
            .map_err(|e| Error::Rule(format!("failed to serialize rules: {e}")))?;
        println!("{out}");
        return Ok(());
    }
    for rule in catalog.iter() {
        println!("{:<26} {}", rule.id(), rule.rule().description);
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    if let Some(ref body) = report.checklist {
        println!("{body}");
    }
    println!(
        "#{} @ {}: {} ({})",
        report.number, report.head_sha, report.verdict.decision, report.verdict.message
    );
}
