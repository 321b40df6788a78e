//! AskSQL server
//!
//! Answers natural-language questions about a DuckDB database: a local
//! generation service writes the SQL, the guard vets it, DuckDB runs it.

use anyhow::Context;
use asksql_duck::Database;
use asksql_engine::{OllamaGenerator, Orchestrator, PipelineMetrics};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod config;
mod http;
mod logging;
mod startup;

use config::Config;
use startup::{maybe_seed, open_database};

#[derive(Parser)]
#[command(name = "asksql", version, about = "Ask questions of a DuckDB database in plain English")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and browser UI
    Serve,
    /// Answer one question and print the SQL and records
    Ask { question: String },
    /// Create and fill the demo sales tables
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_logging_env();
    logging::init();

    let database = Arc::new(open_database(&config.database)?);

    match cli.command {
        Command::Seed => {
            asksql_duck::demo::seed(&database)?;
            log_event!(level: tracing::Level::INFO, event: "demo_seeded", location: database.location());
            Ok(())
        }
        Command::Ask { question } => {
            maybe_seed(&database, &config.database)?;
            let orchestrator = build_orchestrator(&config, database, None)?;

            match orchestrator.ask(&question).await {
                Ok(answer) => {
                    println!("{}", answer.sql);
                    println!("{}", serde_json::to_string_pretty(&answer.records)?);
                    Ok(())
                }
                Err(e) => anyhow::bail!("{} stage failed: {}", e.stage(), e),
            }
        }
        Command::Serve => {
            maybe_seed(&database, &config.database)?;
            serve(config, database).await
        }
    }
}

fn build_orchestrator(
    config: &Config,
    database: Arc<Database>,
    metrics: Option<PipelineMetrics>,
) -> anyhow::Result<Orchestrator> {
    let generator = OllamaGenerator::new(config.generator.clone())?;
    let orchestrator =
        Orchestrator::with_database(database, Arc::new(generator), config.orchestrator())?;
    Ok(match metrics {
        Some(metrics) => orchestrator.with_metrics(metrics),
        None => orchestrator,
    })
}

async fn serve(config: Config, database: Arc<Database>) -> anyhow::Result<()> {
    let registry = prometheus::Registry::new();
    let metrics = PipelineMetrics::register(&registry)?;
    let orchestrator = build_orchestrator(&config, database, Some(metrics))?;

    info!(
        model = %config.generator.model,
        endpoint = %config.generator.endpoint,
        "Using generation service"
    );

    let app = http::router(
        http::AppState {
            orchestrator: Arc::new(orchestrator),
            registry,
        },
        &config.server.static_dir,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
