use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use cronwarden::config::{Config, LogFormat, LoggingConfig, SYSTEM_CONFIG_PATH};
use cronwarden::scheduler::{self, WorkflowRun};

#[derive(Parser)]
#[command(
    name = "cronwarden",
    about = "Cron-triggered workflow controller with Allow/Forbid/Replace concurrency policies",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (falls back to /etc/cronwarden/cronwarden.toml, then defaults)
    #[arg(long, global = true, env = "CRONWARDEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (controller workers + status API)
    Serve {
        /// Bind address, overrides api.bind from the config
        #[arg(long)]
        bind: Option<String>,
    },

    /// Load and validate every cron workflow in the config
    Validate,

    /// Evaluate one workflow's current tick and print the resulting action
    Evaluate {
        /// Workflow name
        #[arg(long)]
        workflow: String,

        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,

        /// JSON file with the workflow's known runs
        #[arg(long)]
        runs: Option<PathBuf>,
    },

    /// Preview what will fire in the next N hours
    Preview {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },

    /// Show stored runs for a workflow
    History {
        /// Workflow name
        #[arg(long)]
        workflow: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Load the config and describe where it came from.
fn load_config(path: Option<&PathBuf>) -> Result<(Config, String)> {
    match path {
        Some(p) => Ok((Config::load(p)?, p.display().to_string())),
        None => {
            let source = if Path::new(SYSTEM_CONFIG_PATH).exists() {
                SYSTEM_CONFIG_PATH.to_string()
            } else {
                "defaults".to_string()
            };
            Ok((Config::load_or_default()?, source))
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid --at time '{}'", raw))?
        .with_timezone(&Utc))
}

fn read_runs(path: &PathBuf) -> Result<Vec<WorkflowRun>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read runs file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse runs file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);
    tracing::info!(
        %source,
        workflows = config.cron_workflows.len(),
        "Loaded configuration"
    );

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, workflows = config.cron_workflows.len(), "Starting cronwarden daemon");
            cronwarden::serve(config).await?;
        }
        Commands::Validate => {
            if config.cron_workflows.is_empty() {
                println!("No cron workflows configured.");
            } else {
                println!("{:<24} | {:<16} | {:<8} | {:<8} | Limits (ok/failed)", "Name", "Schedule", "Policy", "Deadline");
                println!("{:-<24}-|-{:-<16}-|-{:-<8}-|-{:-<8}-|-{:-<18}", "", "", "", "", "");
                for spec in &config.cron_workflows {
                    let deadline = spec
                        .starting_deadline_seconds
                        .map(|d| format!("{}s", d))
                        .unwrap_or_else(|| "none".to_string());
                    println!(
                        "{:<24} | {:<16} | {:<8} | {:<8} | {}/{}",
                        spec.name,
                        spec.schedule,
                        spec.concurrency_policy.to_string(),
                        deadline,
                        spec.successful_jobs_history_limit,
                        spec.failed_jobs_history_limit
                    );
                }
                println!("\n{} cron workflow(s) valid.", config.cron_workflows.len());
            }
        }
        Commands::Evaluate { workflow, at, runs } => {
            let spec = config
                .workflow(&workflow)
                .with_context(|| format!("cron workflow '{}' not found", workflow))?;
            let now = match at {
                Some(raw) => parse_time(&raw)?,
                None => Utc::now(),
            };
            let mut runs = match runs {
                Some(path) => read_runs(&path)?,
                None => Vec::new(),
            };
            let before = runs.len();
            runs.retain(|r| r.spec_name == spec.name);
            if runs.len() < before {
                tracing::warn!(
                    workflow = %spec.name,
                    ignored = before - runs.len(),
                    "Ignoring runs that belong to other workflows"
                );
            }

            let action = scheduler::evaluate(spec, now, &runs)?;
            tracing::debug!(workflow = %spec.name, tick = ?action.scheduled_time(), "Evaluated");
            println!("{}", serde_json::to_string_pretty(&action)?);
        }
        Commands::Preview { hours } => {
            let preview =
                scheduler::cron::preview_next_runs(&config.cron_workflows, Utc::now(), hours)?;
            if preview.is_empty() {
                println!("No runs scheduled in next {} hours.", hours);
            } else {
                println!("Upcoming runs (next {} hours):", hours);
                for (time, name) in preview {
                    println!("{} : {}", time.to_rfc3339(), name);
                }
            }
        }
        Commands::History { workflow } => {
            if config.workflow(&workflow).is_none() {
                anyhow::bail!("cron workflow '{}' not found", workflow);
            }
            let pool = cronwarden::storage::open_pool(&config.storage.db_path)?;
            let store = cronwarden::storage::SqliteRunStore::new(pool);
            let runs = store.list_for_spec(&workflow)?;

            if runs.is_empty() {
                println!("No runs recorded for '{}'.", workflow);
            } else {
                println!("{:<36} | {:<9} | {:<25} | Finished", "Run", "Status", "Started");
                println!("{:-<36}-|-{:-<9}-|-{:-<25}-|-{:-<25}", "", "", "", "");
                for run in runs.iter().rev() {
                    println!(
                        "{:<36} | {:<9} | {:<25} | {}",
                        run.id,
                        run.status.to_string(),
                        run.started_at.to_rfc3339(),
                        run.finished_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
    }

    Ok(())
}
