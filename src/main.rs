//! # Imersão: reminder engine CLI
//!
//! Usage:
//!   imersao init-db                              # Create database and default config
//!   imersao run-cycle --dry-run                  # Preview one notification cycle
//!   imersao run-cycle --force                    # Send, bypassing cadence gates
//!   imersao watch                                # Run a cycle every `scheduler.interval_secs`
//!   imersao apply-template --template T --immersion I
//!   imersao risk | workload | buckets | sync-overdue

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use imersao_channels::SmtpMailer;
use imersao_core::{ConsoleConfig, MailTransport, SystemClock, TaskFilter};
use imersao_scheduler::{Collaborators, Console, CycleOptions, EngineSettings, SqliteStore};

#[derive(Parser)]
#[command(
    name = "imersao",
    version,
    about = "📋 Imersões: task generation and reminder engine"
)]
struct Cli {
    /// Config file (default: ~/.imersao/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database, seed default rules and write a config if missing.
    InitDb,

    /// Evaluate every notification rule once.
    RunCycle {
        /// Ignore cadence gates.
        #[arg(long)]
        force: bool,
        /// Render and log as preview; nothing is sent.
        #[arg(long)]
        dry_run: bool,
    },

    /// Mark overdue tasks and run a cycle on every interval tick until Ctrl-C.
    Watch {
        #[arg(long)]
        dry_run: bool,
        /// Override `scheduler.interval_secs`.
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Create the tasks of a template for an immersion.
    ApplyTemplate {
        #[arg(long)]
        template: String,
        #[arg(long)]
        immersion: String,
    },

    /// Notify consultant and designer about a newly created immersion.
    NotifyCreated {
        #[arg(long)]
        immersion: String,
        #[arg(long)]
        dry_run: bool,
    },

    /// Ranked at-risk immersions.
    Risk,

    /// Open, overdue and due-soon counts per responsible.
    Workload,

    /// Urgency bucket counts for open tasks.
    Buckets {
        #[arg(long)]
        immersion: Option<String>,
        #[arg(long)]
        responsible: Option<String>,
    },

    /// Set status `overdue` on open tasks past their due date.
    SyncOverdue,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<ConsoleConfig> {
    let config = match path {
        Some(p) => {
            let path = PathBuf::from(shellexpand::tilde(p).as_ref());
            let mut config = ConsoleConfig::load_from(&path)?;
            config.apply_env();
            config
        }
        None => ConsoleConfig::load()?,
    };
    Ok(config)
}

/// Builds the console. The SMTP relay is only required when something will be sent.
fn build_console(config: &ConsoleConfig, store: Arc<SqliteStore>, sends: bool) -> Result<Console> {
    let mailer: Option<Arc<dyn MailTransport>> = if sends {
        Some(Arc::new(SmtpMailer::new(&config.smtp)?))
    } else {
        None
    };
    let settings = EngineSettings {
        app_name: config.app_name.clone(),
        timezone: config.timezone(),
        max_actions: config.scheduler.max_actions,
        from: config.smtp.from_header(),
        reply_to: config.smtp.reply_to.clone(),
    };
    Ok(Console::new(
        Collaborators::from_store(store),
        mailer,
        Arc::new(SystemClock),
        settings,
    ))
}

async fn watch(console: &Console, interval_secs: u64, dry_run: bool) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let options = CycleOptions {
        force: false,
        dry_run,
    };
    tracing::info!("👀 Watching every {}s (dry_run={dry_run})", interval_secs.max(1));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = console.sync_overdue_statuses().await {
                    tracing::warn!("⚠️ Overdue sync failed: {e}");
                }
                // Cycles run one after another; a slow cycle delays the next tick.
                match console.run_notification_cycle(options).await {
                    Ok(report) => tracing::debug!(
                        "Cycle: {} sent, {} failed, {} previewed, {} skipped",
                        report.sent, report.failed, report.previewed, report.skipped
                    ),
                    Err(e) => tracing::error!("❌ Notification cycle failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Stopping watcher");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "imersao=debug,imersao_scheduler=debug,imersao_channels=debug"
    } else {
        "imersao=info,imersao_scheduler=info,imersao_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(SqliteStore::open(&config.database_path())?);

    match cli.command {
        Commands::InitDb => {
            let config_path = ConsoleConfig::default_path();
            if cli.config.is_none() && !config_path.exists() {
                config.save()?;
                println!("✅ Config written: {}", config_path.display());
            }
            println!("✅ Database ready: {}", config.database_path().display());
        }
        Commands::RunCycle { force, dry_run } => {
            let console = build_console(&config, store, !dry_run)?;
            let report = console
                .run_notification_cycle(CycleOptions { force, dry_run })
                .await?;
            print_json(&report)?;
        }
        Commands::Watch {
            dry_run,
            interval_secs,
        } => {
            let console = build_console(&config, store, !dry_run)?;
            let every = interval_secs.unwrap_or(config.scheduler.interval_secs);
            watch(&console, every, dry_run).await?;
        }
        Commands::ApplyTemplate {
            template,
            immersion,
        } => {
            let console = build_console(&config, store, false)?;
            print_json(&console.apply_template(&template, &immersion).await?)?;
        }
        Commands::NotifyCreated { immersion, dry_run } => {
            let console = build_console(&config, store, !dry_run)?;
            let options = CycleOptions {
                force: false,
                dry_run,
            };
            print_json(&console.notify_immersion_created(&immersion, options).await?)?;
        }
        Commands::Risk => {
            let console = build_console(&config, store, false)?;
            print_json(&console.immersion_risk().await?)?;
        }
        Commands::Workload => {
            let console = build_console(&config, store, false)?;
            print_json(&console.workload().await?)?;
        }
        Commands::Buckets {
            immersion,
            responsible,
        } => {
            let console = build_console(&config, store, false)?;
            let filter = TaskFilter {
                immersion_id: immersion,
                responsible_id: responsible,
                ..Default::default()
            };
            print_json(&console.buckets(&filter).await?)?;
        }
        Commands::SyncOverdue => {
            let console = build_console(&config, store, false)?;
            let changed = console.sync_overdue_statuses().await?;
            print_json(&serde_json::json!({ "updated": changed }))?;
        }
    }

    Ok(())
}
