use anyhow::{Context, Result};
use bms_engine::{Engine, EngineConfig};
use bms_storage::PgStore;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bms-cli")]
#[command(about = "BMS tender tracking command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the API, plus the search scheduler when enabled.
    Serve,
    /// Execute every due scheduled search once and exit.
    Tick,
    /// Apply database migrations.
    Migrate,
    /// Write the dashboard brief and parquet snapshots.
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Tick => {
            let engine = Engine::from_config(config).await?;
            let summary = engine.scheduler.tick(chrono::Utc::now()).await?;
            println!(
                "tick complete: due={} claimed={} succeeded={} failed={} timed_out={} claim_errors={}",
                summary.due,
                summary.claimed,
                summary.succeeded,
                summary.failed,
                summary.timed_out,
                summary.claim_errors
            );
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for migrate")?;
            let pool = bms_storage::connect(url).await?;
            PgStore::new(pool).migrate().await?;
            println!("migrations applied");
        }
        Commands::Report => {
            let engine = Engine::from_config(config).await?;
            let report = engine.export_snapshot().await?;
            println!(
                "report complete: run_id={} files={} manifest={}",
                report.run_id,
                report.manifest.files.len(),
                report.manifest_path.display()
            );
        }
    }

    Ok(())
}

async fn serve(config: EngineConfig) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let mut jobs = engine.maybe_build_scheduler().await?;
    if let Some(sched) = jobs.as_mut() {
        sched.start().await.context("starting search scheduler")?;
        tracing::info!(cron = %engine.config.scheduler_cron, "search scheduler started");
    }

    bms_web::serve(engine, shutdown_signal()).await?;

    if let Some(mut sched) = jobs {
        sched.shutdown().await.context("stopping search scheduler")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
