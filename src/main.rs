use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pootle_bridge::{
    config::Config,
    services::{
        file_watcher::{ImportWatcher, WatcherSettings},
        importer::Importer,
        notifier::TrommonsNotifier,
        pootle_client::{PootleApi, PootleClient, PootleError},
        processor::ImportProcessor,
        sync::TranslationSync,
    },
};

#[derive(Parser)]
#[command(name = "pootle-bridge", version, about = "Imports Trommons tasks into Pootle")]
struct Cli {
    /// Config file (default: ~/.pootle-bridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the inbox and import every task that shows up
    Watch {
        /// Poll the inbox instead of using native notifications
        #[arg(long)]
        poll: bool,
    },
    /// Import a single inbox entry and print the result; the entry is left in place
    Import { path: PathBuf },
    /// Download translations of a project into the outbox
    Sync {
        project: String,
        #[arg(long)]
        language: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pootle_bridge={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api: Arc<dyn PootleApi> =
        Arc::new(PootleClient::from_config(&config).context("Invalid Pootle API URL")?);

    match cli.command {
        Command::Watch { poll } => watch(config, api, poll).await,
        Command::Import { path } => {
            let processor = build_processor(&config, api);
            let task = processor
                .process(&path)
                .await
                .with_context(|| format!("Import of {} failed", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::Sync { project, language } => {
            let outbox = config
                .outbox_dir
                .clone()
                .context("outbox_dir must be configured to sync translations")?;
            let sync = TranslationSync::new(api, TrommonsNotifier::new(outbox));
            let report = sync
                .sync_project(&project, language.as_deref())
                .await
                .with_context(|| format!("Sync of '{}' failed", project))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn build_processor(config: &Config, api: Arc<dyn PootleApi>) -> ImportProcessor {
    let importer = Arc::new(Importer::new(api, config.translator_permissions.clone()));
    let notifier = config.outbox_dir.clone().map(TrommonsNotifier::new);
    ImportProcessor::new(importer, notifier)
}

async fn watch(config: Config, api: Arc<dyn PootleApi>, poll: bool) -> anyhow::Result<()> {
    config.check_inbox()?;

    // Bad credentials are fatal; an unreachable server only delays imports
    match api.check_auth().await {
        Ok(()) => tracing::info!("✅ Pootle API reachable at {}", config.api_url),
        Err(e @ PootleError::Unauthorized { .. }) => {
            return Err(e).context("Pootle rejected the configured credentials");
        }
        Err(e) => tracing::warn!("⚠️ Pootle not available yet: {}. Imports will be retried.", e),
    }

    let settings = WatcherSettings::from_config(&config)?;
    let processor = Arc::new(build_processor(&config, api));
    let watcher = ImportWatcher::new(settings, processor);

    let summary = if poll {
        watcher
            .watch_polling(config.poll_interval(), shutdown_signal())
            .await?
    } else {
        watcher.watch(shutdown_signal()).await?
    };

    tracing::info!(
        "Shutdown complete ({} imported this run)",
        summary.imported
    );
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        },
    }
}
