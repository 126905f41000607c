use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use channelfeed_common::{config::load_config, AppConfig};
use channelfeed_sync::{open_store, ChannelSync, ProxyFileResolver, SyncRequest, SyncSettings};
use telegram_client::TelegramClient;

#[derive(Parser)]
#[command(name = "channelfeed", about = "Telegram channel ingestion and merge")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/channelfeed.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync pass
    Sync {
        /// Ignore posts older than this many hours (defaults to the config value)
        #[arg(long)]
        window_hours: Option<u64>,
        /// Top the live collection up from the seed snapshot afterwards
        #[arg(long)]
        seed_target: Option<usize>,
    },
    /// Top the live collection up from the seed snapshot
    Seed {
        #[arg(long)]
        target: usize,
    },
    /// Replace the live collection with the backup snapshot
    Restore,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("channelfeed failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "channelfeed=info,channelfeed_sync=info,channelfeed_common=info,telegram_client=info",
        )
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Ok(false) when the operation ran but did not succeed.
async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli.config)
        .with_context(|| format!("Specify --config <path> (tried {})", cli.config.display()))?;
    let env = AppConfig::from_env();

    let settings = SyncSettings::from_config(&config)?;
    let store = open_store(&config, &env).await?;
    let resolver = Arc::new(ProxyFileResolver::new(&config.files.proxy_base));

    let cancel = Arc::new(AtomicBool::new(false));
    let mut engine = ChannelSync::new(store, resolver, settings).with_cancel(cancel.clone());

    if let Some(token) = env.telegram_bot_token.clone() {
        let mut client = TelegramClient::with_timeout(token, config.sync.upstream_timeout());
        if let Some(base) = env.telegram_api_base.as_deref() {
            client = client.with_base_url(base);
        }
        engine = engine.with_source(Arc::new(client));
    } else {
        info!("No TELEGRAM_BOT_TOKEN set, upstream disabled");
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling before the next write");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    match cli.command {
        Command::Sync {
            window_hours,
            seed_target,
        } => {
            let window = window_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or_else(|| config.sync.window());
            let report = engine.run(SyncRequest { window, seed_target }).await;
            println!("{report}");
            Ok(!report.is_aborted())
        }
        Command::Seed { target } => {
            let report = engine.seed(target).await?;
            println!("{report}");
            Ok(true)
        }
        Command::Restore => {
            let report = engine.restore().await?;
            println!("{report}");
            Ok(true)
        }
    }
}
