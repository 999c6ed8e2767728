use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use codex_quota_core::usage::fetcher::TOOL_NAME;
use codex_quota_core::usage::{parse_transcript, DiskCache, RpcClient, UsageCache};
use codex_quota_core::{Settings, UsageFetcher};

mod cli;
mod report;

use cli::{CacheAction, Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    cli.merge_into(&mut settings);
    settings.validate();

    // Ctrl-C aborts in-flight fetches; children are killed by their guards
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command() {
        Command::Usage => run_usage(&cli, &settings, &cancel).await,
        Command::Account => run_account(&cli, &settings, &cancel).await,
        Command::Parse { file } => run_parse(&cli, &file),
        Command::Cache { action } => run_cache(action, &settings),
    }
}

fn setup_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("codex_quota=debug,codex_quota_core=debug")
        } else {
            EnvFilter::new("codex_quota=info,codex_quota_core=info")
        }
    });

    // stderr keeps stdout clean for --json
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run_usage(cli: &Cli, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let fetcher = UsageFetcher::from_settings(settings)?;
    let snapshot = if cli.refresh {
        fetcher.refresh(cancel).await
    } else {
        fetcher.get_usage(cancel).await
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", report::render_usage(&snapshot));
    }
    Ok(())
}

async fn run_account(cli: &Cli, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let info = RpcClient::new(settings)
        .account(cancel)
        .await
        .context("Failed to read account from codex app-server")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print!("{}", report::render_account(&info));
    }
    Ok(())
}

fn run_parse(cli: &Cli, file: &Path) -> Result<()> {
    let transcript = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read transcript from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read transcript: {:?}", file))?
    };

    let snapshot = parse_transcript(&transcript)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", report::render_usage(&snapshot));
    }
    Ok(())
}

fn run_cache(action: CacheAction, settings: &Settings) -> Result<()> {
    let cache = DiskCache::for_tool(TOOL_NAME, settings.cache_dir.as_deref())?;
    match action {
        CacheAction::Path => println!("{}", cache.path().display()),
        CacheAction::Clear => {
            cache.clear()?;
            tracing::info!("Removed {}", cache.path().display());
        }
    }
    Ok(())
}
