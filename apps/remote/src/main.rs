use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{SessionController, SessionInput, SharedDispenserNames};
use storage::Storage;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod console;

use app::{Flow, Remote};
use config::{load_settings, load_settings_from, normalize_database_url, parse_cancel_policy};

#[derive(Parser, Debug)]
#[command(about = "Console remote for a multi-dispenser pill controller")]
struct Args {
    /// Settings file, defaults to ./remote.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Controller WebSocket url, e.g. ws://192.168.4.1:81
    #[arg(long)]
    controller_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    slot_count: Option<usize>,
    /// same_as_release or abort
    #[arg(long)]
    cancel_policy: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok())?,
        None => load_settings()?,
    };
    if let Some(v) = args.controller_url {
        settings.controller_url = v;
    }
    if let Some(v) = args.database_url {
        settings.database_url = v;
    }
    if let Some(v) = args.slot_count {
        settings.slot_count = v;
    }
    if let Some(raw) = args.cancel_policy {
        settings.cancel_policy = parse_cancel_policy(&raw)
            .with_context(|| format!("unknown cancel policy {raw:?}"))?;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    settings.validate()?;

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open local store {database_url}"))?;
    let device = storage.load_or_create_identity().await?;
    let names = SharedDispenserNames::new(
        storage
            .dispenser_names(&device, settings.slot_count)
            .await?,
    );
    info!(device = %device, controller = %settings.controller_url, "remote: starting");

    let (controller, handle) = SessionController::connect(
        &settings.controller_url,
        device.clone(),
        settings.session_config(),
        Arc::new(names.clone()),
    )
    .await?;
    println!("connected to {} as {device}; type `help` for commands", settings.controller_url);

    let remote = Remote::new(
        handle.clone(),
        storage,
        device,
        names,
        settings.slot_count,
        Duration::from_millis(settings.long_press_ms),
    );
    let printer = tokio::spawn(remote.clone().run_events(handle.subscribe_events()));
    let mut session_task = tokio::spawn(controller.run());

    let mut lines = LinesStream::new(BufReader::new(stdin()).lines());
    let finished = loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if remote.handle_line(&line).await? == Flow::Quit {
                        break None;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "remote: failed to read stdin");
                    break None;
                }
                None => break None,
            },
            joined = &mut session_task => break Some(joined),
        }
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            let _ = handle.send(SessionInput::Shutdown).await;
            session_task.await
        }
    };
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("remote: event printer did not finish");
    }

    joined.context("session task panicked")??;
    Ok(())
}
