use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fable_gateway::backend::OpenAiConnector;
use fable_gateway::ledger::{FsLedgerStore, UsageLedger};
use fable_gateway::profile::{FsProfileStore, Profiles};
use fable_gateway::prompt::FsPromptResolver;
use fable_gateway::transcript::{FsTranscriptStore, RecorderConfig, TranscriptStore};
use fable_gateway::{
    create_router, AppState, Config, DeviceSessionRegistry, SessionLifecycle, SignalOrCleanClose,
};

#[derive(Parser)]
#[command(
    name = "fable-gateway",
    about = "Session gateway between audio devices and a conversational AI backend"
)]
struct Args {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/fable-gateway")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    let tz = cfg.reference_timezone()?;

    info!(service = %cfg.service.name, "starting");

    let registry = Arc::new(DeviceSessionRegistry::new());
    let ledger = Arc::new(
        UsageLedger::load(
            cfg.limits.daily_episode_limit,
            tz,
            Arc::new(FsLedgerStore::new(&cfg.storage.ledger_path)),
        )
        .await
        .context("loading usage ledger")?,
    );
    let profiles = Arc::new(Profiles::new(
        Arc::new(FsProfileStore::new(&cfg.storage.profiles_path)),
        cfg.content.episodes_per_season,
        cfg.content.max_seasons,
    ));
    let prompts = Arc::new(FsPromptResolver::new(&cfg.storage.prompts_path));
    let connector = Arc::new(OpenAiConnector::new(cfg.backend.clone()));
    let transcripts: Arc<dyn TranscriptStore> =
        Arc::new(FsTranscriptStore::new(&cfg.storage.transcripts_path));

    let shutdown = CancellationToken::new();
    let lifecycle = Arc::new(SessionLifecycle::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        profiles,
        prompts,
        connector,
        Arc::clone(&transcripts),
        RecorderConfig {
            buffer_cap: cfg.limits.transcript_buffer_cap,
            flush_every: cfg.limits.transcript_flush_every,
        },
        Duration::from_secs(cfg.limits.session_timeout_minutes * 60),
        Arc::new(SignalOrCleanClose),
    ));

    let state = AppState {
        lifecycle,
        registry,
        ledger,
        transcripts,
        service_name: cfg.service.name.clone(),
        shutdown: shutdown.clone(),
    };
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.bind, cfg.service.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, winding down sessions");
            shutdown.cancel();
        })
        .await
        .context("http server")?;

    Ok(())
}
