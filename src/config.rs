use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub limits: LimitsConfig,
    pub backend: BackendConfig,
    pub content: ContentConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Episodes one device may play per calendar day.
    pub daily_episode_limit: u32,
    /// Idle/session timeout; no frames for this long ends the session.
    pub session_timeout_minutes: u64,
    /// IANA time zone used for day-boundary computation (server-side,
    /// never the device clock).
    pub reference_timezone: String,
    /// Unflushed transcript messages tolerated before the session is failed.
    pub transcript_buffer_cap: usize,
    /// Persist the transcript snapshot every N appended messages.
    pub transcript_flush_every: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub voice: String,
    pub connect_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    pub episodes_per_season: u32,
    pub max_seasons: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub transcripts_path: String,
    pub profiles_path: String,
    pub ledger_path: String,
    pub prompts_path: String,
}

impl Config {
    /// Load configuration from `<path>.{toml,yaml,json}`, falling back to
    /// built-in defaults for anything the file does not set. Values can be
    /// overridden via `FABLE__`-prefixed environment variables
    /// (e.g. `FABLE__BACKEND__API_KEY`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "fable-gateway")?
            .set_default("service.bind", "0.0.0.0")?
            .set_default("service.port", 8000)?
            .set_default("limits.daily_episode_limit", 3)?
            .set_default("limits.session_timeout_minutes", 30)?
            .set_default("limits.reference_timezone", "UTC")?
            .set_default("limits.transcript_buffer_cap", 256)?
            .set_default("limits.transcript_flush_every", 5)?
            .set_default(
                "backend.url",
                "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview",
            )?
            .set_default("backend.api_key", "")?
            .set_default("backend.voice", "ballad")?
            .set_default("backend.connect_retries", 3)?
            .set_default("content.episodes_per_season", 7)?
            .set_default("content.max_seasons", 10)?
            .set_default("storage.transcripts_path", "data/transcripts")?
            .set_default("storage.profiles_path", "data/profiles.json")?
            .set_default("storage.ledger_path", "data/usage.json")?
            .set_default("storage.prompts_path", "prompts")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FABLE").separator("__"))
            .build()?;

        settings.try_deserialize().context("invalid configuration")
    }

    /// Parsed reference time zone for day-boundary computation.
    pub fn reference_timezone(&self) -> Result<chrono_tz::Tz> {
        self.limits
            .reference_timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid reference_timezone: {e}"))
    }
}
