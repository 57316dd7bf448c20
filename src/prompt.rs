//! Episode prompt lookup.
//!
//! Prompts are the per-episode instructions handed to the backend when a
//! session opens. A missing prompt is an authorization failure: without
//! instructions there is no episode to run.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::SessionError;

#[async_trait]
pub trait PromptResolver: Send + Sync {
    async fn get(&self, season: u32, episode: u32) -> Result<Option<String>, SessionError>;
}

/// Prompts on disk, one file per episode named `s{NN}e{NN}.txt`.
pub struct FsPromptResolver {
    dir: PathBuf,
}

impl FsPromptResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, season: u32, episode: u32) -> PathBuf {
        self.dir.join(format!("s{season:02}e{episode:02}.txt"))
    }
}

#[async_trait]
impl PromptResolver for FsPromptResolver {
    async fn get(&self, season: u32, episode: u32) -> Result<Option<String>, SessionError> {
        match tokio::fs::read_to_string(self.path_for(season, episode)).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Storage(format!("read prompt: {e}"))),
        }
    }
}

pub struct MemoryPromptResolver {
    prompts: Mutex<HashMap<(u32, u32), String>>,
}

impl MemoryPromptResolver {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, season: u32, episode: u32, prompt: impl Into<String>) {
        self.prompts
            .lock()
            .await
            .insert((season, episode), prompt.into());
    }
}

impl Default for MemoryPromptResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptResolver for MemoryPromptResolver {
    async fn get(&self, season: u32, episode: u32) -> Result<Option<String>, SessionError> {
        Ok(self.prompts.lock().await.get(&(season, episode)).cloned())
    }
}
