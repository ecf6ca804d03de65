//! Client configuration: defaults, then `SIRIUS_*` environment variables, then CLI flags.

use std::num::NonZeroUsize;
use std::time::Duration;

use sirius_protocol::{ProtocolGeneration, DEFAULT_LANGUAGE, STREAM_PATH};

use crate::error::{ClientError, Result};
use crate::tracker::RetentionPolicy;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;
/// Voice-cloning models are slow on CPU; a short request can still take a minute.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_HISTORY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub generation: ProtocolGeneration,
    pub language: String,
    /// `None` waits for audio forever.
    pub synthesis_timeout: Option<Duration>,
    pub retention: RetentionPolicy,
    /// Attach an increasing `request_id` to voice-clone control frames.
    pub tag_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: STREAM_PATH.to_string(),
            generation: ProtocolGeneration::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            synthesis_timeout: Some(DEFAULT_TIMEOUT),
            retention: RetentionPolicy::History(history_limit(DEFAULT_HISTORY)),
            tag_requests: false,
        }
    }
}

fn history_limit(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

impl ClientConfig {
    /// Defaults overridden by whichever `SIRIUS_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("SIRIUS_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("SIRIUS_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ClientError::Config(format!("SIRIUS_PORT '{port}': {e}")))?;
        }
        if let Some(path) = lookup("SIRIUS_PATH") {
            config.path = path;
        }
        if let Some(generation) = lookup("SIRIUS_PROTOCOL") {
            config.generation = generation.parse().map_err(ClientError::Config)?;
        }
        if let Some(language) = lookup("SIRIUS_LANGUAGE") {
            config.language = language;
        }
        if let Some(secs) = lookup("SIRIUS_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| ClientError::Config(format!("SIRIUS_TIMEOUT_SECS '{secs}': {e}")))?;
            config.synthesis_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(history) = lookup("SIRIUS_HISTORY") {
            config.retention = parse_retention(&history)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(ClientError::Config(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if self.language.trim().is_empty() {
            return Err(ClientError::Config("language must not be empty".to_string()));
        }
        Ok(())
    }

    /// Full WebSocket URL of the synthesis endpoint.
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}

/// `0` selects single-slot retention, any other number a history of that length.
pub fn parse_retention(value: &str) -> Result<RetentionPolicy> {
    let n: usize = value
        .trim()
        .parse()
        .map_err(|e| ClientError::Config(format!("history length '{value}': {e}")))?;
    Ok(match NonZeroUsize::new(n) {
        Some(max) => RetentionPolicy::History(max),
        None => RetentionPolicy::SingleSlot,
    })
}
