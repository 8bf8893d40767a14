//! Static configuration for the forwarder
//!
//! Values come from the process environment after a `.env` file has been
//! loaded with dotenvy. The interval and start id can be written back to the
//! same `.env` file at runtime (see [`EnvFile`]).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::{write_atomic, MessageId, PROGRESS_FILE};
use crate::state::SettingsSink;

pub const SESSION_NAME: &str = "session_bot_forwarder";
pub const ENV_FILE: &str = ".env";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 10;

pub const ENV_API_ID: &str = "API_ID";
pub const ENV_SOURCE_CHANNEL: &str = "SOURCE_CHANNEL";
pub const ENV_TARGET_CHANNEL: &str = "TARGET_CHANNEL";
pub const ENV_OWNER_ID: &str = "OWNER_ID";
pub const ENV_START_FROM_ID: &str = "START_FROM_ID";
pub const ENV_INTERVAL_MINUTES: &str = "FORWARD_INTERVAL_MINUTES";
pub const ENV_SESSION_NAME: &str = "SESSION_NAME";
pub const ENV_PROGRESS_FILE: &str = "PROGRESS_FILE";
pub const ENV_ENV_FILE: &str = "ENV_FILE";
pub const ENV_AUTO_START: &str = "AUTO_START";

/// Chat entity types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEntity {
    /// Channel or supergroup by bare ID
    Channel(i64),
    /// Basic group chat by ID
    Chat(i64),
    /// Public username (without @)
    Username(String),
}

impl ChatEntity {
    pub fn username(name: &str) -> Self {
        let name = name.strip_prefix('@').unwrap_or(name);
        ChatEntity::Username(name.to_string())
    }

    /// Parse a channel reference as written in `.env`.
    ///
    /// - `-1001234567890` (bot API form) is channel `1234567890`
    /// - `-4567` is basic group `4567`
    /// - `1234567890` is a channel id
    /// - `@name`, `name` and `https://t.me/name` are usernames
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::ConfigError("empty chat reference".to_string()));
        }

        if let Some(rest) = input.strip_prefix("-100") {
            if let Ok(id) = rest.parse::<i64>() {
                return Ok(ChatEntity::Channel(id));
            }
        }
        if let Some(rest) = input.strip_prefix('-') {
            return rest
                .parse::<i64>()
                .map(ChatEntity::Chat)
                .map_err(|_| Error::ConfigError(format!("invalid chat id: {}", input)));
        }
        if let Ok(id) = input.parse::<i64>() {
            return Ok(ChatEntity::Channel(id));
        }

        let name = input
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("t.me/")
            .trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            return Err(Error::ConfigError(format!("invalid chat reference: {}", input)));
        }
        Ok(ChatEntity::username(name))
    }
}

impl std::fmt::Display for ChatEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatEntity::Channel(id) => write!(f, "channel {}", id),
            ChatEntity::Chat(id) => write!(f, "chat {}", id),
            ChatEntity::Username(name) => write!(f, "@{}", name),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub api_id: i32,
    pub session_name: String,
    pub lock_file: String,
    pub source_channel: ChatEntity,
    pub target_channel: ChatEntity,
    /// Operator allowed to issue commands; 0 disables the command surface.
    pub owner_id: i64,
    pub start_from_id: MessageId,
    pub interval_minutes: u64,
    pub progress_file: PathBuf,
    pub env_file: PathBuf,
    pub auto_start: bool,
}

impl Config {
    /// Load `.env` and build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        // Try to load from current directory first, then parent
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| Error::ConfigError(format!("{} is not set", key)))
        };

        let api_id = parse_number::<i32>(ENV_API_ID, &require(ENV_API_ID)?)?;
        let source_channel = ChatEntity::parse(&require(ENV_SOURCE_CHANNEL)?)?;
        let target_channel = ChatEntity::parse(&require(ENV_TARGET_CHANNEL)?)?;

        let owner_id = match get(ENV_OWNER_ID) {
            Some(v) => parse_number::<i64>(ENV_OWNER_ID, &v)?,
            None => 0,
        };
        let start_from_id = match get(ENV_START_FROM_ID) {
            Some(v) => parse_number::<MessageId>(ENV_START_FROM_ID, &v)?,
            None => 0,
        };
        if start_from_id < 0 {
            return Err(Error::ConfigError(format!(
                "{} must be non-negative, got {}",
                ENV_START_FROM_ID, start_from_id
            )));
        }
        let interval_minutes = match get(ENV_INTERVAL_MINUTES) {
            Some(v) => parse_number::<u64>(ENV_INTERVAL_MINUTES, &v)?,
            None => DEFAULT_INTERVAL_MINUTES,
        };

        let session_name = get(ENV_SESSION_NAME).unwrap_or_else(|| SESSION_NAME.to_string());
        let lock_file = format!("{}.lock", session_name);

        Ok(Self {
            api_id,
            session_name,
            lock_file,
            source_channel,
            target_channel,
            owner_id,
            start_from_id,
            interval_minutes,
            progress_file: get(ENV_PROGRESS_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(PROGRESS_FILE)),
            env_file: get(ENV_ENV_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(ENV_FILE)),
            auto_start: get(ENV_AUTO_START).map(|v| parse_flag(&v)).unwrap_or(false),
        })
    }

    pub fn session_file(&self) -> String {
        format!("{}.session", self.session_name)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::ConfigError(format!("{} must be an integer, got '{}'", key, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Writes runtime setting changes back into a dotenv file.
///
/// Existing `KEY=value` lines are replaced in place; unknown keys are appended.
/// Comments and unrelated lines are preserved.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let updated = upsert_line(&existing, key, value);
        write_atomic(&self.path, updated.as_bytes())?;
        debug!(path = %self.path.display(), key, value, "Setting persisted");
        Ok(())
    }
}

impl SettingsSink for EnvFile {
    fn persist(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, value)
    }
}

fn upsert_line(content: &str, key: &str, value: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let matches_key = body
                .split_once('=')
                .map(|(k, _)| k.trim() == key)
                .unwrap_or(false);
            if matches_key && !replaced {
                replaced = true;
                format!("{}={}", key, value)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
