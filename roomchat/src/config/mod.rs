//! Client configuration: session identity plus the chat timing knobs.
//!
//! Values are taken from, in order of precedence, command-line flags (or
//! their `ROOMCHAT_*` environment variables), `roomchat/config.toml` under
//! the platform config directory, and the built-in [`ChatConfig`] defaults.
//!
//! The default file may be absent. A file named with `--config` must exist.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read, or an explicit path is missing.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ConfigFile`].
    #[error("invalid config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// --- File layout ---

/// `config.toml` as written on disk; every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    chat: ChatFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    peer: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    retry_window_secs: Option<u64>,
    edit_window_secs: Option<u64>,
    event_buffer: Option<usize>,
    title_max_len: Option<usize>,
    requeue_max_age_secs: Option<u64>,
}

// --- Resolved values ---

/// Timing and sizing knobs consumed by `ChatManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// How long an outgoing message may stay unsent before it is flagged
    /// for manual retry.
    pub retry_window: Duration,
    /// How long after creation a message may still be edited.
    pub edit_window: Duration,
    /// Capacity of the room event channel.
    pub event_buffer: usize,
    /// Maximum room title length in characters.
    pub title_max_len: usize,
    /// Age after which an unsent message expires and can no longer be retried.
    pub requeue_max_age: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            retry_window: Duration::from_secs(5),
            edit_window: Duration::from_secs(3600),
            event_buffer: 256,
            title_max_len: 30,
            requeue_max_age: Duration::from_secs(60),
        }
    }
}

/// Configuration after layering flags over the file.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Local user handle.
    pub user_id: Option<String>,
    /// Peer for the demo conversation.
    pub peer: Option<String>,
    /// Chat subsystem config.
    pub chat: ChatConfig,
}

impl ClientConfig {
    /// Reads the config file and layers `cli` over it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = ChatConfig::default();

        Self {
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            peer: cli.peer.clone().or_else(|| file.session.peer.clone()),
            chat: ChatConfig {
                retry_window: file
                    .chat
                    .retry_window_secs
                    .map_or(defaults.retry_window, Duration::from_secs),
                edit_window: file
                    .chat
                    .edit_window_secs
                    .map_or(defaults.edit_window, Duration::from_secs),
                event_buffer: file.chat.event_buffer.unwrap_or(defaults.event_buffer),
                title_max_len: file.chat.title_max_len.unwrap_or(defaults.title_max_len),
                requeue_max_age: file
                    .chat
                    .requeue_max_age_secs
                    .map_or(defaults.requeue_max_age, Duration::from_secs),
            },
        }
    }
}

/// Command-line flags of the demo binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chat room lifecycle and message delivery demo")]
pub struct CliArgs {
    /// Local user handle.
    #[arg(long, env = "ROOMCHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Peer to open a private room with.
    #[arg(long, env = "ROOMCHAT_PEER")]
    pub peer: Option<String>,

    /// Config file to use instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `EnvFilter` directive, e.g. `debug` or `roomchat=trace`.
    #[arg(long, default_value = "info", env = "ROOMCHAT_LOG")]
    pub log_level: String,

    /// Log file; defaults to `roomchat.log` in the temp directory.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// --- File loading ---

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(path) = explicit_path {
        return match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(source) => Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            }),
        };
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("roomchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(ConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
