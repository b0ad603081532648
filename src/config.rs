#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
};

use crate::generation::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, PromptTemplates};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CHANNELS_PATH: &str = "channels.toml";
pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";

/// Secrets and file locations for a run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub youtube_api_key: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Only needed when videos are actually updated.
    pub client_secrets_file: Option<PathBuf>,
    pub credentials_file: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub openai_model: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let youtube_api_key = lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))?;
    let openai_api_key = lookup_value("OPENAI_API_KEY", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("OPENAI_API_KEY not set"))?;
    let openai_model = overrides
        .openai_model
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("OPENAI_MODEL", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
    let openai_base_url = lookup_value("OPENAI_BASE_URL", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
    let client_secrets_file =
        lookup_value("YOUTUBE_CLIENT_SECRETS_FILE", file_vars, &env_lookup).map(PathBuf::from);
    let credentials_file = overrides
        .credentials_file
        .or_else(|| {
            lookup_value("YOUTUBE_CREDENTIALS_FILE", file_vars, &env_lookup).map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH));
    Ok(Settings {
        youtube_api_key,
        openai_api_key,
        openai_model,
        openai_base_url,
        client_secrets_file,
        credentials_file,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Parses a dotenv-style file. A missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// One `[[channels]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Upload playlist id (`UU…`).
    #[serde(default)]
    pub uploads_playlist: Option<String>,
    /// Channel id (`UC…`); used to derive the upload playlist.
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl ChannelConfig {
    /// Every channel's uploads live in a playlist whose id swaps the `UC`
    /// prefix of the channel id for `UU`.
    pub fn uploads_playlist_id(&self) -> Result<String> {
        if let Some(playlist) = self.uploads_playlist.as_deref().map(str::trim)
            && !playlist.is_empty()
        {
            return Ok(playlist.to_string());
        }
        let channel_id = self
            .channel_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "channel {} needs either uploads_playlist or channel_id",
                    self.name
                )
            })?;
        match channel_id.strip_prefix("UC") {
            Some(rest) if !rest.is_empty() => Ok(format!("UU{rest}")),
            _ => bail!(
                "channel {}: cannot derive uploads playlist from channel id {channel_id}",
                self.name
            ),
        }
    }
}

/// Contents of the channels file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub prompts: PromptTemplates,
}

impl RunConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(raw).context("parsing channels file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            bail!("no channels configured");
        }
        let mut names = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                bail!("channel entries need a non-empty name");
            }
            if !names.insert(channel.name.as_str()) {
                bail!("channel {} configured more than once", channel.name);
            }
            channel.uploads_playlist_id()?;
        }
        Ok(())
    }
}

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    RunConfig::parse(&raw).with_context(|| format!("Loading {}", path.display()))
}
