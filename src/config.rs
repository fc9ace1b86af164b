#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Everything the server needs at startup. Built once and handed to the
/// handler set; nothing here changes while the process runs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub downloads_dir: PathBuf,
    pub www_root: PathBuf,
    pub ytdlp_bin: PathBuf,
}

/// Values coming from the command line. They win over the process
/// environment, which wins over the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub downloads_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_server_config(overrides: ConfigOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_server_config(&file_vars, env_var_string, overrides))
}

fn build_server_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> ServerConfig {
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("PORT", file_vars, &env_lookup).and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let downloads_dir = path_setting(
        overrides.downloads_dir,
        "DOWNLOADS_DIR",
        DEFAULT_DOWNLOADS_DIR,
        file_vars,
        &env_lookup,
    );
    let www_root = path_setting(
        overrides.www_root,
        "WWW_ROOT",
        DEFAULT_WWW_ROOT,
        file_vars,
        &env_lookup,
    );
    let ytdlp_bin = path_setting(
        overrides.ytdlp_bin,
        "YTDLP_BIN",
        DEFAULT_YTDLP_BIN,
        file_vars,
        &env_lookup,
    );

    ServerConfig {
        port,
        host,
        downloads_dir,
        www_root,
        ytdlp_bin,
    }
}

fn path_setting(
    cli: Option<PathBuf>,
    key: &str,
    default: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> PathBuf {
    cli.or_else(|| lookup_value(key, file_vars, env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
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
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a dotenv-style file. A missing file is not an error.
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
