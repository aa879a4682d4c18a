//! Runtime configuration: built-in defaults, then an optional `KEY=VALUE`
//! file, then the process environment. Binaries apply CLI flags last.

use anyhow::{Context, Result, anyhow, bail};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{engine, retention, updater};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vidfetch-env";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_SCRATCH_DIR: &str = "downloads";
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SERVE_DELETE_DELAY: Duration = Duration::from_secs(30);

/// Values found in one configuration source; `None` means "not mentioned".
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scratch_dir: Option<PathBuf>,
    pub ytdlp_program: Option<PathBuf>,
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub update_interval_secs: Option<u64>,
    pub update_on_start: Option<bool>,
    pub update_command: Option<String>,
    pub update_timeout_secs: Option<u64>,
    pub serve_delete_delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub scratch_dir: PathBuf,
    pub ytdlp_program: PathBuf,
    pub retention_max_age: Duration,
    pub sweep_interval: Duration,
    pub update_interval: Duration,
    pub update_on_start: bool,
    pub update_command: Vec<String>,
    pub update_timeout: Duration,
    pub serve_delete_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            ytdlp_program: PathBuf::from(engine::DEFAULT_PROGRAM),
            retention_max_age: retention::DEFAULT_MAX_AGE,
            sweep_interval: retention::DEFAULT_SWEEP_INTERVAL,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            update_on_start: true,
            update_command: updater::parse_command(updater::DEFAULT_UPDATE_COMMAND),
            update_timeout: updater::DEFAULT_UPDATE_TIMEOUT,
            serve_delete_delay: DEFAULT_SERVE_DELETE_DELAY,
        }
    }
}

impl EnvConfig {
    /// Records one `KEY=VALUE` pair. Unknown keys are ignored; `source` only
    /// appears in error messages.
    pub fn apply(&mut self, key: &str, value: &str, source: &str) -> Result<()> {
        let value = value.trim().trim_matches('"');
        match key {
            "VIDFETCH_HOST" => {
                if !value.is_empty() {
                    self.host = Some(value.to_string());
                }
            }
            "VIDFETCH_PORT" | "PORT" => self.port = Some(parse_value(key, value, source)?),
            "VIDFETCH_SCRATCH_DIR" => self.scratch_dir = Some(PathBuf::from(value)),
            "VIDFETCH_YTDLP" => self.ytdlp_program = Some(PathBuf::from(value)),
            "VIDFETCH_RETENTION_SECS" => {
                self.retention_secs = Some(parse_value(key, value, source)?)
            }
            "VIDFETCH_SWEEP_INTERVAL_SECS" => {
                self.sweep_interval_secs = Some(parse_interval(key, value, source)?)
            }
            "VIDFETCH_UPDATE_INTERVAL_SECS" => {
                self.update_interval_secs = Some(parse_interval(key, value, source)?)
            }
            "VIDFETCH_UPDATE_ON_START" => {
                self.update_on_start = Some(parse_bool(key, value, source)?)
            }
            "VIDFETCH_UPDATE_COMMAND" => self.update_command = Some(value.to_string()),
            "VIDFETCH_UPDATE_TIMEOUT_SECS" => {
                self.update_timeout_secs = Some(parse_value(key, value, source)?)
            }
            "VIDFETCH_SERVE_DELETE_DELAY_SECS" => {
                self.serve_delete_delay_secs = Some(parse_value(key, value, source)?)
            }
            _ => {}
        }
        Ok(())
    }

    /// Overlays every value set in `self` onto `config`.
    pub fn merge_into(self, config: &mut ServiceConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.scratch_dir {
            config.scratch_dir = dir;
        }
        if let Some(program) = self.ytdlp_program {
            config.ytdlp_program = program;
        }
        if let Some(secs) = self.retention_secs {
            config.retention_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.update_interval_secs {
            config.update_interval = Duration::from_secs(secs);
        }
        if let Some(flag) = self.update_on_start {
            config.update_on_start = flag;
        }
        if let Some(command) = self.update_command {
            config.update_command = updater::parse_command(&command);
        }
        if let Some(secs) = self.update_timeout_secs {
            config.update_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.serve_delete_delay_secs {
            config.serve_delete_delay = Duration::from_secs(secs);
        }
    }
}

fn parse_value<T>(key: &str, value: &str, source: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key} from {source}"))
}

fn parse_interval(key: &str, value: &str, source: &str) -> Result<u64> {
    let secs: u64 = parse_value(key, value, source)?;
    if secs == 0 {
        bail!("Parsing {key} from {source}: interval must be at least one second");
    }
    Ok(secs)
}

fn parse_bool(key: &str, value: &str, source: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("Parsing {key} from {source}: {other:?} is not a boolean")),
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let source = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            cfg.apply(key.trim(), value, &source)?;
        }
    }
    Ok(Some(cfg))
}

pub fn env_overrides<I>(vars: I) -> Result<EnvConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut cfg = EnvConfig::default();
    for (key, value) in vars {
        cfg.apply(&key, &value, "environment")?;
    }
    Ok(cfg)
}

/// Defaults, then `path` if it exists, then the process environment.
pub fn load_service_config(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    load_service_config_from(path, std::env::vars())
}

pub fn load_service_config_from<I>(path: impl AsRef<Path>, vars: I) -> Result<ServiceConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config = ServiceConfig::default();
    if let Some(file_cfg) = read_env_config(path.as_ref())? {
        file_cfg.merge_into(&mut config);
    }
    env_overrides(vars)?.merge_into(&mut config);
    Ok(config)
}
