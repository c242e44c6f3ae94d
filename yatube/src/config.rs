use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "yatube", about = "Small social blogging site")]
pub struct Cli {
    /// Bind address (host:port); wins over --port.
    #[arg(long)]
    pub bind: Option<String>,
    /// Port to listen on at 127.0.0.1.
    #[arg(long)]
    pub port: Option<u16>,
    /// Verbose logging on or off.
    #[arg(long)]
    pub logging: Option<bool>,
    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Administrator account created on first start.
#[derive(Clone, Deserialize)]
pub struct Bootstrap {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// Socket address of the HTTP listener.
    pub bind: String,
    /// Holds `yatube.db`, the `media/` store and `secret.key`.
    pub data_dir: PathBuf,
    pub max_upload_mb: u64,
    pub logging_enabled: bool,
    /// Only consulted while the user table is empty.
    pub bootstrap: Option<Bootstrap>,
    /// Posts per feed page.
    pub page_size: usize,
}

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 5;
const DEFAULT_CONFIG_PATH: &str = "config/yatube.toml";

pub fn default_page_size() -> usize {
    10
}

/// Shape of the TOML file. Every table and key is optional.
#[derive(Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    bootstrap: Option<Bootstrap>,
    server: ServerSection,
    logging: LoggingSection,
    pagination: PaginationSection,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ServerSection {
    port: Option<u16>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoggingSection {
    enabled: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PaginationSection {
    page_size: Option<usize>,
}

/// Value of an environment variable, ignored when unset or unparsable.
fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn read_file(path: &Path) -> Result<FileConfig> {
    match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(_) => Ok(FileConfig::default()),
    }
}

impl Config {
    /// Layer defaults, the config file, environment variables and CLI flags,
    /// later layers winning.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .or_else(|| env_value::<String>("YATUBE_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file = read_file(&path)?;

        let port = cli
            .port
            .or_else(|| env_value("YATUBE_PORT"))
            .or(file.server.port)
            .unwrap_or(DEFAULT_PORT);
        let logging_enabled = cli
            .logging
            .or_else(|| env_value("YATUBE_LOGGING"))
            .or(file.logging.enabled)
            .unwrap_or(true);
        let page_size = file.pagination.page_size.unwrap_or_else(default_page_size);

        if port < 1024 {
            bail!("invalid_port");
        }
        if !(1..=100).contains(&page_size) {
            bail!("invalid_page_size");
        }

        let bind = cli
            .bind
            .clone()
            .or_else(|| env_value("BIND"))
            .unwrap_or_else(|| format!("127.0.0.1:{}", port));
        let data_dir = env_value::<String>("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let max_upload_mb = env_value("MAX_UPLOAD_MB").unwrap_or(DEFAULT_MAX_UPLOAD_MB);

        Ok(Self {
            bind,
            data_dir,
            max_upload_mb,
            logging_enabled,
            bootstrap: file.bootstrap,
            page_size,
        })
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

/// `$YATUBE_DATA_DIR`, else `~/.local/share/yatube`, else `./yatube_data`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = env_value::<String>("YATUBE_DATA_DIR") {
        PathBuf::from(dir)
    } else if let Some(home) = env_value::<String>("HOME") {
        PathBuf::from(home).join(".local/share/yatube")
    } else {
        PathBuf::from("./yatube_data")
    }
}
