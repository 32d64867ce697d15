//! Configuration of the backed up fleet.
//!
//! The configuration is read from a TOML file:
//!
//! ```toml
//! data_path = "/data"
//!
//! [rotation]
//! retention_days = 30
//!
//! [dump]
//! jobs = 4
//!
//! [[servers]]
//! db_hostname = "db1.example.org"
//! db_user = "backup"
//! db_password = "secret"
//! db_port = 5432
//! fallback_ports = [6432]
//! ```

mod password;

use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

pub use password::Password;

const DEFAULT_DATA_PATH: &str = "/data";
const DEFAULT_PORT: u16 = 5432;
/// Port of a PgBouncer in front of the server.
const DEFAULT_FALLBACK_PORT: u16 = 6432;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_JOBS: u8 = 4;
const CONFIG_SUFFIX: &str = "-config.toml";

#[derive(Debug, Display, Error, From)]
/// Errors on loading the [FleetConfig].
pub enum ConfigError {
    /// The config file couldn't be read.
    #[display("Reading the config file {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    /// The config file isn't valid.
    #[display("Parsing the config file {} failed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Writing the default config failed.
    #[display("Writing the default config to {} failed: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    /// The default config couldn't be serialized.
    #[display("Serializing the default config failed: {_0}")]
    Serialize(toml::ser::Error),
    /// The location of the config file couldn't be determined.
    #[display("Unable to locate the config file: {_0}")]
    #[from]
    Locate(io::Error),
}

/// Configuration of the whole fleet.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FleetConfig {
    /// Root of the dated dump directories and the dump logs.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Retention of dumps and logs.
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Settings of the dump tools.
    #[serde(default)]
    pub dump: DumpConfig,

    /// Servers in the order they are backed up.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            rotation: RotationConfig::default(),
            dump: DumpConfig::default(),
            servers: vec![ServerConfig::new("localhost", "postgres", "")],
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_PATH)
}

/// Configure how long backups are kept.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RotationConfig {
    /// Days after which dated dump directories and stray files are removed.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Days of dump logs to keep.
    ///
    /// If [None] the log directory is aged as a whole like any dump directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<u32>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            log_retention_days: None,
        }
    }
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

/// Configure the PostgreSQL client tools.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DumpConfig {
    /// Parallel workers of `pg_dump`.
    #[serde(default = "default_jobs")]
    pub jobs: u8,

    /// Path to `psql`.
    #[serde(default = "default_psql")]
    pub psql: PathBuf,

    /// Path to `pg_dump`.
    #[serde(default = "default_pg_dump")]
    pub pg_dump: PathBuf,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            psql: default_psql(),
            pg_dump: default_pg_dump(),
        }
    }
}

fn default_jobs() -> u8 {
    DEFAULT_JOBS
}

fn default_psql() -> PathBuf {
    PathBuf::from("psql")
}

fn default_pg_dump() -> PathBuf {
    PathBuf::from("pg_dump")
}

/// A single database server.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    pub db_hostname: String,
    pub db_user: String,
    pub db_password: Password,

    /// Port tried first.
    #[serde(default = "default_port")]
    pub db_port: u16,

    /// Ports tried in order if [`db_port`](Self::db_port) doesn't answer.
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<u16>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_fallback_ports() -> Vec<u16> {
    vec![DEFAULT_FALLBACK_PORT]
}

impl ServerConfig {
    /// Server on the default port with the default fallback.
    pub fn new(hostname: &str, user: &str, password: &str) -> Self {
        Self {
            db_hostname: hostname.to_string(),
            db_user: user.to_string(),
            db_password: Password::from(password),
            db_port: DEFAULT_PORT,
            fallback_ports: default_fallback_ports(),
        }
    }

    /// Ports to try in order: the configured port, then the fallbacks.
    pub fn candidate_ports(&self) -> Vec<u16> {
        let mut ports = Vec::with_capacity(1 + self.fallback_ports.len());
        for port in std::iter::once(self.db_port).chain(self.fallback_ports.iter().copied()) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }
}

impl FleetConfig {
    /// Parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [load](Self::load) but writes and returns the default config
    /// if `path` doesn't exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if std::fs::exists(path).is_ok_and(|exists| !exists) {
            log::debug!(
                target: "config",
                "Writing default config to {} because it doesn't exist yet",
                path.display()
            );
            let default_config = Self::default();
            let config_str =
                toml::to_string_pretty(&default_config).map_err(ConfigError::Serialize)?;
            std::fs::write(path, config_str).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;

            return Ok(default_config);
        }

        Self::load(path)
    }

    /// Path of the config of `host` next to the running executable.
    pub fn path_for_host(host: &str) -> Result<PathBuf, ConfigError> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().unwrap_or(Path::new("."));
        Ok(dir.join(format!("{host}{CONFIG_SUFFIX}")))
    }

    /// Keeps only the servers with a hostname in `hostnames`.
    ///
    /// An empty filter keeps every server.
    pub fn retain_servers(&mut self, hostnames: &[String]) {
        if hostnames.is_empty() {
            return;
        }
        self.servers
            .retain(|server| hostnames.contains(&server.db_hostname));
    }
}
