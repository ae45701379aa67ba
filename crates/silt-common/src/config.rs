mod storage;

pub use storage::{StorageConfig, StorageConfigError};

use serde::Deserialize;
use std::env;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const ENV_PREFIX: &str = "SILT";
const ENV_SEPARATOR: &str = "__";
const ENV_CONFIG_FILE: &str = "SILT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "silt.toml";

/// Errors that can occur while loading or checking the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file named by `SILT_CONFIG` does not exist.
    #[error("config file not found: {path:?}")]
    FileNotFound { path: PathBuf },

    /// The file or the environment overrides did not parse.
    #[error("failed to read config")]
    Parse(#[from] config::ConfigError),

    /// The configured host is not an IP address the server can bind.
    #[error("cannot listen on host {host:?}: {source}")]
    BadListenHost {
        host: String,
        #[source]
        source: AddrParseError,
    },

    /// Port 0 would ask the OS to pick one, which a restart cannot repeat.
    #[error("server port must not be 0")]
    PortZero,

    /// The storage section failed validation.
    #[error(transparent)]
    Storage(#[from] StorageConfigError),
}

/// Runtime settings of a silt server process.
///
/// A `Config` is a plain value: the binary loads one at startup and hands
/// each piece to the layer that wants it. The engine core never sees this
/// type (it takes its knobs as constructor arguments), so there is no global
/// and nothing to re-read later.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage engine knobs.
    pub storage: StorageConfig,

    /// Where the HTTP layer listens.
    pub server: ServerConfig,
}

/// Listen address of the HTTP layer.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind (e.g. "127.0.0.1" or "::"). Defaults to loopback.
    pub host: String,

    /// Port to listen on. Defaults to 8080; 0 is rejected.
    pub port: u16,
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Resolves the host/port pair into a bindable socket address.
    ///
    /// This is also the validation: a host that does not parse as an IP, or
    /// a port of 0, never makes it out of here as an address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::PortZero);
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::BadListenHost {
                host: self.host.clone(),
                source,
            })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    /// Loads the settings for this process.
    ///
    /// The file comes from `SILT_CONFIG` when set (missing file is an
    /// error), else `./silt.toml` when present, else defaults. Environment
    /// variables prefixed `SILT__` override either
    /// (`SILT__SERVER__PORT=9000`).
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(ENV_CONFIG_FILE) {
            Ok(named) => {
                let path = PathBuf::from(named);
                if !path.exists() {
                    return Err(ConfigError::FileNotFound { path });
                }
                Self::load_from(Some(&path))
            }
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                Self::load_from(default.exists().then_some(default))
            }
        }
    }

    /// Loads from an explicit file (or none) plus the environment, and
    /// validates the result. A half-usable config never escapes.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut sources = config::Config::builder();
        match file {
            Some(path) => {
                info!(?path, "reading config file");
                sources = sources.add_source(config::File::from(path.to_path_buf()));
            }
            None => debug!("no config file, starting from defaults"),
        }

        let config: Self = sources
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()?;

        config.server.listen_addr()?;
        config.storage.validate()?;

        debug!(
            data_dir = ?config.storage.data_dir,
            index_factor = config.storage.index_factor,
            flush_threshold = config.storage.flush_threshold,
            host = %config.server.host,
            port = config.server.port,
            "config ready"
        );

        Ok(config)
    }
}
