//! Configuration for the asset ledger

use crate::genesis::GenesisMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Id of the chain-native asset whose accounting lives outside this ledger
pub const DEFAULT_NATIVE_ASSET_ID: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee_0x65";

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Native-asset sentinel; deposits and withdrawals of it skip balance updates
    pub native_asset_id: String,

    /// Asset ids the built-in price oracle quotes
    pub priced_assets: Vec<String>,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Bulk load configuration
    pub genesis: GenesisConfig,

    /// Prometheus text file written by the node before it exits
    pub metrics_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/assets"),
            service_name: "assets-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            native_asset_id: DEFAULT_NATIVE_ASSET_ID.to_string(),
            priced_assets: Vec::new(),
            rocksdb: RocksDBConfig::default(),
            genesis: GenesisConfig::default(),
            metrics_file: None,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Bulk load configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Genesis JSON to load at startup
    pub file: Option<PathBuf>,

    /// Validation mode for `file`
    pub mode: GenesisMode,

    /// Where to write an export after startup
    pub export_file: Option<PathBuf>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ASSETS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(native) = std::env::var("ASSETS_NATIVE_ASSET_ID") {
            config.native_asset_id = native;
        }

        if let Ok(file) = std::env::var("ASSETS_GENESIS_FILE") {
            config.genesis.file = Some(PathBuf::from(file));
        }

        if let Ok(mode) = std::env::var("ASSETS_GENESIS_MODE") {
            config.genesis.mode = mode.parse()?;
        }

        if let Ok(file) = std::env::var("ASSETS_EXPORT_FILE") {
            config.genesis.export_file = Some(PathBuf::from(file));
        }

        if let Ok(file) = std::env::var("ASSETS_METRICS_FILE") {
            config.metrics_file = Some(PathBuf::from(file));
        }

        Ok(config)
    }
}
