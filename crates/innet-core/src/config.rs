//! Configuration system for an innet hop.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $INNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/innet/config.toml
//!   3. ~/.config/innet/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HopConfig {
    pub network: NetworkConfig,
    pub compute: ComputeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP address this hop receives chunks on.
    pub listen_addr: SocketAddr,
    /// Next hop in the chain, or the collecting endpoint for the last hop.
    pub next_hop: Option<SocketAddr>,
    /// HTTP status endpoint port. 0 = disabled.
    pub status_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Iteration rounds this hop may consume before forwarding.
    pub max_rounds: u32,
    /// The leader computes from the raw data alone; followers wait for a
    /// continuation from upstream.
    pub leader: bool,
    pub mode: HopMode,
    pub kernel: KernelKind,
    /// Scripted kernel only: converge after this many global rounds.
    /// 0 = never converge early.
    pub converge_after: u16,
    /// Scripted kernel only: total rounds per payload.
    pub scripted_total_rounds: u16,
    /// Incomplete message assemblies older than this are discarded.
    pub assembly_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopMode {
    /// Forward every valid datagram unchanged.
    StoreForward,
    /// Reassemble, advance the iteration, forward the continuation.
    ComputeForward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    PowerIteration,
    Scripted,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9999)),
            next_hop: None,
            status_port: 9001,
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            leader: false,
            mode: HopMode::ComputeForward,
            kernel: KernelKind::PowerIteration,
            converge_after: 0,
            scripted_total_rounds: 8,
            assembly_timeout_secs: 30,
        }
    }
}

impl std::str::FromStr for HopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store_forward" => Ok(HopMode::StoreForward),
            "compute_forward" => Ok(HopMode::ComputeForward),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

impl std::str::FromStr for KernelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "power_iteration" => Ok(KernelKind::PowerIteration),
            "scripted" => Ok(KernelKind::Scripted),
            other => Err(format!("unknown kernel: {other}")),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("innet")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("compute.max_rounds must be at least 1")]
    ZeroBudget,
    #[error("network.next_hop is not set")]
    MissingNextHop,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HopConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HopConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("INNET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HopConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Settings a hop cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compute.max_rounds == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if self.network.next_hop.is_none() {
            return Err(ConfigError::MissingNextHop);
        }
        Ok(())
    }

    /// Apply INNET_* overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &'static str, v: String) -> Result<T, ConfigError> {
            v.parse().map_err(|_| ConfigError::InvalidEnv(key, v))
        }
        fn flag(v: &str) -> bool {
            v == "true" || v == "1"
        }

        if let Some(v) = lookup("INNET_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = parse("INNET_NETWORK__LISTEN_ADDR", v)?;
        }
        if let Some(v) = lookup("INNET_NETWORK__NEXT_HOP") {
            self.network.next_hop = Some(parse("INNET_NETWORK__NEXT_HOP", v)?);
        }
        if let Some(v) = lookup("INNET_NETWORK__STATUS_PORT") {
            self.network.status_port = parse("INNET_NETWORK__STATUS_PORT", v)?;
        }
        if let Some(v) = lookup("INNET_COMPUTE__MAX_ROUNDS") {
            self.compute.max_rounds = parse("INNET_COMPUTE__MAX_ROUNDS", v)?;
        }
        if let Some(v) = lookup("INNET_COMPUTE__LEADER") {
            self.compute.leader = flag(&v);
        }
        if let Some(v) = lookup("INNET_COMPUTE__MODE") {
            self.compute.mode = parse("INNET_COMPUTE__MODE", v)?;
        }
        if let Some(v) = lookup("INNET_COMPUTE__KERNEL") {
            self.compute.kernel = parse("INNET_COMPUTE__KERNEL", v)?;
        }
        Ok(())
    }
}
