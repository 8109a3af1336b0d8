//! Runtime configuration from the process environment
//!
//! Built once at start-up and read-only afterward. Every value comes from a
//! `PARFRAME_*` variable; tests inject a lookup closure instead of touching the
//! real environment.

use crate::engine::EngineIdentity;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine name (`Python`, `Ray`, `Dask`)
pub const ENV_ENGINE: &str = "PARFRAME_ENGINE";
/// `True` joins an existing coordinator instead of starting a local cluster
pub const ENV_CLUSTER: &str = "PARFRAME_CLUSTER";
/// Coordinator `host:port`
pub const ENV_COORDINATOR_ADDRESS: &str = "PARFRAME_COORDINATOR_ADDRESS";
/// Object-store size override in bytes
pub const ENV_MEMORY: &str = "PARFRAME_MEMORY";
/// `True` sizes the object store for spill-to-disk
pub const ENV_OUT_OF_CORE: &str = "PARFRAME_OUT_OF_CORE";
/// Local worker count
pub const ENV_NUM_WORKERS: &str = "PARFRAME_NUM_WORKERS";
/// Coordinator handshake bound in milliseconds
pub const ENV_CONNECT_TIMEOUT_MS: &str = "PARFRAME_CONNECT_TIMEOUT_MS";
/// Module search path (OS path-list syntax)
pub const ENV_MODULE_PATH: &str = "PARFRAME_MODULE_PATH";
/// Installation prefix used to recognise package directories
pub const ENV_EXEC_PREFIX: &str = "PARFRAME_EXEC_PREFIX";

/// Engine used when `PARFRAME_ENGINE` is unset
pub const DEFAULT_ENGINE: EngineIdentity = EngineIdentity::NoCluster;

/// Coordinator handshake bound when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cluster-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Join an existing coordinator rather than starting a local cluster
    pub cluster_mode: bool,
    /// Coordinator address, required in cluster mode
    pub coordinator_address: Option<String>,
    /// Explicit object-store size in bytes
    pub memory_override_bytes: Option<u64>,
    /// Size the object store for spill-to-disk
    pub out_of_core: bool,
    /// Local worker count (defaults to available parallelism)
    pub num_workers: Option<usize>,
    /// Bound on the coordinator handshake
    pub connect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_mode: false,
            coordinator_address: None,
            memory_override_bytes: None,
            out_of_core: false,
            num_workers: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClusterConfig {
    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when cluster mode is set without a
    /// coordinator address, or when the worker count or connect timeout is
    /// zero.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_mode && self.coordinator_address.is_none() {
            return Err(Error::Configuration(format!(
                "{ENV_CLUSTER} is set but {ENV_COORDINATOR_ADDRESS} is missing"
            )));
        }
        if self.num_workers == Some(0) {
            return Err(Error::Configuration(format!("{ENV_NUM_WORKERS} must be > 0")));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Configuration(format!("{ENV_CONNECT_TIMEOUT_MS} must be > 0")));
        }
        Ok(())
    }
}

/// Module search order of the coordinating process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePath {
    /// Ordered search segments
    pub search_path: Vec<PathBuf>,
    /// Installation prefix; without it normalization is a no-op
    pub exec_prefix: Option<PathBuf>,
}

/// Everything the bootstrap needs, resolved up front
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Selected engine
    pub engine: EngineIdentity,
    /// Cluster settings
    pub cluster: ClusterConfig,
    /// Local module search order
    pub module_path: ModulePath,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE,
            cluster: ClusterConfig::default(),
            module_path: ModulePath::default(),
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from the process environment
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an unknown engine, a malformed
    /// number, or cluster mode without a coordinator address.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// Same as [`RuntimeConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let engine = match lookup(ENV_ENGINE) {
            Some(raw) => EngineIdentity::resolve(&raw)?,
            None => DEFAULT_ENGINE,
        };

        let cluster = ClusterConfig {
            cluster_mode: lookup(ENV_CLUSTER).is_some_and(|v| parse_flag(&v)),
            coordinator_address: lookup(ENV_COORDINATOR_ADDRESS).filter(|v| !v.trim().is_empty()),
            memory_override_bytes: lookup(ENV_MEMORY)
                .map(|v| parse_memory_override(&v))
                .transpose()?,
            out_of_core: lookup(ENV_OUT_OF_CORE).is_some_and(|v| parse_flag(&v)),
            num_workers: lookup(ENV_NUM_WORKERS)
                .map(|v| parse_count(ENV_NUM_WORKERS, &v))
                .transpose()?,
            connect_timeout: lookup(ENV_CONNECT_TIMEOUT_MS)
                .map(|v| parse_count(ENV_CONNECT_TIMEOUT_MS, &v))
                .transpose()?
                .map_or(DEFAULT_CONNECT_TIMEOUT, |ms| Duration::from_millis(ms as u64)),
        };
        cluster.validate()?;

        let module_path = ModulePath {
            search_path: lookup(ENV_MODULE_PATH)
                .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
                .unwrap_or_default(),
            exec_prefix: lookup(ENV_EXEC_PREFIX).filter(|v| !v.is_empty()).map(PathBuf::from),
        };

        Ok(Self {
            engine,
            cluster,
            module_path,
        })
    }
}

/// Boolean flags compare case-insensitively against `true`
fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// Non-negative integer byte count; negative or non-numeric input is rejected
fn parse_memory_override(raw: &str) -> Result<u64> {
    let value: i128 = raw.trim().parse().map_err(|_| {
        Error::Configuration(format!("{ENV_MEMORY} must be an integer byte count, got {raw:?}"))
    })?;
    u64::try_from(value).map_err(|_| {
        Error::Configuration(format!("{ENV_MEMORY} must be a non-negative byte count, got {raw:?}"))
    })
}

fn parse_count(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("{key} must be a non-negative integer, got {raw:?}")))
}
