//! # parframe: execution-engine bootstrap for a partitioned dataframe runtime
//!
//! **Version**: 0.1.0
//!
//! parframe decides which execution engine runs the dataframe runtime's
//! parallel work, brings that engine's worker pool online exactly once, sizes
//! its shared object store, fixes each worker's module search order, and
//! derives the default partition count the partitioned engine fans out to.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: an unknown engine or unreachable coordinator stops start-up; no silent fallback
//! - **Poka-Yoke**: a zero-sized object store is never requested from the backend
//! - **Heijunka**: default fan-out tracks the cluster's real CPU capacity
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use parframe::Runtime;
//!
//! // Reads PARFRAME_ENGINE, PARFRAME_MEMORY, ... from the environment
//! let runtime = Runtime::from_env()?;
//! println!("{} engine, {} partitions", runtime.engine(), runtime.default_partitions());
//! # Ok::<(), parframe::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod normalize;
pub mod partitions;

pub use bootstrap::{ClusterBootstrapper, ClusterState};
pub use config::{ClusterConfig, ModulePath, RuntimeConfig};
pub use engine::EngineIdentity;
pub use error::{Error, Result};
pub use memory::MemoryBudget;

use backend::Backend;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

static GLOBAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();
static GLOBAL_FAILURE: OnceLock<String> = OnceLock::new();
static GLOBAL_INIT: Mutex<()> = Mutex::new(());

/// Records a panicking first bootstrap so later callers fail fast
struct RecordPanic;

impl Drop for RecordPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = GLOBAL_FAILURE.set("runtime bootstrap panicked".to_string());
        }
    }
}

/// Bootstrapped runtime handed to the partitioned engine
///
/// Read-only after construction.
pub struct Runtime {
    engine: EngineIdentity,
    bootstrapper: ClusterBootstrapper,
    state: ClusterState,
    default_partitions: usize,
}

impl Runtime {
    /// Resolve configuration from the environment and bootstrap
    ///
    /// # Errors
    /// Configuration errors, coordinator connectivity errors, and backend
    /// start-up errors are all fatal.
    pub fn from_env() -> Result<Self> {
        Self::start(RuntimeConfig::from_env()?)
    }

    /// Bootstrap the engine named in `config`
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the engine was not compiled in,
    /// otherwise whatever [`ClusterBootstrapper::bootstrap`] returns.
    pub fn start(config: RuntimeConfig) -> Result<Self> {
        let backend = backend::backend_for(config.engine)?;
        Self::with_backend(config, backend)
    }

    /// Bootstrap `config.engine` on a caller-supplied backend
    ///
    /// # Errors
    /// Same as [`ClusterBootstrapper::bootstrap`].
    pub fn with_backend(config: RuntimeConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        config.cluster.validate()?;
        tracing::info!(engine = %config.engine, backend = backend.name(), "execution engine selected");

        let bootstrapper = ClusterBootstrapper::new(backend);
        let state = bootstrapper.bootstrap(config.engine, &config)?;
        let default_partitions = partitions::derive(&state);

        Ok(Self {
            engine: config.engine,
            bootstrapper,
            state,
            default_partitions,
        })
    }

    /// Process-wide runtime, bootstrapped from the environment on first use
    ///
    /// # Errors
    /// The first failure is returned to its caller; every later caller gets
    /// [`Error::BootstrapFailed`], including after a panicked first attempt.
    /// The process never retries.
    pub fn global() -> Result<&'static Self> {
        if let Some(runtime) = GLOBAL_RUNTIME.get() {
            return Ok(runtime);
        }
        let _guard = GLOBAL_INIT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = GLOBAL_RUNTIME.get() {
            return Ok(runtime);
        }
        if let Some(reason) = GLOBAL_FAILURE.get() {
            return Err(Error::BootstrapFailed(reason.clone()));
        }

        let on_panic = RecordPanic;
        let outcome = Self::from_env();
        drop(on_panic);

        match outcome {
            Ok(runtime) => Ok(GLOBAL_RUNTIME.get_or_init(|| runtime)),
            Err(e) => {
                let _ = GLOBAL_FAILURE.set(e.to_string());
                Err(e)
            }
        }
    }

    /// Selected engine
    #[must_use]
    pub const fn engine(&self) -> EngineIdentity {
        self.engine
    }

    /// Default fan-out for operations without an explicit partition count
    #[must_use]
    pub const fn default_partitions(&self) -> usize {
        self.default_partitions
    }

    /// State captured when the cluster came online
    #[must_use]
    pub const fn cluster_state(&self) -> &ClusterState {
        &self.state
    }

    /// Backend running the engine
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.bootstrapper.backend()
    }
}
