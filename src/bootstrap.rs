//! One-time cluster bootstrap
//!
//! State machine: `Uninitialized -> Initializing -> Initialized`, or
//! `Initializing -> Failed`. Both end states are terminal. The first caller
//! performs the transition; concurrent callers block on a condition variable
//! until it settles, and every later caller gets the cached result.
//!
//! Toyota Way: Jidoka - a failed bootstrap stops the line for the whole
//! process instead of being retried by the next caller.

use crate::backend::{Backend, InitRequest, SerializationStrategy, WorkerFn, BOUND_METHOD_TYPE};
use crate::config::RuntimeConfig;
use crate::engine::EngineIdentity;
use crate::memory::{self, MemoryBudget};
use crate::normalize::WorkerEnv;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// CPU count assumed when the cluster cannot report one
pub const FALLBACK_CPUS: f64 = 1.0;

/// Result of a completed bootstrap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Always `true` once returned by [`ClusterBootstrapper::bootstrap`]
    pub initialized: bool,
    /// Aggregate CPUs reported by the backend
    pub reported_cpus: f64,
    /// Object-store sizing requested from the backend
    pub memory: MemoryBudget,
    /// Module search order of the coordinating process after normalization
    pub search_path: Vec<PathBuf>,
    /// When the transition completed
    pub initialized_at: Option<DateTime<Utc>>,
}

impl ClusterState {
    /// State of a process that runs without a cluster
    #[must_use]
    pub fn single_process(search_path: Vec<PathBuf>) -> Self {
        Self {
            initialized: true,
            reported_cpus: FALLBACK_CPUS,
            memory: MemoryBudget::backend_default(),
            search_path,
            initialized_at: Some(Utc::now()),
        }
    }
}

enum Phase {
    Uninitialized,
    Initializing,
    Initialized(ClusterState),
    Failed(String),
}

/// Reads total physical memory of the coordinating host
pub type MemoryReader = fn() -> Option<u64>;

/// Guards the single bootstrap of one backend
pub struct ClusterBootstrapper {
    backend: Arc<dyn Backend>,
    memory_reader: MemoryReader,
    phase: Mutex<Phase>,
    settled: Condvar,
}

/// Settles an in-flight bootstrap as failed if the attempt unwinds
struct SettleOnUnwind<'a> {
    boot: &'a ClusterBootstrapper,
}

impl Drop for SettleOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            *self.boot.lock() = Phase::Failed("bootstrap panicked".to_string());
            self.boot.settled.notify_all();
        }
    }
}

impl ClusterBootstrapper {
    /// Create a bootstrapper for `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            memory_reader: memory::system_memory,
            phase: Mutex::new(Phase::Uninitialized),
            settled: Condvar::new(),
        }
    }

    /// Replace the host memory reader used to size the object store
    #[must_use]
    pub fn with_memory_reader(mut self, memory_reader: MemoryReader) -> Self {
        self.memory_reader = memory_reader;
        self
    }

    /// Backend this bootstrapper drives
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Cached state, if bootstrap already succeeded
    #[must_use]
    pub fn state(&self) -> Option<ClusterState> {
        match &*self.lock() {
            Phase::Initialized(state) => Some(state.clone()),
            _ => None,
        }
    }

    /// Bring the engine online exactly once
    ///
    /// Re-entrant calls after a success return the same state without
    /// touching the backend.
    ///
    /// # Errors
    /// - [`Error::BootstrapConnectivity`] if the coordinator is unreachable
    /// - [`Error::Backend`] if the worker pool cannot start
    /// - [`Error::Serialization`] if worker environments cannot be shipped
    /// - [`Error::BootstrapFailed`] for callers that find an earlier attempt
    ///   failed or panicked
    pub fn bootstrap(&self, identity: EngineIdentity, config: &RuntimeConfig) -> Result<ClusterState> {
        let mut phase = self.lock();
        loop {
            match &*phase {
                Phase::Initialized(state) => return Ok(state.clone()),
                Phase::Failed(reason) => return Err(Error::BootstrapFailed(reason.clone())),
                Phase::Uninitialized => break,
                Phase::Initializing => {}
            }
            phase = self.settled.wait(phase).unwrap_or_else(PoisonError::into_inner);
        }
        *phase = Phase::Initializing;
        drop(phase);

        let unwind = SettleOnUnwind { boot: self };
        let outcome = self.run(identity, config);
        drop(unwind);

        let mut phase = self.lock();
        *phase = match &outcome {
            Ok(state) => Phase::Initialized(state.clone()),
            Err(e) => Phase::Failed(e.to_string()),
        };
        drop(phase);
        self.settled.notify_all();
        outcome
    }

    fn run(&self, identity: EngineIdentity, config: &RuntimeConfig) -> Result<ClusterState> {
        let module_path = &config.module_path;
        if !identity.requires_cluster() {
            tracing::info!(engine = %identity, "no cluster to start");
            return Ok(ClusterState::single_process(module_path.search_path.clone()));
        }

        let system_memory = (self.memory_reader)();
        if system_memory.is_none() {
            let probe = Error::ResourceProbe("system memory could not be read".to_string());
            tracing::warn!(error = %probe, "sizing object store without system memory");
        }
        let budget = MemoryBudget::compute_with_probe(&config.cluster, system_memory);

        let request = InitRequest {
            coordinator_address: config.cluster.coordinator_address.clone(),
            memory: budget.clone(),
            connect_timeout: config.cluster.connect_timeout,
            num_workers: config.cluster.num_workers,
            worker_template: WorkerEnv::new(module_path.search_path.clone(), module_path.exec_prefix.clone()),
        };
        self.backend.init(&request)?;

        self.backend
            .register_serializer(BOUND_METHOD_TYPE, SerializationStrategy::Generic);

        let mut local = WorkerEnv::new(module_path.search_path.clone(), module_path.exec_prefix.clone());
        local.normalize();

        let fix: WorkerFn = Arc::new(|env: &mut WorkerEnv| {
            env.normalize();
            env.pin_native_threads();
        });
        self.backend.run_on_all_workers(fix);

        let reported_cpus = match self.backend.cluster_resources() {
            Ok(resources) if resources.cpu.is_finite() && resources.cpu > 0.0 => resources.cpu,
            Ok(resources) => {
                tracing::warn!(cpu = resources.cpu, "backend reported no usable CPUs; assuming 1");
                FALLBACK_CPUS
            }
            Err(e) => {
                tracing::warn!(error = %e, "cluster CPU count unavailable; assuming 1");
                FALLBACK_CPUS
            }
        };

        tracing::info!(
            engine = %identity,
            backend = self.backend.name(),
            cpus = reported_cpus,
            object_store_bytes = ?budget.object_store_bytes,
            "cluster bootstrap complete"
        );

        Ok(ClusterState {
            initialized: true,
            reported_cpus,
            memory: budget,
            search_path: local.search_path,
            initialized_at: Some(Utc::now()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
