//! In-process cluster provider
//!
//! Workers are slots on a `rayon` thread pool, each holding its own
//! [`WorkerEnv`]. Broadcast functions are recorded and replayed onto workers
//! that join later, so every broadcast must be safe to apply twice.
//!
//! Each worker receives its environment through the cluster's
//! [`SerializerRegistry`] under [`WORKER_ENV_TYPE`], the way a remote worker
//! would, so a strategy registered for that type governs worker start-up.
//!
//! The two flavors differ only in how capacity is reported:
//! - Ray: one aggregate CPU figure for the whole cluster
//! - Dask: per-worker core counts that the caller sums

use super::{coordinator, Backend, ClusterResources, InitRequest, SerializationStrategy, SerializerRegistry, WorkerFn};
use crate::memory::MemoryBudget;
use crate::normalize::WorkerEnv;
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Transfer type name of the environment shipped to each worker
pub const WORKER_ENV_TYPE: &str = "worker_env";

/// Capacity-reporting style of a [`LocalCluster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFlavor {
    /// Aggregate CPU resources
    Ray,
    /// Per-worker core counts (experimental)
    Dask,
}

impl ClusterFlavor {
    const fn backend_name(self) -> &'static str {
        match self {
            Self::Ray => "ray-local",
            Self::Dask => "dask-local",
        }
    }
}

struct Worker {
    cores: usize,
    env: Mutex<WorkerEnv>,
}

impl Worker {
    fn env(&self) -> MutexGuard<'_, WorkerEnv> {
        self.env.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Running {
    pool: rayon::ThreadPool,
    workers: Vec<Arc<Worker>>,
    memory: MemoryBudget,
    coordinator: Option<SocketAddr>,
    template: WorkerEnv,
}

/// In-process worker pool implementing [`Backend`]
pub struct LocalCluster {
    flavor: ClusterFlavor,
    running: RwLock<Option<Running>>,
    broadcasts: Mutex<Vec<WorkerFn>>,
    serializers: SerializerRegistry,
    init_calls: AtomicUsize,
}

impl LocalCluster {
    /// Create a cluster that is not yet running
    #[must_use]
    pub fn new(flavor: ClusterFlavor) -> Self {
        let serializers = SerializerRegistry::new();
        serializers.register(WORKER_ENV_TYPE, SerializationStrategy::Generic);
        Self {
            flavor,
            running: RwLock::new(None),
            broadcasts: Mutex::new(Vec::new()),
            serializers,
            init_calls: AtomicUsize::new(0),
        }
    }

    /// Reporting flavor
    #[must_use]
    pub const fn flavor(&self) -> ClusterFlavor {
        self.flavor
    }

    /// Whether [`Backend::init`] has brought the pool online
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Number of [`Backend::init`] calls, including tolerated re-inits
    #[must_use]
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Transfer strategy table
    #[must_use]
    pub const fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// Coordinator the cluster joined, if any
    #[must_use]
    pub fn coordinator(&self) -> Option<SocketAddr> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|r| r.coordinator)
    }

    /// Object-store sizing the cluster was started with
    #[must_use]
    pub fn memory_budget(&self) -> Option<MemoryBudget> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.memory.clone())
    }

    /// Snapshot of every worker's environment
    #[must_use]
    pub fn worker_envs(&self) -> Vec<WorkerEnv> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.workers.iter().map(|w| w.env().clone()).collect())
            .unwrap_or_default()
    }

    /// Per-worker core counts keyed by worker index
    #[must_use]
    pub fn ncores(&self) -> FxHashMap<usize, usize> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.workers.iter().enumerate().map(|(i, w)| (i, w.cores)).collect())
            .unwrap_or_default()
    }

    /// Add a worker to a running cluster, replaying every past broadcast
    ///
    /// # Errors
    /// Returns [`Error::Backend`] if the cluster is not running, or
    /// [`Error::Serialization`] if the worker environment cannot be shipped.
    pub fn add_worker(&self) -> Result<usize> {
        let broadcasts = self.broadcasts();
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        let running = running
            .as_mut()
            .ok_or_else(|| Error::Backend("cannot add a worker before init".to_string()))?;

        let worker = self.spawn_worker(&running.template, &broadcasts)?;
        running.workers.push(worker);

        let index = running.workers.len() - 1;
        tracing::debug!(backend = self.name(), worker = index, "worker joined");
        Ok(index)
    }

    fn spawn_worker(&self, template: &WorkerEnv, broadcasts: &[WorkerFn]) -> Result<Arc<Worker>> {
        let mut env: WorkerEnv = self.serializers.transfer(WORKER_ENV_TYPE, template)?;
        for f in broadcasts {
            f(&mut env);
        }
        Ok(Arc::new(Worker {
            cores: 1,
            env: Mutex::new(env),
        }))
    }

    fn broadcasts(&self) -> MutexGuard<'_, Vec<WorkerFn>> {
        self.broadcasts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for LocalCluster {
    fn name(&self) -> &'static str {
        self.flavor.backend_name()
    }

    fn init(&self, request: &InitRequest) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);

        let broadcasts = self.broadcasts();
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            tracing::debug!(backend = self.name(), "cluster already initialized");
            return Ok(());
        }

        if self.flavor == ClusterFlavor::Dask {
            tracing::warn!("the Dask engine is experimental");
        }

        let coordinator = request
            .coordinator_address
            .as_deref()
            .map(|address| coordinator::connect(address, request.connect_timeout))
            .transpose()?;

        let num_workers = request.num_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
        });
        let name = self.name();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(move |i| format!("{name}-worker-{i}"))
            .build()
            .map_err(|e| Error::Backend(format!("failed to start worker pool: {e}")))?;

        let workers = (0..num_workers)
            .map(|_| self.spawn_worker(&request.worker_template, &broadcasts))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            backend = name,
            workers = num_workers,
            object_store_bytes = ?request.memory.object_store_bytes,
            coordinator = ?coordinator,
            "cluster started"
        );

        *running = Some(Running {
            pool,
            workers,
            memory: request.memory.clone(),
            coordinator,
            template: request.worker_template.clone(),
        });
        Ok(())
    }

    fn cluster_resources(&self) -> Result<ClusterResources> {
        let running = self.running.read().unwrap_or_else(PoisonError::into_inner);
        let running = running
            .as_ref()
            .ok_or_else(|| Error::ResourceProbe(format!("{} cluster is not initialized", self.name())))?;

        let cores: usize = match self.flavor {
            ClusterFlavor::Ray => running.workers.iter().map(|w| w.cores).sum(),
            ClusterFlavor::Dask => {
                let ncores: FxHashMap<usize, usize> =
                    running.workers.iter().enumerate().map(|(i, w)| (i, w.cores)).collect();
                ncores.values().sum()
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let cpu = cores as f64;
        Ok(ClusterResources {
            cpu,
            memory_bytes: running.memory.object_store_bytes,
        })
    }

    fn run_on_all_workers(&self, f: WorkerFn) {
        let mut broadcasts = self.broadcasts();
        broadcasts.push(Arc::clone(&f));

        let running = self.running.read().unwrap_or_else(PoisonError::into_inner);
        let Some(running) = running.as_ref() else {
            return;
        };
        tracing::debug!(backend = self.name(), workers = running.workers.len(), "broadcast to workers");
        for worker in &running.workers {
            let worker = Arc::clone(worker);
            let f = Arc::clone(&f);
            running.pool.spawn(move || {
                let mut env = worker.env();
                f(&mut *env);
            });
        }
    }

    fn register_serializer(&self, type_name: &str, strategy: SerializationStrategy) {
        self.serializers.register(type_name, strategy);
    }
}
