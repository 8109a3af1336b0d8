//! Execution backend capability providers
//!
//! Each [`EngineIdentity`] maps to one provider implementing [`Backend`].
//! Cluster providers are compiled in through the `ray` and `dask` cargo
//! features; asking for one that was left out is a configuration error.
//!
//! Toyota Way: Jidoka - a backend that cannot start stops the bootstrap
//! instead of silently degrading to another engine.

pub mod coordinator;
#[cfg(any(feature = "ray", feature = "dask"))]
pub mod local;
pub mod serializer;

#[cfg(any(feature = "ray", feature = "dask"))]
pub use local::{ClusterFlavor, LocalCluster, WORKER_ENV_TYPE};
pub use serializer::{SerializationStrategy, SerializerRegistry};

use crate::engine::EngineIdentity;
use crate::memory::MemoryBudget;
use crate::normalize::WorkerEnv;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Function broadcast to every worker's environment
pub type WorkerFn = Arc<dyn Fn(&mut WorkerEnv) + Send + Sync>;

/// Type name of bound-method values, which need the generic transfer strategy
pub const BOUND_METHOD_TYPE: &str = "bound_method";

/// Arguments to [`Backend::init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    /// Coordinator to connect to; `None` starts a local cluster
    pub coordinator_address: Option<String>,
    /// Object-store sizing
    pub memory: MemoryBudget,
    /// Bound on the coordinator handshake
    pub connect_timeout: Duration,
    /// Worker count; `None` uses available parallelism
    pub num_workers: Option<usize>,
    /// Module environment new workers start from
    pub worker_template: WorkerEnv,
}

/// Aggregate capacity reported by a running cluster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterResources {
    /// Total CPUs across workers
    pub cpu: f64,
    /// Object-store size, when the backend fixed one
    pub memory_bytes: Option<u64>,
}

/// Operations the bootstrap needs from an execution backend
pub trait Backend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Bring the cluster online
    ///
    /// Must tolerate being called on an already-initialized cluster.
    ///
    /// # Errors
    /// Returns [`Error::BootstrapConnectivity`] if the coordinator cannot be
    /// reached, or [`Error::Backend`] if the worker pool cannot be built.
    fn init(&self, request: &InitRequest) -> Result<()>;

    /// Aggregate cluster capacity
    ///
    /// # Errors
    /// Returns [`Error::ResourceProbe`] if the cluster is not running.
    fn cluster_resources(&self) -> Result<ClusterResources>;

    /// Run `f` on every current worker and every worker that joins later
    ///
    /// Fire-and-forget: returns before workers have applied `f`.
    fn run_on_all_workers(&self, f: WorkerFn);

    /// Choose how values of `type_name` cross process boundaries
    fn register_serializer(&self, type_name: &str, strategy: SerializationStrategy);
}

/// Provider for single-process execution; every operation is inert
#[derive(Debug, Default)]
pub struct NoClusterBackend;

impl Backend for NoClusterBackend {
    fn name(&self) -> &'static str {
        "no-cluster"
    }

    fn init(&self, _request: &InitRequest) -> Result<()> {
        Ok(())
    }

    fn cluster_resources(&self) -> Result<ClusterResources> {
        Ok(ClusterResources {
            cpu: 1.0,
            memory_bytes: None,
        })
    }

    fn run_on_all_workers(&self, _f: WorkerFn) {}

    fn register_serializer(&self, _type_name: &str, _strategy: SerializationStrategy) {}
}

/// Instantiate the provider for `engine`
///
/// # Errors
/// Returns [`Error::Configuration`] when the engine's backend was not
/// compiled into this build.
pub fn backend_for(engine: EngineIdentity) -> Result<Arc<dyn Backend>> {
    match engine {
        EngineIdentity::NoCluster => Ok(Arc::new(NoClusterBackend)),
        #[cfg(feature = "ray")]
        EngineIdentity::RayLikeCluster => Ok(Arc::new(LocalCluster::new(ClusterFlavor::Ray))),
        #[cfg(feature = "dask")]
        EngineIdentity::DaskLikeCluster => Ok(Arc::new(LocalCluster::new(ClusterFlavor::Dask))),
        #[allow(unreachable_patterns)]
        other => Err(Error::Configuration(format!(
            "Engine {other} is not available in this build (enable the `{}` feature)",
            other.as_str().to_lowercase()
        ))),
    }
}
