//! Cluster bootstrap integration tests
//!
//! Exercises the bootstrapper against the in-process cluster provider:
//! single initialization under concurrent callers, worker normalization,
//! and fatal coordinator failures.
//!
//! Toyota Way: Poka-Yoke (one init per process, no matter how many callers)

use parframe::backend::{
    Backend, ClusterFlavor, LocalCluster, SerializationStrategy, BOUND_METHOD_TYPE, WORKER_ENV_TYPE,
};
use parframe::normalize::NATIVE_THREADS_VAR;
use parframe::{ClusterBootstrapper, ClusterConfig, EngineIdentity, Error, ModulePath, Runtime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn cluster_config(engine: EngineIdentity, workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        engine,
        cluster: ClusterConfig {
            num_workers: Some(workers),
            connect_timeout: Duration::from_secs(2),
            ..ClusterConfig::default()
        },
        module_path: ModulePath {
            search_path: vec![
                PathBuf::from("/srv/app"),
                PathBuf::from("/opt/lang/lib/lang3.7/site-packages"),
            ],
            exec_prefix: Some(PathBuf::from("/opt/lang")),
        },
    }
}

fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_concurrent_bootstrap_initializes_once() {
    const CALLERS: usize = 16;

    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = Arc::new(ClusterBootstrapper::new(cluster.clone()));
    let config = Arc::new(cluster_config(EngineIdentity::RayLikeCluster, 2));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let boot = Arc::clone(&boot);
            let config = Arc::clone(&config);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                boot.bootstrap(EngineIdentity::RayLikeCluster, &config)
            })
        })
        .collect();

    let states: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(cluster.init_calls(), 1, "backend init must run exactly once");
    assert_eq!(states.len(), CALLERS);
    assert!(states.iter().all(|s| s.initialized));
    assert!(states.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_workers_receive_normalized_path() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let config = cluster_config(EngineIdentity::RayLikeCluster, 3);

    let state = boot.bootstrap(EngineIdentity::RayLikeCluster, &config).unwrap();

    let expected = vec![
        PathBuf::from("/srv/app"),
        PathBuf::from("/opt/lang/lib/lang3.7"),
        PathBuf::from("/opt/lang/lib/lang3.7/site-packages"),
    ];
    assert_eq!(state.search_path, expected);
    assert!(eventually(|| cluster.worker_envs().iter().all(|env| {
        env.search_path == expected && env.vars.get(NATIVE_THREADS_VAR).is_some_and(|v| v == "1")
    })));
}

#[test]
fn test_late_worker_is_normalized_once() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Dask));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let config = cluster_config(EngineIdentity::DaskLikeCluster, 1);
    boot.bootstrap(EngineIdentity::DaskLikeCluster, &config).unwrap();

    let index = cluster.add_worker().unwrap();
    let env = &cluster.worker_envs()[index];
    assert_eq!(env.search_path.len(), 3);
    assert_eq!(env.search_path[1], PathBuf::from("/opt/lang/lib/lang3.7"));
}

#[test]
fn test_bound_method_serializer_registered() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    boot.bootstrap(EngineIdentity::RayLikeCluster, &cluster_config(EngineIdentity::RayLikeCluster, 1))
        .unwrap();

    assert_eq!(
        cluster.serializers().strategy_for(BOUND_METHOD_TYPE),
        Some(SerializationStrategy::Generic)
    );
    cluster.serializers().encode(BOUND_METHOD_TYPE, &("Frame", "apply")).unwrap();
    assert_eq!(cluster.serializers().fallback_count(), 0);
}

#[test]
fn test_reported_cpus_match_workers() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Dask));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let state = boot
        .bootstrap(EngineIdentity::DaskLikeCluster, &cluster_config(EngineIdentity::DaskLikeCluster, 5))
        .unwrap();
    assert!((state.reported_cpus - 5.0).abs() < f64::EPSILON);
    assert!((cluster.cluster_resources().unwrap().cpu - 5.0).abs() < f64::EPSILON);
}

#[test]
fn test_memory_override_reaches_backend() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let mut config = cluster_config(EngineIdentity::RayLikeCluster, 1);
    config.cluster.memory_override_bytes = Some(3_000_000_000);

    let state = boot.bootstrap(EngineIdentity::RayLikeCluster, &config).unwrap();
    assert_eq!(state.memory.object_store_bytes, Some(3_000_000_000));
    assert_eq!(
        cluster.memory_budget().and_then(|m| m.object_store_bytes),
        Some(3_000_000_000)
    );
}

#[test]
fn test_unreachable_coordinator_is_fatal_for_every_caller() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let mut config = cluster_config(EngineIdentity::RayLikeCluster, 1);
    config.cluster.cluster_mode = true;
    config.cluster.coordinator_address = Some(addr.to_string());

    let first = boot.bootstrap(EngineIdentity::RayLikeCluster, &config).unwrap_err();
    assert!(matches!(first, Error::BootstrapConnectivity { .. }));

    let second = boot.bootstrap(EngineIdentity::RayLikeCluster, &config).unwrap_err();
    assert!(matches!(second, Error::BootstrapFailed(_)));
    assert_eq!(cluster.init_calls(), 1);
    assert!(!cluster.is_running());
}

#[test]
fn test_join_reachable_coordinator() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    let mut config = cluster_config(EngineIdentity::RayLikeCluster, 2);
    config.cluster.cluster_mode = true;
    config.cluster.coordinator_address = Some(addr.to_string());

    boot.bootstrap(EngineIdentity::RayLikeCluster, &config).unwrap();
    assert_eq!(cluster.coordinator(), Some(addr));
}

#[tokio::test]
async fn test_join_coordinator_from_async_caller() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = cluster_config(EngineIdentity::RayLikeCluster, 2);
    config.cluster.cluster_mode = true;
    config.cluster.coordinator_address = Some(addr.to_string());

    let runtime = Runtime::start(config).unwrap();
    assert!(runtime.cluster_state().initialized);
    assert_eq!(runtime.default_partitions(), 4);
}

#[test]
fn test_worker_env_ships_through_registry() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Ray));
    let boot = ClusterBootstrapper::new(cluster.clone());
    boot.bootstrap(EngineIdentity::RayLikeCluster, &cluster_config(EngineIdentity::RayLikeCluster, 2))
        .unwrap();

    assert_eq!(
        cluster.serializers().strategy_for(WORKER_ENV_TYPE),
        Some(SerializationStrategy::Generic)
    );
    assert_eq!(cluster.serializers().fallback_count(), 0);
}

#[test]
fn test_forbidden_worker_env_fails_bootstrap() {
    let cluster = Arc::new(LocalCluster::new(ClusterFlavor::Dask));
    cluster.register_serializer(WORKER_ENV_TYPE, SerializationStrategy::Forbid);
    let boot = ClusterBootstrapper::new(cluster.clone());

    let err = boot
        .bootstrap(EngineIdentity::DaskLikeCluster, &cluster_config(EngineIdentity::DaskLikeCluster, 1))
        .unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
    assert!(!cluster.is_running());
}

