//! parframe-info: bootstrap from the environment and report the result
//!
//! Run with: `PARFRAME_ENGINE=Ray cargo run --bin parframe-info`

use anyhow::Context;
use parframe::Runtime;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let runtime = Runtime::from_env().context("failed to start the execution engine")?;
    let state = runtime.cluster_state();

    let report = json!({
        "engine": runtime.engine(),
        "backend": runtime.backend().name(),
        "default_partitions": runtime.default_partitions(),
        "reported_cpus": state.reported_cpus,
        "memory": state.memory,
        "search_path": state.search_path,
        "initialized_at": state.initialized_at,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
