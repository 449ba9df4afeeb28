//! Wires a [`PoolManager`] to the `echo-worker` binary and drives it through
//! the happy path and a timeout, printing the resulting metrics snapshot.
//! Run with `cargo run -p pool-smoke` after building `echo-worker`.

use std::sync::Arc;
use std::time::Duration;

use enclave_worker_pool::{Config, ExecuteOptions, PoolManager, Preset, ProcessWorkerFactory};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let echo_worker = std::env::current_exe()?
        .parent()
        .expect("executable has a parent directory")
        .join(if cfg!(windows) { "echo-worker.exe" } else { "echo-worker" });

    let factory = Arc::new(ProcessWorkerFactory {
        program: echo_worker.to_string_lossy().into_owned(),
        args: Vec::new(),
    });
    let config = Config::builder(Preset::Standard)
        .max_workers(2)
        .warm_on_init(true)
        .build()?;
    let pool = PoolManager::new(config, factory);
    pool.initialize().await?;

    let output = pool
        .execute(ExecuteOptions {
            code: "add1".to_string(),
            input: Value::from(41),
            tools: Default::default(),
            timeout: Duration::from_secs(5),
            cancel: None,
        })
        .await?;
    println!("add1(41) = {output}");

    let timed_out = pool
        .execute(ExecuteOptions {
            code: "loop".to_string(),
            input: Value::Null,
            tools: Default::default(),
            timeout: Duration::from_millis(500),
            cancel: None,
        })
        .await;
    println!("loop => {timed_out:?}");

    let snapshot = pool.metrics().await;
    println!("{snapshot:#?}");

    pool.dispose().await;
    Ok(())
}
