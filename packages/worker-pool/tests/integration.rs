//! End-to-end scenarios from SPEC_FULL.md §8, driven through
//! [`enclave_worker_pool::transport::mock`] so no real worker process is
//! spawned.

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use enclave_worker_pool::transport::WorkerTransport;
    use enclave_worker_pool::transport::mock::{MockHandle, MockTransport};
    use enclave_worker_pool::{
        Config, ExecuteOptions, HostMessage, PoolManager, Preset, Result, ToolHandler,
        WorkerFactory, WorkerMessage, WorkerPoolError,
    };
    use serde_json::{Value, json};
    use tokio::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        Happy,
        NeverResponds,
        MemoryBomb,
        ToolRoundTrip,
        ApplicationFailure,
    }

    struct ScriptedFactory {
        scripts: Mutex<VecDeque<Script>>,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl WorkerFactory for ScriptedFactory {
        async fn spawn_transport(&self) -> Result<Box<dyn WorkerTransport>> {
            let script = self.scripts.lock().await.pop_front().unwrap_or(Script::Happy);
            let (transport, handle) = MockTransport::new();
            tokio::spawn(run_script(script, handle));
            Ok(Box::new(transport))
        }
    }

    fn push_worker_message(handle: &MockHandle, msg: &WorkerMessage) {
        let bytes = serde_json::to_vec(msg).expect("message serializes");
        let _ = handle.to_worker.send(bytes);
    }

    async fn run_script(script: Script, mut handle: MockHandle) {
        push_worker_message(&handle, &WorkerMessage::Ready {});
        while let Some(bytes) = handle.from_worker.recv().await {
            let Ok(msg) = serde_json::from_slice::<HostMessage>(&bytes) else {
                continue;
            };
            let HostMessage::Execute {
                execution_id, input, ..
            } = msg
            else {
                continue;
            };
            match script {
                Script::Happy => {
                    push_worker_message(
                        &handle,
                        &WorkerMessage::ExecutionResult {
                            execution_id,
                            ok: true,
                            value: Some(input),
                            error: None,
                            stats: None,
                        },
                    );
                }
                Script::NeverResponds => {}
                Script::ApplicationFailure => {
                    push_worker_message(
                        &handle,
                        &WorkerMessage::ExecutionResult {
                            execution_id,
                            ok: false,
                            value: None,
                            error: Some("non-numeric input".to_string()),
                            stats: None,
                        },
                    );
                }
                Script::MemoryBomb => {
                    push_worker_message(
                        &handle,
                        &WorkerMessage::Heartbeat {
                            rss: 10 * 1024 * 1024 * 1024,
                            heap_total: 0,
                            heap_used: 0,
                            external: 0,
                            array_buffers: 0,
                        },
                    );
                }
                Script::ToolRoundTrip => {
                    let call_id = "call-1".to_string();
                    push_worker_message(
                        &handle,
                        &WorkerMessage::ToolCall {
                            call_id: call_id.clone(),
                            execution_id: execution_id.clone(),
                            name: "add_one".to_string(),
                            args: input,
                        },
                    );
                    if let Some(bytes) = handle.from_worker.recv().await {
                        if let Ok(HostMessage::ToolResponse { value, .. }) =
                            serde_json::from_slice::<HostMessage>(&bytes)
                        {
                            push_worker_message(
                                &handle,
                                &WorkerMessage::ExecutionResult {
                                    execution_id,
                                    ok: true,
                                    value,
                                    error: None,
                                    stats: None,
                                },
                            );
                        }
                    }
                }
            }
        }
    }

    struct AddOne;

    #[async_trait]
    impl ToolHandler for AddOne {
        async fn call(&self, args: Value) -> std::result::Result<Value, String> {
            args.as_f64()
                .map(|n| Value::from(n + 1.0))
                .ok_or_else(|| "expected a number".to_string())
        }
    }

    fn test_config(max_workers: usize) -> Config {
        Config::builder(Preset::Standard)
            .max_workers(max_workers)
            .min_workers(1)
            .warm_on_init(false)
            .queue_timeout_ms(200)
            .graceful_shutdown_timeout_ms(200)
            .build()
            .expect("valid test config")
    }

    #[tokio::test]
    async fn happy_path_returns_worker_output() {
        let factory = ScriptedFactory::new(vec![Script::Happy]);
        let pool = PoolManager::new(test_config(2), factory);
        pool.initialize().await.unwrap();

        let output = pool
            .execute(ExecuteOptions {
                code: "echo".to_string(),
                input: json!(42),
                tools: Default::default(),
                timeout: Duration::from_secs(2),
                cancel: None,
            })
            .await
            .unwrap();
        assert_eq!(output, json!(42));
        pool.dispose().await;
    }

    #[tokio::test]
    async fn application_level_failure_reports_error_but_keeps_the_worker_alive() {
        // Only one script is ever handed out: if a failed execution wrongly
        // tore the slot down, the second `execute()` would spawn a fresh
        // transport that falls back to `Script::Happy`, and the second
        // assertion below would fail.
        let factory = ScriptedFactory::new(vec![Script::ApplicationFailure]);
        let pool = PoolManager::new(test_config(1), factory);
        pool.initialize().await.unwrap();

        for _ in 0..2 {
            let failed = pool
                .execute(ExecuteOptions {
                    code: "add1".to_string(),
                    input: json!("not a number"),
                    tools: Default::default(),
                    timeout: Duration::from_secs(2),
                    cancel: None,
                })
                .await;
            assert!(matches!(
                failed,
                Err(WorkerPoolError::ExecutionFailed { .. })
            ));
        }

        let snapshot = pool.metrics().await;
        assert_eq!(snapshot.total_slots, 1);
        assert_eq!(snapshot.total_executions, 2);
        assert_eq!(snapshot.failed_executions, 2);
        assert_eq!(snapshot.worker_recycles, 0);
        assert_eq!(snapshot.forced_terminations, 0);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn execution_exceeding_timeout_is_reported_and_slot_is_reaped() {
        let factory = ScriptedFactory::new(vec![Script::NeverResponds]);
        let pool = PoolManager::new(test_config(1), factory);
        pool.initialize().await.unwrap();

        let result = pool
            .execute(ExecuteOptions {
                code: "loop".to_string(),
                input: Value::Null,
                tools: Default::default(),
                timeout: Duration::from_millis(50),
                cancel: None,
            })
            .await;
        assert!(matches!(result, Err(WorkerPoolError::WorkerTimeout)));

        let snapshot = pool.metrics().await;
        assert_eq!(snapshot.timeout_executions, 1);
        assert_eq!(snapshot.failed_executions, 1);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn memory_limit_violation_kills_the_slot() {
        let config = Config::builder(Preset::Standard)
            .max_workers(1)
            .min_workers(1)
            .memory_limit_per_worker(1024)
            .warm_on_init(false)
            .graceful_shutdown_timeout_ms(200)
            .build()
            .unwrap();
        let factory = ScriptedFactory::new(vec![Script::MemoryBomb]);
        let pool = PoolManager::new(config, factory);
        pool.initialize().await.unwrap();

        let result = pool
            .execute(ExecuteOptions {
                code: "bomb".to_string(),
                input: Value::Null,
                tools: Default::default(),
                timeout: Duration::from_secs(2),
                cancel: None,
            })
            .await;
        assert!(matches!(result, Err(WorkerPoolError::WorkerMemory { .. })));

        let snapshot = pool.metrics().await;
        assert_eq!(snapshot.memory_kills, 1);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn host_tool_call_round_trips_through_the_slot() {
        let factory = ScriptedFactory::new(vec![Script::ToolRoundTrip]);
        let pool = PoolManager::new(test_config(1), factory);
        pool.initialize().await.unwrap();

        let mut tools: std::collections::HashMap<String, Arc<dyn ToolHandler>> =
            Default::default();
        tools.insert("add_one".to_string(), Arc::new(AddOne));

        let output = pool
            .execute(ExecuteOptions {
                code: "tool:add_one".to_string(),
                input: json!(6),
                tools,
                timeout: Duration::from_secs(2),
                cancel: None,
            })
            .await
            .unwrap();
        assert_eq!(output, json!(7.0));
        pool.dispose().await;
    }

    #[tokio::test]
    async fn a_request_beyond_capacity_queues_and_is_eventually_served() {
        let factory = ScriptedFactory::new(vec![Script::Happy, Script::Happy]);
        let pool = PoolManager::new(test_config(1), factory);
        pool.initialize().await.unwrap();

        let first = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.execute(ExecuteOptions {
                    code: "echo".to_string(),
                    input: json!(1),
                    tools: Default::default(),
                    timeout: Duration::from_secs(2),
                    cancel: None,
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = pool
            .execute(ExecuteOptions {
                code: "echo".to_string(),
                input: json!(2),
                tools: Default::default(),
                timeout: Duration::from_secs(2),
                cancel: None,
            })
            .await
            .unwrap();
        assert_eq!(second, json!(2));
        assert_eq!(first.await.unwrap().unwrap(), json!(1));
        pool.dispose().await;
    }

    #[tokio::test]
    async fn queue_times_out_once_queue_timeout_elapses_with_no_capacity() {
        let config = Config::builder(Preset::Standard)
            .max_workers(1)
            .min_workers(1)
            .queue_timeout_ms(30)
            .warm_on_init(false)
            .build()
            .unwrap();
        let factory = ScriptedFactory::new(vec![Script::NeverResponds]);
        let pool = PoolManager::new(config, factory);
        pool.initialize().await.unwrap();

        let _occupying = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.execute(ExecuteOptions {
                    code: "loop".to_string(),
                    input: Value::Null,
                    tools: Default::default(),
                    timeout: Duration::from_secs(5),
                    cancel: None,
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = pool
            .execute(ExecuteOptions {
                code: "echo".to_string(),
                input: Value::Null,
                tools: Default::default(),
                timeout: Duration::from_secs(5),
                cancel: None,
            })
            .await;
        assert!(matches!(queued, Err(WorkerPoolError::QueueTimeout)));
        pool.dispose().await;
    }

    #[tokio::test]
    async fn worker_recycles_after_reaching_its_execution_cap() {
        let config = Config::builder(Preset::Standard)
            .max_workers(1)
            .min_workers(1)
            .max_executions_per_worker(2)
            .warm_on_init(false)
            .graceful_shutdown_timeout_ms(200)
            .build()
            .unwrap();
        let factory = ScriptedFactory::new(vec![Script::Happy, Script::Happy, Script::Happy]);
        let pool = PoolManager::new(config, factory);
        pool.initialize().await.unwrap();

        for _ in 0..2 {
            let output = pool
                .execute(ExecuteOptions {
                    code: "echo".to_string(),
                    input: json!(1),
                    tools: Default::default(),
                    timeout: Duration::from_secs(2),
                    cancel: None,
                })
                .await
                .unwrap();
            assert_eq!(output, json!(1));
        }

        let snapshot = pool.metrics().await;
        assert_eq!(snapshot.worker_recycles, 1);
        assert_eq!(snapshot.total_executions, 2);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn requests_after_dispose_fail_immediately() {
        let factory = ScriptedFactory::new(vec![Script::Happy]);
        let pool = PoolManager::new(test_config(1), factory);
        pool.initialize().await.unwrap();
        pool.dispose().await;

        let result = pool
            .execute(ExecuteOptions {
                code: "echo".to_string(),
                input: json!(1),
                tools: Default::default(),
                timeout: Duration::from_secs(2),
                cancel: None,
            })
            .await;
        assert!(matches!(result, Err(WorkerPoolError::WorkerPoolDisposed)));
    }
}
