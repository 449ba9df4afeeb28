//! A trivial worker-entry binary used by the `pool-smoke` demo and by
//! `ProcessTransport`-based tests. Understands a handful of `code` strings
//! as toy programs rather than any real language:
//!
//! - `"echo"` returns `input` unchanged.
//! - `"add1"` returns `input + 1` (input must be a number).
//! - `"loop"` never finishes; used to exercise `WorkerTimeout`.
//! - `"bomb"` reports a heartbeat far above any reasonable memory limit.
//! - `"tool:<name>"` calls a host tool named `<name>` with `input` as args,
//!   then returns whatever the tool responds with.

use std::io::Write;
use std::time::Duration;

use enclave_worker_pool::{ExecuteConfig, ExecutionStats, HostMessage, WorkerMessage};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    send(&WorkerMessage::Ready {});

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<HostMessage>(&line) else {
            continue;
        };
        // A `ToolResponse` arriving outside `run_execution`'s own read loop
        // means it's answering a call from a prior, already-finished
        // execution; nothing to do with it here.
        if let HostMessage::Execute {
            execution_id,
            code,
            input,
            config,
            ..
        } = msg
        {
            run_execution(&mut lines, &execution_id, &code, input, &config).await;
        }
    }
}

async fn run_execution(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    execution_id: &str,
    code: &str,
    input: Value,
    config: &ExecuteConfig,
) {
    let started = std::time::Instant::now();
    match code {
        "loop" => loop {
            send(&WorkerMessage::Heartbeat {
                rss: 8 * 1024 * 1024,
                heap_total: 4 * 1024 * 1024,
                heap_used: 2 * 1024 * 1024,
                external: 0,
                array_buffers: 0,
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
            if started.elapsed().as_millis() as u64 > config.timeout_ms * 4 {
                return;
            }
        },
        "bomb" => {
            send(&WorkerMessage::Heartbeat {
                rss: 4 * 1024 * 1024 * 1024,
                heap_total: 1024 * 1024 * 1024,
                heap_used: 900 * 1024 * 1024,
                external: 0,
                array_buffers: 0,
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        code if code.starts_with("tool:") => {
            let tool_name = code.trim_start_matches("tool:").to_string();
            let call_id = uuid::Uuid::new_v4().to_string();
            send(&WorkerMessage::ToolCall {
                call_id: call_id.clone(),
                execution_id: execution_id.to_string(),
                name: tool_name,
                args: input,
            });
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(HostMessage::ToolResponse { call_id: cid, ok, value, error }) =
                    serde_json::from_str::<HostMessage>(&line)
                {
                    if cid != call_id {
                        continue;
                    }
                    let (ok, value, error) = (ok, value, error);
                    finish(execution_id, ok, value, error, started);
                    return;
                }
            }
        }
        "add1" => {
            let result = input.as_f64().map(|n| Value::from(n + 1.0));
            finish(execution_id, result.is_some(), result, None, started);
        }
        _ => finish(execution_id, true, Some(input), None, started),
    }
}

fn finish(
    execution_id: &str,
    ok: bool,
    value: Option<Value>,
    error: Option<String>,
    started: std::time::Instant,
) {
    send(&WorkerMessage::ExecutionResult {
        execution_id: execution_id.to_string(),
        ok,
        value,
        error,
        stats: Some(ExecutionStats {
            duration_ms: started.elapsed().as_millis() as u64,
            peak_rss_bytes: 8 * 1024 * 1024,
            heap_used: 2 * 1024 * 1024,
        }),
    });
}

fn send(msg: &WorkerMessage) {
    if let Ok(line) = serde_json::to_string(msg) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}
