use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config::{ClusterConfig, Config};
use crate::types::EngineEvent;

/// Line-delimited JSON exchanged over a worker's stdio. Logs go to stderr,
/// so stdout stays clean for this protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    Status {
        worker_id: u32,
        markets: Vec<u32>,
        state: String,
    },
    Error {
        worker_id: u32,
        message: String,
    },
    Metrics {
        worker_id: u32,
        payload: serde_json::Value,
    },
    Shutdown,
    StatusRequest,
}

pub fn is_worker() -> bool {
    std::env::var("IS_WORKER")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Worker's market assignment from the `MARKETS` env (JSON integer array).
pub fn worker_markets_from_env() -> Option<Vec<u32>> {
    std::env::var("MARKETS")
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

pub fn worker_id_from_env() -> u32 {
    std::env::var("WORKER_ID")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Print one IPC message on the worker's stdout.
pub fn emit(message: &IpcMessage) {
    if let Ok(line) = serde_json::to_string(message) {
        println!("{}", line);
    }
}

/// Worker-side stdin listener: a `shutdown` message stops the engine via the
/// event channel; `status_request` answers on stdout.
pub fn spawn_worker_ipc(feed_tx: mpsc::Sender<EngineEvent>, markets: Vec<u32>) {
    tokio::spawn(async move {
        let worker_id = worker_id_from_env();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<IpcMessage>(&line) {
                Ok(IpcMessage::Shutdown) => {
                    log::info!("[CLUSTER] Worker {} received shutdown", worker_id);
                    let _ = feed_tx.send(EngineEvent::Shutdown).await;
                    return;
                }
                Ok(IpcMessage::StatusRequest) => emit(&IpcMessage::Status {
                    worker_id,
                    markets: markets.clone(),
                    state: "running".into(),
                }),
                Ok(other) => log::debug!("[CLUSTER] Worker ignoring {:?}", other),
                Err(e) => log::debug!("[CLUSTER] Bad IPC line: {}", e),
            }
        }
    });
}

/// Fork one worker per process group and babysit them: forward shutdown,
/// log their status/error/metrics messages, restart exits with a fixed
/// delay up to `max_restarts`.
pub async fn run_supervisor(config: &Config) {
    let (shutdown_tx, _) = watch::channel(false);
    let mut handles = Vec::new();
    for (idx, group) in config.cluster.process_groups.iter().enumerate() {
        log::info!(
            "[CLUSTER] Supervising worker {} for markets {:?}",
            idx,
            group
        );
        handles.push(tokio::spawn(supervise_group(
            idx as u32,
            group.clone(),
            config.cluster.clone(),
            shutdown_tx.subscribe(),
        )));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("[CLUSTER] Signal received, stopping workers"),
        Err(e) => log::error!("[CLUSTER] Signal handler failed: {}", e),
    }
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    log::info!("[CLUSTER] All workers stopped");
}

async fn supervise_group(
    worker_id: u32,
    markets: Vec<u32>,
    cfg: ClusterConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut restarts = 0u32;
    loop {
        let exe = match std::env::current_exe() {
            Ok(p) => p,
            Err(e) => {
                log::error!("[CLUSTER] current_exe failed: {}", e);
                return;
            }
        };
        let markets_json = serde_json::to_string(&markets).unwrap_or_else(|_| "[]".into());
        let mut child = match Command::new(exe)
            .arg("live")
            .env("IS_WORKER", "1")
            .env("WORKER_ID", worker_id.to_string())
            .env("MARKETS", markets_json)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                log::error!("[CLUSTER] Worker {} spawn failed: {}", worker_id, e);
                return;
            }
        };
        log::info!("[CLUSTER] Worker {} started (attempt {})", worker_id, restarts + 1);

        let mut stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(l)) => handle_worker_line(worker_id, &l),
                        Ok(None) | Err(_) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if let Some(stdin) = stdin.as_mut() {
                            if let Ok(msg) = serde_json::to_string(&IpcMessage::Shutdown) {
                                let _ = stdin.write_all(format!("{}\n", msg).as_bytes()).await;
                            }
                        }
                        let graceful = tokio::time::timeout(
                            tokio::time::Duration::from_secs(5),
                            child.wait(),
                        )
                        .await;
                        if graceful.is_err() {
                            log::warn!("[CLUSTER] Worker {} did not exit, killing", worker_id);
                            let _ = child.kill().await;
                        }
                        return;
                    }
                }
            }
        }

        let status = child.wait().await;
        if *shutdown.borrow() {
            return;
        }
        log::warn!(
            "[CLUSTER] Worker {} exited ({:?})",
            worker_id,
            status.map(|s| s.code()).unwrap_or(None)
        );
        restarts += 1;
        if restarts > cfg.max_restarts {
            log::error!(
                "[CLUSTER] Worker {} exceeded {} restarts, giving up",
                worker_id,
                cfg.max_restarts
            );
            return;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(cfg.worker_restart_delay_ms)).await;
    }
}

fn handle_worker_line(worker_id: u32, line: &str) {
    match serde_json::from_str::<IpcMessage>(line) {
        Ok(IpcMessage::Status { state, markets, .. }) => {
            log::info!("[CLUSTER] Worker {} status: {} {:?}", worker_id, state, markets)
        }
        Ok(IpcMessage::Error { message, .. }) => {
            log::error!("[CLUSTER] Worker {} error: {}", worker_id, message)
        }
        Ok(IpcMessage::Metrics { payload, .. }) => {
            log::info!("[CLUSTER] Worker {} metrics: {}", worker_id, payload)
        }
        Ok(other) => log::debug!("[CLUSTER] Worker {} sent {:?}", worker_id, other),
        Err(_) => log::debug!("[CLUSTER] Worker {} non-IPC output: {}", worker_id, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// IPC messages round-trip through the tagged JSON encoding.
    #[test]
    fn test_ipc_round_trip() {
        let msgs = vec![
            IpcMessage::Status {
                worker_id: 1,
                markets: vec![0, 2],
                state: "running".into(),
            },
            IpcMessage::Error {
                worker_id: 1,
                message: "boom".into(),
            },
            IpcMessage::Shutdown,
            IpcMessage::StatusRequest,
        ];
        for msg in msgs {
            let line = serde_json::to_string(&msg).unwrap();
            let back: IpcMessage = serde_json::from_str(&line).unwrap();
            assert_eq!(
                serde_json::to_string(&back).unwrap(),
                line,
                "unstable encoding for {:?}",
                msg
            );
        }
    }

    /// The wire tag is snake_case under a `type` key.
    #[test]
    fn test_ipc_wire_format() {
        let line = serde_json::to_string(&IpcMessage::StatusRequest).unwrap();
        assert!(line.contains("\"type\":\"status_request\""));
        let back: IpcMessage = serde_json::from_str(r#"{"type":"shutdown"}"#).unwrap();
        assert!(matches!(back, IpcMessage::Shutdown));
    }
}
