//! Process registry
//!
//! `spawn`/`run` create a fresh child evaluator on its own `tokio::spawn`ed
//! task; the registry tracks the ones still in flight so `kill(pid)` can
//! reach them (`spec.md` §4.E).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::{CancellationToken, ContextPayload};
use crate::interpreter::error::{DuError, EvalResult, Flow};
use crate::interpreter::evaluator::Evaluator;
use crate::value::Value;

pub struct ProcessHandle {
    pub pid: u64,
    pub path: String,
    pub started_at: Instant,
    pub cancel: CancellationToken,
}

pub struct ProcessRegistry {
    next_pid: AtomicU64,
    handles: tokio::sync::RwLock<HashMap<u64, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self { next_pid: AtomicU64::new(1), handles: tokio::sync::RwLock::new(HashMap::new()) }
    }

    fn next_pid(&self) -> u64 {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn kill(&self, pid: u64) -> bool {
        if let Some(handle) = self.handles.read().await.get(&pid) {
            handle.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub async fn contains(&self, pid: u64) -> bool {
        self.handles.read().await.contains_key(&pid)
    }

    async fn unregister(&self, pid: u64) {
        self.handles.write().await.remove(&pid);
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Launches `path` as a child script with a deep copy of `args` bound as
/// its `context()` payload, registers the handle, and returns its pid
/// immediately (`spec.md` §4.E `spawn`).
pub async fn spawn(ev: &Evaluator, path: String, args: Value) -> EvalResult<Value> {
    let pid = ev.processes.next_pid();
    let (cancel, join) = launch_child(ev, pid, path.clone(), args).await?;
    let handle = ProcessHandle { pid, path, started_at: Instant::now(), cancel };
    ev.processes.handles.write().await.insert(pid, handle);
    let processes = ev.processes.clone();
    tokio::spawn(async move {
        let _ = join.await;
        processes.unregister(pid).await;
    });
    Ok(Value::Number(pid as f64))
}

/// Synchronous form: launches the child, blocks for completion, and
/// returns its `exit(value)`/return value, or propagates an uncaught
/// error (`spec.md` §4.E `run`).
pub async fn run(ev: &Evaluator, path: String, args: Value) -> EvalResult<Value> {
    let pid = ev.processes.next_pid();
    let (cancel, join) = launch_child(ev, pid, path.clone(), args).await?;
    let handle = ProcessHandle { pid, path, started_at: Instant::now(), cancel };
    ev.processes.handles.write().await.insert(pid, handle);
    let result = join.await.map_err(|e| Flow::Error(crate::interpreter::error::RuntimeError::new(
        DuError::Type(format!("child task panicked: {}", e)),
        ev.ctx.file_path.clone(),
        Default::default(),
        vec![],
    )));
    ev.processes.unregister(pid).await;
    result?
}

async fn launch_child(
    ev: &Evaluator,
    pid: u64,
    path: String,
    args: Value,
) -> EvalResult<(CancellationToken, JoinHandle<EvalResult<Value>>)> {
    let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
        ev.data_err(DuError::Type(format!("cannot read script '{}': {}", path, e)), Default::default())
    })?;
    let args_copy = args.deep_copy().await;
    let datastores = ev.datastores.clone();
    let processes = ev.processes.clone();
    let http_servers = ev.http_servers.clone();
    let mut child =
        Evaluator::spawn_child_full(path.clone(), datastores, processes, http_servers, Some(ContextPayload::SpawnArgs(args_copy))).await;
    let cancel = child.cancellation_token();
    let join = tokio::spawn(async move {
        let program = match crate::parser::parse(&source) {
            Ok(p) => p,
            Err(e) => {
                warn!(pid, error = %e, "spawned script failed to parse");
                return Err(Flow::Error(crate::interpreter::error::RuntimeError::new(
                    DuError::Parse(e.to_string()),
                    path.clone(),
                    Default::default(),
                    vec![],
                )));
            }
        };
        info!(pid, %path, "spawned child task starting");
        child.run_program(&program).await
    });
    Ok((cancel, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DatastoreRegistry;

    #[tokio::test(flavor = "multi_thread")]
    async fn killing_unknown_pid_returns_false() {
        let registry = ProcessRegistry::new();
        assert!(!registry.kill(99).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pid_allocation_is_monotonic() {
        let registry = ProcessRegistry::new();
        let a = registry.next_pid();
        let b = registry.next_pid();
        assert!(b > a);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_unregisters_its_pid_once_the_child_finishes() {
        let processes = Arc::new(ProcessRegistry::new());
        let ev = Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), processes.clone()).await;
        let suffix = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir().join(format!("du_spawn_unregister_test_{}.du", suffix));
        tokio::fs::write(&path, "exit(1)").await.unwrap();

        let pid = spawn(&ev, path.to_string_lossy().to_string(), Value::Nil).await.unwrap().to_number() as u64;
        assert!(ev.processes.contains(pid).await);

        for _ in 0..100 {
            if !ev.processes.contains(pid).await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!ev.processes.contains(pid).await);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
