use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agent::AgentLoop;
use crate::pipeline::Pipeline;

/// A run that can be tracked by key and stopped from outside.
pub trait ActiveRun: Send + Sync {
    fn run_id(&self) -> &str;

    fn is_finished(&self) -> bool;

    fn abort_run(&self, reason: &str);
}

impl ActiveRun for AgentLoop {
    fn run_id(&self) -> &str {
        AgentLoop::run_id(self)
    }

    fn is_finished(&self) -> bool {
        AgentLoop::is_finished(self) || self.is_aborted()
    }

    fn abort_run(&self, reason: &str) {
        self.abort(reason);
    }
}

impl ActiveRun for Pipeline {
    fn run_id(&self) -> &str {
        Pipeline::run_id(self)
    }

    fn is_finished(&self) -> bool {
        Pipeline::is_finished(self) || self.is_aborted()
    }

    fn abort_run(&self, _reason: &str) {
        self.abort();
    }
}

/// At most one live run per key.
pub struct RunRegistry<R: ActiveRun> {
    runs: RwLock<HashMap<String, Arc<R>>>,
}

impl<R: ActiveRun> Default for RunRegistry<R> {
    fn default() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: ActiveRun> RunRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `run` under `key`. A live run already under the key is aborted
    /// and returned.
    pub async fn register(&self, key: &str, run: Arc<R>) -> Option<Arc<R>> {
        let previous = self.runs.write().await.insert(key.to_string(), run.clone());

        match previous {
            Some(old) if !old.is_finished() && !Arc::ptr_eq(&old, &run) => {
                info!(key, old_run = old.run_id(), new_run = run.run_id(), "Replacing live run");
                old.abort_run("replaced by a new run");
                Some(old)
            }
            _ => {
                debug!(key, run_id = run.run_id(), "Registered run");
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<R>> {
        self.runs.read().await.get(key).cloned()
    }

    /// Abort the run under `key`. Returns false when there is none or it
    /// already finished.
    pub async fn abort(&self, key: &str, reason: &str) -> bool {
        let Some(run) = self.get(key).await else {
            return false;
        };
        if run.is_finished() {
            return false;
        }
        run.abort_run(reason);
        true
    }

    /// Remove `key` only if it still maps to `run`.
    pub async fn evict(&self, key: &str, run: &Arc<R>) -> bool {
        let mut runs = self.runs.write().await;
        match runs.get(key) {
            Some(current) if Arc::ptr_eq(current, run) => {
                runs.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Keys with a run that has not finished, sorted.
    pub async fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .runs
            .read()
            .await
            .iter()
            .filter(|(_, run)| !run.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}
