use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CheckpointInfo, CheckpointSink};
use crate::error::{PilotError, PilotResult};
use crate::models::{Plan, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub plan: Plan,
}

impl StoredCheckpoint {
    fn new(plan: &Plan) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            plan: plan.clone(),
        }
    }

    fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            id: self.id.clone(),
            plan_id: self.plan.id.clone(),
            goal: self.plan.goal.clone(),
            created_at: self.created_at,
            completed_steps: self
                .plan
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count(),
            total_steps: self.plan.steps.len(),
        }
    }
}

fn newest_first(mut infos: Vec<CheckpointInfo>) -> Vec<CheckpointInfo> {
    infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    infos
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, StoredCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointSink for MemoryCheckpointStore {
    async fn save_checkpoint(&self, plan: &Plan) -> PilotResult<String> {
        let stored = StoredCheckpoint::new(plan);
        let id = stored.id.clone();
        self.checkpoints.write().await.insert(id.clone(), stored);
        debug!(checkpoint = %id, plan_id = %plan.id, "Stored checkpoint in memory");
        Ok(id)
    }

    async fn load_checkpoint(&self, id: &str) -> PilotResult<Plan> {
        self.checkpoints
            .read()
            .await
            .get(id)
            .map(|c| c.plan.clone())
            .ok_or_else(|| PilotError::CheckpointNotFound(id.to_string()))
    }

    async fn list_checkpoints(&self) -> PilotResult<Vec<CheckpointInfo>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(newest_first(
            checkpoints.values().map(StoredCheckpoint::info).collect(),
        ))
    }
}

/// One pretty-printed JSON file per checkpoint under `directory`.
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> PilotResult<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(PilotError::CheckpointNotFound(id.to_string()));
        }
        Ok(self.directory.join(format!("{}.json", id)))
    }

    async fn read(&self, path: &Path) -> PilotResult<StoredCheckpoint> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl CheckpointSink for FileCheckpointStore {
    async fn save_checkpoint(&self, plan: &Plan) -> PilotResult<String> {
        let stored = StoredCheckpoint::new(plan);
        let path = self.path_for(&stored.id)?;
        let json = serde_json::to_string_pretty(&stored)?;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| PilotError::CheckpointFailed(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PilotError::CheckpointFailed(e.to_string()))?;

        info!(checkpoint = %stored.id, path = %path.display(), "Saved checkpoint");
        Ok(stored.id)
    }

    async fn load_checkpoint(&self, id: &str) -> PilotResult<Plan> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(PilotError::CheckpointNotFound(id.to_string()));
        }
        Ok(self.read(&path).await?.plan)
    }

    async fn list_checkpoints(&self) -> PilotResult<Vec<CheckpointInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(stored) => infos.push(stored.info()),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable checkpoint: {}", e),
            }
        }
        Ok(newest_first(infos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;

    fn plan() -> Plan {
        Plan::new("demo", vec![Step::new("s1", "one"), Step::new("s2", "two")])
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryCheckpointStore::new();
        let plan = plan();
        let id = store.save_checkpoint(&plan).await.unwrap();
        assert_eq!(store.load_checkpoint(&id).await.unwrap(), plan);
        assert!(matches!(
            store.load_checkpoint("missing").await.unwrap_err(),
            PilotError::CheckpointNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_file_store_persists_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));

        assert!(store.list_checkpoints().await.unwrap().is_empty());

        let first = store.save_checkpoint(&plan()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.save_checkpoint(&plan()).await.unwrap();

        let listed = store.list_checkpoints().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
        assert_eq!(listed[0].total_steps, 2);

        let loaded = store.load_checkpoint(&first).await.unwrap();
        assert_eq!(loaded.goal, "demo");
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load_checkpoint("../etc/passwd").await.is_err());
    }
}
