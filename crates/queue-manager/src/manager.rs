//! [`QueueManager`]: a named collection of [`MessageQueue`]s with optional
//! disk persistence of in-flight state (§4.2 "Persistence").

use crate::message::QueuedMessage;
use crate::queue::{MessageQueue, QueueConfig};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum QueueManagerError {
    #[error("queue '{0}' not found")]
    QueueNotFound(String),
    #[error("queue '{0}' already exists")]
    QueueAlreadyExists(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueManagerError>;

pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("./data/queues"),
            interval: Duration::from_secs(30),
        }
    }
}

pub struct QueueManager {
    queues: Arc<DashMap<String, Arc<MessageQueue>>>,
    persistence: PersistenceConfig,
}

impl QueueManager {
    pub fn new(persistence: PersistenceConfig) -> Arc<Self> {
        let manager = Arc::new(Self { queues: Arc::new(DashMap::new()), persistence });
        if manager.persistence.enabled {
            let manager_clone = manager.clone();
            tokio::spawn(async move { manager_clone.maintenance_loop().await });
        }
        manager
    }

    pub fn create_queue(&self, config: QueueConfig) -> Result<Arc<MessageQueue>> {
        let name = config.name.clone();
        if self.queues.contains_key(&name) {
            return Err(QueueManagerError::QueueAlreadyExists(name));
        }
        let queue = MessageQueue::new(config);
        if self.persistence.enabled {
            if let Ok(restored) = self.load_snapshot(&name) {
                queue.restore(restored);
            }
        }
        self.queues.insert(name, queue.clone());
        Ok(queue)
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<MessageQueue>> {
        self.queues
            .get(name)
            .map(|q| q.clone())
            .ok_or_else(|| QueueManagerError::QueueNotFound(name.to_string()))
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    fn snapshot_path(&self, queue_name: &str) -> PathBuf {
        self.persistence.directory.join(format!("{queue_name}.json"))
    }

    fn load_snapshot(&self, queue_name: &str) -> Result<Vec<QueuedMessage>> {
        let path = self.snapshot_path(queue_name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&path)?;
        let messages: Vec<QueuedMessage> = serde_json::from_slice(&bytes)?;
        Ok(messages)
    }

    fn persist_queue(&self, name: &str, queue: &MessageQueue) -> Result<()> {
        std::fs::create_dir_all(&self.persistence.directory)?;
        let path = self.snapshot_path(name);
        let messages = queue.persistable_messages();
        let bytes = serde_json::to_vec_pretty(&messages)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.persistence.interval);
        loop {
            ticker.tick().await;
            for entry in self.queues.iter() {
                if let Err(err) = self.persist_queue(entry.key(), entry.value()) {
                    error!(queue = entry.key(), error = %err, "failed to persist queue snapshot");
                } else {
                    info!(queue = entry.key(), "persisted queue snapshot");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QueueType;
    use std::collections::HashMap;

    #[tokio::test]
    async fn create_and_fetch_queue_round_trip() {
        let manager = QueueManager::new(PersistenceConfig::default());
        manager
            .create_queue(QueueConfig { name: "orders".to_string(), queue_type: QueueType::Fifo, ..Default::default() })
            .unwrap();
        assert!(manager.get_queue("orders").is_ok());
        assert!(manager.get_queue("missing").is_err());
    }

    #[tokio::test]
    async fn persistence_round_trips_queued_messages() {
        let dir = tempfile::tempdir().unwrap();
        let manager = QueueManager::new(PersistenceConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            interval: Duration::from_secs(3600),
        });
        let queue = manager
            .create_queue(QueueConfig { name: "billing".to_string(), queue_type: QueueType::Fifo, ..Default::default() })
            .unwrap();
        let future_time = chrono::Utc::now() + chrono::Duration::seconds(3600);
        queue.enqueue(serde_json::json!({"a": 1}), 0, Some(future_time), None, None, None, vec![], HashMap::new());
        manager.persist_queue("billing", &queue).unwrap();

        let manager2 = QueueManager::new(PersistenceConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            interval: Duration::from_secs(3600),
        });
        let queue2 = manager2
            .create_queue(QueueConfig { name: "billing".to_string(), queue_type: QueueType::Fifo, ..Default::default() })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue2.persistable_messages().len(), 1);
    }
}
