use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use super::store::{KeyValueStore, StoreError, StoreResult, join_key};
use crate::lib::cluster::types::{ClusterInterface, NodeRecord};
use crate::lib::tasks::types::{Task, TaskId};

const TASKS_DIR: &str = "tasks";
const SLAVES_DIR: &str = "slaves";

/// Task and node records persisted as JSON under `<root>/tasks/<id>` and
/// `<root>/slaves/<id>`.
pub struct DurableRegistry {
    store: Arc<dyn KeyValueStore>,
    cluster: Arc<dyn ClusterInterface>,
    root: String,
}

impl DurableRegistry {
    /// Makes sure both namespaces exist. An existing directory is fine; any
    /// other failure is returned.
    pub async fn new(
        store: Arc<dyn KeyValueStore>,
        cluster: Arc<dyn ClusterInterface>,
        root: &str,
    ) -> StoreResult<Self> {
        let registry = DurableRegistry {
            store,
            cluster,
            root: join_key(&[root]),
        };

        for dir in [registry.tasks_dir(), registry.slaves_dir()] {
            match registry.store.create_dir(&dir).await {
                Ok(()) => tracing::debug!(dir = %dir, "Created store directory"),
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(registry)
    }

    pub fn tasks_dir(&self) -> String {
        join_key(&[&self.root, TASKS_DIR])
    }

    pub fn slaves_dir(&self) -> String {
        join_key(&[&self.root, SLAVES_DIR])
    }

    fn task_key(&self, id: &TaskId) -> String {
        join_key(&[&self.root, TASKS_DIR, id.as_str()])
    }

    fn slave_key(&self, id: &str) -> String {
        join_key(&[&self.root, SLAVES_DIR, id])
    }

    /// Creates or overwrites the record for `id`.
    pub async fn register(&self, id: &TaskId, task: &Task) -> StoreResult<()> {
        self.store.set(&self.task_key(id), &marshal(task)?, None).await
    }

    pub async fn fetch(&self, id: &TaskId) -> StoreResult<Task> {
        let data = self.store.get(&self.task_key(id)).await?;
        unmarshal(&data)
    }

    pub async fn tasks(&self) -> StoreResult<Vec<Task>> {
        self.store
            .list(&self.tasks_dir())
            .await?
            .iter()
            .map(|data| unmarshal(data))
            .collect()
    }

    /// Overwrites an existing record; fails with `NotFound` when there is none.
    pub async fn update(&self, id: &TaskId, task: &Task) -> StoreResult<()> {
        self.store.update(&self.task_key(id), &marshal(task)?).await
    }

    pub async fn delete(&self, id: &TaskId) -> StoreResult<()> {
        self.store.delete(&self.task_key(id)).await
    }

    pub async fn node(&self, id: &str) -> StoreResult<NodeRecord> {
        let data = self.store.get(&self.slave_key(id)).await?;
        unmarshal(&data)
    }

    pub async fn nodes(&self) -> StoreResult<Vec<NodeRecord>> {
        self.store
            .list(&self.slaves_dir())
            .await?
            .iter()
            .map(|data| unmarshal(data))
            .collect()
    }

    /// One reconciliation pass: republish every node the cluster reports,
    /// each with a `ttl` lease. Returns how many records were written.
    pub async fn reconcile_nodes(&self, ttl: Duration) -> usize {
        let nodes = match self.cluster.nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!(error = %e, "fetch slave information");
                return 0;
            }
        };

        let mut written = 0;
        for node in nodes {
            let data = match marshal(&node) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(node_id = %node.id, error = %e, "marshal slave information");
                    continue;
                }
            };

            match self.store.set(&self.slave_key(&node.id), &data, Some(ttl)).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::error!(node_id = %node.id, error = %e, "set slave information in store")
                }
            }
        }

        tracing::debug!(written, "Node inventory refreshed");
        written
    }

    /// Refreshes the node inventory every `interval` until the process exits.
    /// Failures are logged and the next tick proceeds as usual.
    pub fn spawn_reconciliation(
        self: &Arc<Self>,
        interval: Duration,
        ttl: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                registry.reconcile_nodes(ttl).await;
            }
        })
    }
}

fn marshal<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn unmarshal<T: DeserializeOwned>(data: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(data)?)
}
