use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::store::{KeyValueStore, StoreError, StoreResult};

enum Node {
    Dir,
    Value {
        value: String,
        expires_at: Option<Instant>,
    },
}

impl Node {
    fn expired(&self, now: Instant) -> bool {
        matches!(self, Node::Value { expires_at: Some(at), .. } if *at <= now)
    }
}

/// In-process store used when no etcd cluster is configured. Expiration
/// follows the tokio clock, so paused-time tests can drive it.
#[derive(Default)]
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(nodes: &mut BTreeMap<String, Node>) {
        let now = Instant::now();
        nodes.retain(|_, node| !node.expired(now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn create_dir(&self, key: &str) -> StoreResult<()> {
        let mut nodes = self.nodes.lock();
        Self::purge_expired(&mut nodes);
        if nodes.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        nodes.insert(key.to_string(), Node::Dir);
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut nodes = self.nodes.lock();
        nodes.insert(
            key.to_string(),
            Node::Value {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut nodes = self.nodes.lock();
        Self::purge_expired(&mut nodes);
        match nodes.get_mut(key) {
            Some(Node::Value { value: current, .. }) => {
                *current = value.to_string();
                Ok(())
            }
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let mut nodes = self.nodes.lock();
        Self::purge_expired(&mut nodes);
        match nodes.get(key) {
            Some(Node::Value { value, .. }) => Ok(value.clone()),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        let mut nodes = self.nodes.lock();
        Self::purge_expired(&mut nodes);
        if !matches!(nodes.get(dir), Some(Node::Dir)) {
            return Err(StoreError::NotFound(dir.to_string()));
        }

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .filter_map(|(_, node)| match node {
                Node::Value { value, .. } => Some(value.clone()),
                Node::Dir => None,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut nodes = self.nodes.lock();
        Self::purge_expired(&mut nodes);
        if nodes.remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let prefix = format!("{}/", key.trim_end_matches('/'));
        nodes.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_dir_twice_reports_exists() {
        let store = MemoryStore::new();
        store.create_dir("/fleet/tasks").await.unwrap();

        assert!(matches!(
            store.create_dir("/fleet/tasks").await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_list_returns_direct_children_in_key_order() {
        let store = MemoryStore::new();
        store.create_dir("/fleet/tasks").await.unwrap();
        store.set("/fleet/tasks/b", "2", None).await.unwrap();
        store.set("/fleet/tasks/a", "1", None).await.unwrap();
        store.set("/fleet/tasks/a/nested", "x", None).await.unwrap();
        store.set("/fleet/tasksx", "y", None).await.unwrap();

        assert_eq!(store.list("/fleet/tasks").await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_update_requires_existing_key() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update("/k", "v").await,
            Err(StoreError::NotFound(_))
        ));

        store.set("/k", "v1", None).await.unwrap();
        store.update("/k", "v2").await.unwrap();
        assert_eq!(store.get("/k").await.unwrap(), "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_with_ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("/lease", "alive", Some(Duration::from_secs(20)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(19)).await;
        assert_eq!(store.get("/lease").await.unwrap(), "alive");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            store.get("/lease").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshing_ttl_extends_lease() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_secs(20));
        store.set("/lease", "v", ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        store.set("/lease", "v", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        assert!(store.get("/lease").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let store = MemoryStore::new();
        store.create_dir("/d").await.unwrap();
        store.set("/d/x", "1", None).await.unwrap();

        store.delete("/d").await.unwrap();

        assert!(store.get("/d/x").await.is_err());
        assert!(matches!(store.delete("/d").await, Err(StoreError::NotFound(_))));
    }
}
