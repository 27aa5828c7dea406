use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::Serialize;

use crate::lib::cluster::types::{ClusterError, ClusterInterface};
use crate::lib::registry::durable::DurableRegistry;
use crate::lib::tasks::{
    state::valid_state_transition,
    types::{State, Task, TaskId},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LaunchOutcome {
    Pending,
    Launched { slave_id: String },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub launch: LaunchOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task {0} not found")]
    UnknownTask(TaskId),

    #[error("task {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition { id: TaskId, from: State, to: State },

    #[error("task {0} is already bound to a node")]
    SlaveAlreadyAssigned(TaskId),

    #[error(transparent)]
    Remote(#[from] ClusterError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

struct Entry {
    task: Task,
    launch: LaunchOutcome,
}

#[derive(Default)]
struct Table {
    order: Vec<TaskId>,
    entries: HashMap<TaskId, Entry>,
}

/// Listing order and per-id lookup share one lock; state lives in the entry.
pub struct TaskRegistry {
    table: RwLock<Table>,
    cluster: Arc<dyn ClusterInterface>,
    durable: Option<Arc<DurableRegistry>>,
}

impl TaskRegistry {
    pub fn new(cluster: Arc<dyn ClusterInterface>) -> Self {
        TaskRegistry {
            table: RwLock::new(Table::default()),
            cluster,
            durable: None,
        }
    }

    pub fn with_durable(mut self, durable: Arc<DurableRegistry>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn add(&self, task: Task) {
        let mut table = self.table.write();
        let id = task.id.clone();
        if table.entries.contains_key(&id) {
            tracing::warn!(task_id = %id, "Replacing task with duplicate id");
        } else {
            table.order.push(id.clone());
        }
        table.entries.insert(
            id,
            Entry {
                task,
                launch: LaunchOutcome::Pending,
            },
        );
    }

    pub fn list(&self) -> Vec<TaskView> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id))
            .map(|entry| TaskView {
                task: entry.task.clone(),
                launch: entry.launch.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().order.len()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.table.read().entries.get(id).map(|e| e.task.clone())
    }

    pub fn state(&self, id: &TaskId) -> Option<State> {
        self.table.read().entries.get(id).map(|e| e.task.state)
    }

    pub fn launch_outcome(&self, id: &TaskId) -> Option<LaunchOutcome> {
        self.table.read().entries.get(id).map(|e| e.launch.clone())
    }

    /// Only the first binding sticks.
    pub fn assign_slave(&self, id: &TaskId, slave_id: &str) -> RegistryResult<()> {
        let mut table = self.table.write();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownTask(id.clone()))?;
        if entry.task.slave_id.is_some() {
            return Err(RegistryError::SlaveAlreadyAssigned(id.clone()));
        }
        entry.task.slave_id = Some(slave_id.to_string());
        Ok(())
    }

    pub fn record_launch(&self, id: &TaskId, outcome: LaunchOutcome) {
        if let Some(entry) = self.table.write().entries.get_mut(id) {
            entry.launch = outcome;
        }
    }

    /// Moves a task to `state`, returning the state it left.
    pub fn update_state(&self, id: &TaskId, state: State) -> RegistryResult<State> {
        let mut table = self.table.write();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownTask(id.clone()))?;

        let previous = entry.task.state;
        if !valid_state_transition(&previous, &state) {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from: previous,
                to: state,
            });
        }
        entry.task.state = state;
        Ok(previous)
    }

    pub async fn kill(&self, id: &TaskId) -> RegistryResult<()> {
        self.cluster.kill_task(id).await?;
        Ok(())
    }

    /// Kills the task, then drops it. Nothing is removed when the kill fails.
    pub async fn delete(&self, id: &TaskId) -> RegistryResult<()> {
        self.cluster.kill_task(id).await?;

        let removed = {
            let mut table = self.table.write();
            let order: Vec<TaskId> = table.order.iter().filter(|t| *t != id).cloned().collect();
            table.order = order;
            table.entries.remove(id).is_some()
        };

        if let Err(e) = self.cluster.release_task(id).await {
            tracing::warn!(task_id = %id, error = %e, "Failed to release cluster resources");
        }

        if removed {
            if let Some(durable) = &self.durable {
                if let Err(e) = durable.delete(id).await {
                    tracing::warn!(task_id = %id, error = %e, "Failed to delete task from store");
                }
            }
        }

        Ok(())
    }

    /// Failures are logged only.
    pub async fn persist(&self, id: &TaskId) {
        let Some(durable) = &self.durable else {
            return;
        };
        let Some(task) = self.get(id) else {
            return;
        };
        if let Err(e) = durable.register(id, &task).await {
            tracing::warn!(task_id = %id, error = %e, "Failed to persist task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::cluster::stub::StubCluster;
    use crate::lib::registry::memory::MemoryStore;
    use crate::lib::tasks::types::TaskSpec;

    fn task(id: &str) -> Task {
        Task::new(
            TaskId::from(id),
            TaskSpec {
                cmd: "true".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_list_preserves_submission_order() {
        let registry = TaskRegistry::new(StubCluster::new());
        registry.add(task("b"));
        registry.add(task("a"));
        registry.add(task("c"));

        let ids: Vec<String> = registry.list().into_iter().map(|v| v.task.id.0).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_update_state_is_visible_in_next_listing() {
        let registry = TaskRegistry::new(StubCluster::new());
        let id = TaskId::from("a");
        registry.add(task("a"));
        let before = registry.list();

        let previous = registry.update_state(&id, State::Running).unwrap();

        assert_eq!(previous, State::Staging);
        assert_eq!(before[0].task.state, State::Staging);
        assert_eq!(registry.list()[0].task.state, State::Running);
        assert_eq!(registry.state(&id), Some(State::Running));
    }

    #[test]
    fn test_update_state_rejects_leaving_terminal_state() {
        let registry = TaskRegistry::new(StubCluster::new());
        let id = TaskId::from("a");
        registry.add(task("a"));
        registry.update_state(&id, State::Finished).unwrap();

        let err = registry.update_state(&id, State::Running).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(registry.state(&id), Some(State::Finished));
    }

    #[test]
    fn test_update_state_unknown_task() {
        let registry = TaskRegistry::new(StubCluster::new());
        let err = registry
            .update_state(&TaskId::from("ghost"), State::Running)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTask(_)));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_slave_is_assigned_once() {
        let registry = TaskRegistry::new(StubCluster::new());
        let id = TaskId::from("a");
        registry.add(task("a"));

        registry.assign_slave(&id, "slave-1").unwrap();
        assert!(matches!(
            registry.assign_slave(&id, "slave-2"),
            Err(RegistryError::SlaveAlreadyAssigned(_))
        ));
        assert_eq!(registry.get(&id).unwrap().slave_id.as_deref(), Some("slave-1"));
    }

    #[tokio::test]
    async fn test_delete_removes_task_after_kill() {
        let cluster = StubCluster::new();
        let registry = TaskRegistry::new(cluster.clone());
        registry.add(task("a"));
        registry.add(task("b"));

        registry.delete(&TaskId::from("a")).await.unwrap();

        assert_eq!(cluster.calls.lock().killed, vec![TaskId::from("a")]);
        assert_eq!(cluster.calls.lock().released, vec![TaskId::from("a")]);
        let ids: Vec<String> = registry.list().into_iter().map(|v| v.task.id.0).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(registry.get(&TaskId::from("a")).is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_id_still_kills() {
        let cluster = StubCluster::new();
        let registry = TaskRegistry::new(cluster.clone());

        registry.delete(&TaskId::from("ghost")).await.unwrap();

        assert_eq!(cluster.calls.lock().killed, vec![TaskId::from("ghost")]);
    }

    #[tokio::test]
    async fn test_delete_keeps_task_when_kill_fails() {
        let cluster = StubCluster::new();
        *cluster.fail_kill.lock() = true;
        let registry = TaskRegistry::new(cluster.clone());
        registry.add(task("a"));

        assert!(registry.delete(&TaskId::from("a")).await.is_err());
        assert_eq!(registry.len(), 1);
        assert!(cluster.calls.lock().released.is_empty());
    }

    #[tokio::test]
    async fn test_kill_leaves_task_listed_in_prior_state() {
        let cluster = StubCluster::new();
        let registry = TaskRegistry::new(cluster.clone());
        let id = TaskId::from("a");
        registry.add(task("a"));
        registry.update_state(&id, State::Running).unwrap();

        registry.kill(&id).await.unwrap();

        assert_eq!(cluster.calls.lock().killed, vec![id.clone()]);
        assert_eq!(registry.state(&id), Some(State::Running));
    }

    #[tokio::test]
    async fn test_persist_and_delete_mirror_into_durable_registry() {
        let cluster = StubCluster::new();
        let store = Arc::new(MemoryStore::new());
        let durable = Arc::new(
            DurableRegistry::new(store, cluster.clone(), "/fleet")
                .await
                .unwrap(),
        );
        let registry = TaskRegistry::new(cluster).with_durable(durable.clone());
        let id = TaskId::from("a");
        registry.add(task("a"));

        registry.persist(&id).await;
        assert_eq!(durable.fetch(&id).await.unwrap(), registry.get(&id).unwrap());

        registry.delete(&id).await.unwrap();
        assert!(durable.fetch(&id).await.is_err());
    }
}
