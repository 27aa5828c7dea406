//! Scripted cluster used by tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::types::{
    ClusterError, ClusterEvent, ClusterInterface, ClusterResult, EventBus, EventFeed, EventKind,
    LaunchRequest, NodeRecord, Offer, StatusUpdate,
};
use crate::lib::tasks::types::{Resources, State, TaskId};

#[derive(Default)]
pub struct StubCalls {
    pub offers_requested: Vec<Resources>,
    pub launched: Vec<(String, LaunchRequest)>,
    pub killed: Vec<TaskId>,
    pub released: Vec<TaskId>,
    pub files_read: Vec<TaskId>,
    pub registered: bool,
    pub unregistered: bool,
}

pub struct StubCluster {
    pub offers: Mutex<Vec<Offer>>,
    pub offer_delay: Mutex<Option<Duration>>,
    pub fail_launch: Mutex<bool>,
    pub fail_kill: Mutex<bool>,
    pub fail_nodes: Mutex<bool>,
    pub files: Mutex<HashMap<String, String>>,
    pub nodes: Mutex<Vec<NodeRecord>>,
    pub calls: Mutex<StubCalls>,
    bus: EventBus,
}

impl StubCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(StubCluster {
            offers: Mutex::new(vec![offer("slave-1"), offer("slave-2")]),
            offer_delay: Mutex::new(None),
            fail_launch: Mutex::new(false),
            fail_kill: Mutex::new(false),
            fail_nodes: Mutex::new(false),
            files: Mutex::new(HashMap::new()),
            nodes: Mutex::new(vec![]),
            calls: Mutex::new(StubCalls::default()),
            bus: EventBus::new(),
        })
    }

    pub fn without_offers() -> Arc<Self> {
        let stub = Self::new();
        stub.offers.lock().clear();
        stub
    }

    pub fn emit(&self, task_id: &TaskId, state: State) {
        self.bus.publish(ClusterEvent::Update(StatusUpdate {
            task_id: task_id.clone(),
            state,
            message: Some("stub".to_string()),
        }));
    }

    pub fn emit_registered(&self) {
        self.bus.publish(ClusterEvent::Registered {
            framework_id: "stub-framework".to_string(),
        });
    }
}

pub fn offer(slave_id: &str) -> Offer {
    Offer {
        id: format!("offer-{}", slave_id),
        slave_id: slave_id.to_string(),
        hostname: format!("{}.local", slave_id),
        resources: Resources {
            cpus: 8.0,
            mem: 16_384,
            disk: 100_000,
        },
    }
}

pub fn node(id: &str) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        hostname: format!("{}.local", id),
        attributes: HashMap::from([("rack".to_string(), "r1".to_string())]),
        port: 5051,
        resources: Resources {
            cpus: 4.0,
            mem: 8192,
            disk: 50_000,
        },
    }
}

#[async_trait]
impl ClusterInterface for StubCluster {
    async fn register_framework(&self) -> ClusterResult<()> {
        self.calls.lock().registered = true;
        self.emit_registered();
        Ok(())
    }

    async fn unregister_framework(&self) -> ClusterResult<()> {
        self.calls.lock().unregistered = true;
        Ok(())
    }

    async fn request_offers(&self, requirement: &Resources) -> ClusterResult<Vec<Offer>> {
        self.calls.lock().offers_requested.push(*requirement);
        let delay = *self.offer_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.offers.lock().clone())
    }

    async fn launch_task(&self, offer: &Offer, request: LaunchRequest) -> ClusterResult<()> {
        if *self.fail_launch.lock() {
            return Err(ClusterError::Other("launch rejected".to_string()));
        }
        self.calls
            .lock()
            .launched
            .push((offer.slave_id.clone(), request));
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId) -> ClusterResult<()> {
        self.calls.lock().killed.push(task_id.clone());
        if *self.fail_kill.lock() {
            return Err(ClusterError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn release_task(&self, task_id: &TaskId) -> ClusterResult<()> {
        self.calls.lock().released.push(task_id.clone());
        Ok(())
    }

    async fn read_file(
        &self,
        task_id: &TaskId,
        files: &[String],
    ) -> ClusterResult<HashMap<String, String>> {
        self.calls.lock().files_read.push(task_id.clone());
        let stored = self.files.lock();
        Ok(files
            .iter()
            .filter_map(|f| stored.get(f).map(|c| (f.clone(), c.clone())))
            .collect())
    }

    async fn nodes(&self) -> ClusterResult<Vec<NodeRecord>> {
        if *self.fail_nodes.lock() {
            return Err(ClusterError::Other("master unreachable".to_string()));
        }
        Ok(self.nodes.lock().clone())
    }

    fn events(&self, kind: EventKind) -> EventFeed {
        self.bus.subscribe(kind)
    }

    async fn metrics(&self) -> ClusterResult<serde_json::Map<String, serde_json::Value>> {
        let mut metrics = serde_json::Map::new();
        metrics.insert("master/slaves_active".to_string(), 2.into());
        Ok(metrics)
    }
}
