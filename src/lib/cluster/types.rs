use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::lib::tasks::types::{Resources, State, TaskId};

/// A grant of resources on one node. Only `slave_id` matters to the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: String,
    pub slave_id: String,
    pub hostname: String,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub port: u16,
    pub resources: Resources,
}

/// Everything needed to start a task on a matched offer.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub task_id: TaskId,
    pub resources: Resources,
    pub command: String,
    pub image: String,
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub state: State,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Registered { framework_id: String },
    Update(StatusUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Registered,
    Update,
}

impl ClusterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClusterEvent::Registered { .. } => EventKind::Registered,
            ClusterEvent::Update(_) => EventKind::Update,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("task {0} is not known to the cluster")]
    NotFound(String),

    #[error("framework registration failed: {0}")]
    Registration(String),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("event feed closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Contract with the cluster resource manager. Every call may block for as
/// long as the manager takes; callers impose no timeouts.
#[async_trait]
pub trait ClusterInterface: Send + Sync {
    async fn register_framework(&self) -> ClusterResult<()>;

    async fn unregister_framework(&self) -> ClusterResult<()>;

    async fn request_offers(&self, requirement: &Resources) -> ClusterResult<Vec<Offer>>;

    async fn launch_task(&self, offer: &Offer, request: LaunchRequest) -> ClusterResult<()>;

    /// Killing a task the cluster never launched succeeds without effect.
    async fn kill_task(&self, task_id: &TaskId) -> ClusterResult<()>;

    /// Frees whatever the cluster still holds for a deleted task.
    async fn release_task(&self, _task_id: &TaskId) -> ClusterResult<()> {
        Ok(())
    }

    async fn read_file(
        &self,
        task_id: &TaskId,
        files: &[String],
    ) -> ClusterResult<HashMap<String, String>>;

    async fn nodes(&self) -> ClusterResult<Vec<NodeRecord>>;

    fn events(&self, kind: EventKind) -> EventFeed;

    async fn metrics(&self) -> ClusterResult<serde_json::Map<String, serde_json::Value>>;
}

/// Fans cluster events out to subscribers. Each subscriber gets its own
/// unbounded queue, so a slow consumer delays events but never loses them.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<(EventKind, mpsc::UnboundedSender<ClusterEvent>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind) -> EventFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push((kind, sender));
        EventFeed { receiver }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: ClusterEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sender)| !sender.is_closed());

        subscribers
            .iter()
            .filter(|(wanted, _)| *wanted == kind)
            .filter(|(_, sender)| sender.send(event.clone()).is_ok())
            .count()
    }
}

pub struct EventFeed {
    receiver: mpsc::UnboundedReceiver<ClusterEvent>,
}

impl EventFeed {
    pub async fn recv(&mut self) -> ClusterResult<ClusterEvent> {
        self.receiver.recv().await.ok_or(ClusterError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str) -> StatusUpdate {
        StatusUpdate {
            task_id: TaskId::from(id),
            state: State::Running,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_event_feed_filters_by_kind() {
        let bus = EventBus::new();
        let mut feed = bus.subscribe(EventKind::Update);

        assert_eq!(
            bus.publish(ClusterEvent::Registered {
                framework_id: "fw".to_string(),
            }),
            0
        );
        assert_eq!(bus.publish(ClusterEvent::Update(update("abc"))), 1);

        assert_eq!(feed.recv().await.unwrap(), ClusterEvent::Update(update("abc")));
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_event() {
        let bus = EventBus::new();
        let mut feed = bus.subscribe(EventKind::Update);

        for i in 0..5_000 {
            bus.publish(ClusterEvent::Update(update(&i.to_string())));
        }

        for i in 0..5_000 {
            assert_eq!(
                feed.recv().await.unwrap(),
                ClusterEvent::Update(update(&i.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() {
        let bus = EventBus::new();
        let feed = bus.subscribe(EventKind::Update);
        drop(feed);

        assert_eq!(bus.publish(ClusterEvent::Update(update("abc"))), 0);
        assert!(bus.subscribers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_event_feed_reports_closed() {
        let bus = EventBus::new();
        let mut feed = bus.subscribe(EventKind::Update);
        drop(bus);

        assert!(matches!(feed.recv().await, Err(ClusterError::Closed)));
    }
}
