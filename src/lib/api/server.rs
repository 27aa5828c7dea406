use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lib::cluster::types::{ClusterError, ClusterInterface};
use crate::lib::manager::{
    coordinator::{SubmissionCoordinator, Submission, SubmitError},
    registry::{RegistryError, TaskRegistry, TaskView},
};
use crate::lib::tasks::types::TaskId;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct TaskServer {
    pub registry: Arc<TaskRegistry>,
    pub coordinator: SubmissionCoordinator,
    pub cluster: Arc<dyn ClusterInterface>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(code = self.status.as_u16(), "{}", self.message);
        let body = ErrorBody {
            code: self.status.as_u16(),
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let status = match err {
            SubmitError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[derive(Serialize)]
struct TaskList {
    size: usize,
    tasks: Vec<TaskView>,
}

impl TaskServer {
    pub fn new(
        registry: Arc<TaskRegistry>,
        coordinator: SubmissionCoordinator,
        cluster: Arc<dyn ClusterInterface>,
    ) -> Self {
        Self {
            registry,
            coordinator,
            cluster,
        }
    }

    async fn ping() -> &'static str {
        "OK"
    }

    async fn add_task(
        AxumState(server): AxumState<TaskServer>,
        body: Bytes,
    ) -> Result<Response, ApiError> {
        match server.coordinator.submit(&body).await? {
            Submission::Accepted { id, .. } => {
                tracing::debug!(task_id = %id, "Task accepted");
                Ok((StatusCode::ACCEPTED, "OK").into_response())
            }
            Submission::Completed { files, .. } => Ok((StatusCode::OK, Json(files)).into_response()),
        }
    }

    async fn list_tasks(AxumState(server): AxumState<TaskServer>) -> Json<TaskList> {
        let tasks = server.registry.list();
        Json(TaskList {
            size: tasks.len(),
            tasks,
        })
    }

    async fn delete_task(
        AxumState(server): AxumState<TaskServer>,
        Path(id): Path<String>,
    ) -> Result<&'static str, ApiError> {
        server.registry.delete(&TaskId(id)).await?;
        Ok("OK")
    }

    async fn kill_task(
        AxumState(server): AxumState<TaskServer>,
        Path(id): Path<String>,
    ) -> Result<&'static str, ApiError> {
        server.registry.kill(&TaskId(id)).await?;
        Ok("OK")
    }

    async fn get_file(
        AxumState(server): AxumState<TaskServer>,
        Path((id, file)): Path<(String, String)>,
    ) -> Result<String, ApiError> {
        let mut files = server
            .cluster
            .read_file(&TaskId(id), std::slice::from_ref(&file))
            .await?;
        files
            .remove(&file)
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("{} not found", file)))
    }

    async fn metrics(
        AxumState(server): AxumState<TaskServer>,
    ) -> Result<Json<serde_json::Map<String, serde_json::Value>>, ApiError> {
        Ok(Json(server.cluster.metrics().await?))
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/_ping", get(TaskServer::ping))
            .route("/tasks", get(TaskServer::list_tasks).post(TaskServer::add_task))
            .route("/tasks/{id}", delete(TaskServer::delete_task))
            .route("/tasks/{id}/kill", put(TaskServer::kill_task))
            .route("/tasks/{id}/file/{file}", get(TaskServer::get_file))
            .route("/metrics", get(TaskServer::metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn start_server(self, addr: SocketAddr) -> std::io::Result<()> {
        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Starting API...");

        axum::serve(listener, app).await
    }
}
