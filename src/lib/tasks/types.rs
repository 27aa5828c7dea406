use std::{collections::HashMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, de};

/// Number of random bytes behind a task id; hex encoding doubles the length.
const TASK_ID_BYTES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Draws a fresh id from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let bytes: [u8; TASK_ID_BYTES] = rand::random();
        TaskId(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Finished | State::Failed | State::Killed | State::Lost
        )
    }
}

impl Default for State {
    fn default() -> Self {
        State::Staging
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VolumeMode {
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "RO")]
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

impl Volume {
    /// Docker bind string, e.g. `/data:/mnt/data:ro`.
    pub fn bind(&self) -> String {
        let mode = match self.mode {
            VolumeMode::ReadWrite => "rw",
            VolumeMode::ReadOnly => "ro",
        };
        format!("{}:{}:{}", self.host_path, self.container_path, mode)
    }
}

/// Body of a submission request, before an id has been assigned.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct TaskSpec {
    #[serde(default)]
    pub cmd: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub cpus: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub mem: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub disk: f64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub constraints: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub cmd: String,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    pub docker_image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub constraints: HashMap<String, String>,
    pub slave_id: Option<String>,
    pub state: State,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Task {
            id,
            cmd: spec.cmd,
            cpus: spec.cpus,
            mem: spec.mem,
            disk: spec.disk,
            files: spec.files,
            docker_image: spec.docker_image,
            volumes: spec.volumes,
            constraints: spec.constraints,
            slave_id: None,
            state: State::Staging,
        }
    }

    /// Resource requirement used for offer matching. Memory and disk are
    /// truncated to whole megabytes.
    pub fn requirement(&self) -> Resources {
        Resources {
            cpus: self.cpus,
            mem: self.mem as i64,
            disk: self.disk as i64,
        }
    }

    /// Synchronous submissions are the ones that ask for files back.
    pub fn wants_files(&self) -> bool {
        !self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub cpus: f64,
    pub mem: i64,
    pub disk: i64,
}

impl Resources {
    pub fn fits_within(&self, available: &Resources) -> bool {
        self.cpus <= available.cpus && self.mem <= available.mem && self.disk <= available.disk
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Validation(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Accepts `1.5` as well as `"1.5"`; the latter is how older clients encode
/// resource amounts.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) if text.trim().is_empty() => Ok(0.0),
        Raw::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("expected a number, got {:?}", text))),
    }
}
