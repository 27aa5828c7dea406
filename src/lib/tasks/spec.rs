use super::types::{TaskError, TaskResult, TaskSpec};

/// Decodes and validates a raw submission body.
pub fn decode_spec(body: &[u8]) -> TaskResult<TaskSpec> {
    let spec: TaskSpec =
        serde_json::from_slice(body).map_err(|e| TaskError::Validation(e.to_string()))?;
    validate(&spec)?;
    Ok(spec)
}

pub fn validate(spec: &TaskSpec) -> TaskResult<()> {
    for (name, value) in [("cpus", spec.cpus), ("mem", spec.mem), ("disk", spec.disk)] {
        if !value.is_finite() || value < 0.0 {
            return Err(TaskError::Validation(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }

    if let Some(file) = spec.files.iter().find(|f| f.trim().is_empty()) {
        return Err(TaskError::Validation(format!("invalid file path {:?}", file)));
    }

    for volume in &spec.volumes {
        if !volume.container_path.starts_with('/') {
            return Err(TaskError::Validation(format!(
                "volume container_path must be absolute, got {:?}",
                volume.container_path
            )));
        }
    }

    Ok(())
}
