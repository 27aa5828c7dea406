use super::types::State;

/// Staging may jump to any later state and Starting may end without Running.
/// Terminal states are final; repeating a non-terminal state is a no-op.
pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    let valid_states: &[State] = match src {
        State::Staging => &[
            State::Staging,
            State::Starting,
            State::Running,
            State::Finished,
            State::Failed,
            State::Killed,
            State::Lost,
        ],
        State::Starting => &[
            State::Starting,
            State::Running,
            State::Finished,
            State::Failed,
            State::Killed,
            State::Lost,
        ],
        State::Running => &[
            State::Running,
            State::Finished,
            State::Failed,
            State::Killed,
            State::Lost,
        ],
        State::Finished | State::Failed | State::Killed | State::Lost => &[],
    };

    valid_states.contains(dst)
}

/// Emits the per-transition log line. Failure-like states are logged at warn.
pub fn log_transition(task_id: &str, state: State, message: Option<&str>) {
    let message = message.unwrap_or_default();
    match state {
        State::Staging => tracing::info!(task_id, message, "Task was registered."),
        State::Starting => tracing::info!(task_id, message, "Task is starting."),
        State::Running => tracing::info!(task_id, message, "Task is running."),
        State::Finished => tracing::info!(task_id, message, "Task is finished."),
        State::Failed => tracing::warn!(task_id, message, "Task has failed."),
        State::Killed => tracing::warn!(task_id, message, "Task was killed."),
        State::Lost => tracing::warn!(task_id, message, "Task was lost."),
    }
}
