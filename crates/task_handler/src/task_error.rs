use thiserror::Error;

/// Failure reported by a handler.
///
/// The distinction drives the retry policy: a retryable failure puts the job
/// back in the queue (until its attempts run out), a fatal one fails it now.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure: timeout, rate limit, 5xx from a provider...
    #[error("{0}")]
    Retryable(String),
    /// Retrying cannot help: malformed payload, permanent rejection...
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn retryable(message: impl ToString) -> Self {
        TaskError::Retryable(message.to_string())
    }

    pub fn fatal(message: impl ToString) -> Self {
        TaskError::Fatal(message.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::Retryable(message) | TaskError::Fatal(message) => message,
        }
    }
}

/// Plain string errors are treated as transient.
impl From<String> for TaskError {
    fn from(value: String) -> Self {
        TaskError::Retryable(value)
    }
}

impl From<&str> for TaskError {
    fn from(value: &str) -> Self {
        TaskError::Retryable(value.to_string())
    }
}

/// A payload that does not match the handler's type will never deserialize.
impl From<serde_json::Error> for TaskError {
    fn from(value: serde_json::Error) -> Self {
        TaskError::Fatal(format!("malformed payload: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_retryable() {
        assert!(TaskError::from("rate limited").is_retryable());
        assert!(TaskError::from(String::from("503")).is_retryable());
        assert_eq!(TaskError::from("503").message(), "503");
    }

    #[test]
    fn json_errors_are_fatal() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let task_error = TaskError::from(err);
        assert!(!task_error.is_retryable());
        assert!(task_error.message().starts_with("malformed payload"));
    }
}
