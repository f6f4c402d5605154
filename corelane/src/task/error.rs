use std::any::Any;

/// Error surfaced when awaiting a [`Task`] or joining a [`JoinableTask`] whose
/// body did not run to completion.
///
/// [`Task`]: crate::task::Task
/// [`JoinableTask`]: crate::task::JoinableTask
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task body panicked. The panic was caught by the runtime and the
    /// payload message preserved.
    #[error("task panicked: {0}")]
    Panic(String),
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panic(panic_payload_as_str(&payload).to_owned())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panic(_))
    }

    /// The panic message, if the task panicked.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            TaskError::Panic(msg) => Some(msg),
        }
    }
}

pub(crate) fn panic_payload_as_str(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
