use serde::{Deserialize, Serialize};

/// Events that drive a node through its execution states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NodeEvent {
    /// Launch or attach to the node's execution
    Start,
    Succeed,
    /// Execution failed with an error message
    Fail(String),
    /// Not attempted; carries the reason
    Skip(String),
}

impl NodeEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Fail(_) => "fail",
            Self::Skip(_) => "skip",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
