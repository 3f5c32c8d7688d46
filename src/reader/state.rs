use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a reader node; a node runs exactly one open…close cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Built, not yet opened
    New,
    /// Source opened, pump starting
    Opened,
    /// Pump reading and dispatching batches
    Active,
    /// End-of-stream delivered
    Completed,
    /// Fatal failure observed
    Error,
    /// Resources released
    Closed,
}

impl NodeState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if the node has finished producing, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Closed)
    }

    /// Check if this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (New, Opened)
                | (New, Error)
                | (Opened, Active)
                | (Opened, Error)
                | (Active, Completed)
                | (Active, Error)
                | (New, Closed)
                | (Opened, Closed)
                | (Active, Closed)
                | (Completed, Closed)
                | (Error, Closed)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Opened => write!(f, "opened"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "opened" => Ok(Self::Opened),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid node state: {s}")),
        }
    }
}
