use thiserror::Error;

/// Which of the two `currentOp` commands a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LongestQuery,
    IndexBuild,
    Ping,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::LongestQuery => write!(f, "current operations list"),
            Stage::IndexBuild => write!(f, "index build operations list"),
            Stage::Ping => write!(f, "ping"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to run {stage} command: {message}")]
    Command { stage: Stage, message: String },

    #[error("failed to decode {stage}: {message}")]
    Decode { stage: Stage, message: String },

    #[error("{stage} command timed out")]
    Timeout { stage: Stage },

    #[error("{stage} command cancelled")]
    Cancelled { stage: Stage },
}

impl CollectError {
    pub fn command(stage: Stage, message: impl Into<String>) -> Self {
        CollectError::Command {
            stage,
            message: message.into(),
        }
    }

    pub fn decode(stage: Stage, message: impl Into<String>) -> Self {
        CollectError::Decode {
            stage,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            CollectError::Command { stage, .. }
            | CollectError::Decode { stage, .. }
            | CollectError::Timeout { stage }
            | CollectError::Cancelled { stage } => *stage,
        }
    }
}
