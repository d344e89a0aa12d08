//! Stage lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a stage under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Constructed but not started.
    #[default]
    Created,
    /// Start requested; endpoints may not be serviced yet.
    Starting,
    /// Actively processing.
    Running,
    /// Stop requested; draining.
    Stopping,
    /// Fully stopped.
    Stopped,
    /// Terminated abnormally.
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageState {
    /// Returns true while the stage is processing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true once the stage can make no further progress.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns true before the stage has started running.
    #[must_use]
    pub fn is_pre_running(&self) -> bool {
        matches!(self, Self::Created | Self::Starting)
    }

    /// Packs the state into a byte for atomic storage.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
            Self::Failed => 5,
        }
    }

    /// Unpacks a state stored with [`StageState::to_u8`].
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Stopped,
            5 => Self::Failed,
            _ => Self::Created,
        }
    }
}
