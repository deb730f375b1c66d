//! Run lifecycle states.

use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleState;

/// Where a run is in its lifecycle
///
/// `Deferred` loops back to `Classifying` after each queue wait. Every path
/// out of `Running`, and every early exit, passes through `CleaningUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Classifying,
    Direct,
    Isolated,
    Deferred,
    Running,
    CleaningUp,
    Done,
}

impl RunState {
    pub const ALL: [Self; 7] = [
        Self::Classifying,
        Self::Direct,
        Self::Isolated,
        Self::Deferred,
        Self::Running,
        Self::CleaningUp,
        Self::Done,
    ];
}

impl LifecycleState for RunState {
    const CLEANUP: Self = Self::CleaningUp;

    fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Classifying => vec![
                Self::Direct,
                Self::Isolated,
                Self::Deferred,
                Self::CleaningUp,
            ],
            Self::Direct | Self::Isolated => vec![Self::Running, Self::CleaningUp],
            Self::Deferred => vec![Self::Classifying, Self::CleaningUp],
            Self::Running => vec![Self::CleaningUp],
            Self::CleaningUp => vec![Self::Done],
            Self::Done => vec![],
        }
    }

    fn all_states() -> &'static [Self] {
        &Self::ALL
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Classifying => "CLASSIFYING",
            Self::Direct => "DIRECT",
            Self::Isolated => "ISOLATED",
            Self::Deferred => "DEFERRED",
            Self::Running => "RUNNING",
            Self::CleaningUp => "CLEANING_UP",
            Self::Done => "DONE",
        };
        write!(f, "{name}")
    }
}
