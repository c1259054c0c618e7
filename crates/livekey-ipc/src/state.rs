//! Session and bootstrap state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not capturing.
    #[default]
    Idle,

    /// Workers are listening.
    Active,
}

impl SessionState {
    /// Returns true if the session is idle.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is capturing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Active => "Active",
        }
    }
}

/// Why a capture session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A caller asked for it.
    Requested,

    /// Both server and key were discovered.
    AllFound,
}

/// Steps of the bootstrap pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapStep {
    /// Launching the streaming companion.
    LaunchCompanion,

    /// Starting the capture session.
    StartCapture,

    /// Clicking the companion's start broadcast control.
    ClickStart,

    /// Waiting for server and key.
    AwaitCredentials,

    /// Writing credentials into the broadcaster's settings.
    WriteSettings,

    /// Launching the broadcaster.
    LaunchBroadcaster,

    /// Closing the companion.
    CloseCompanion,
}

impl BootstrapStep {
    /// Number of steps in a run.
    pub const COUNT: usize = 7;

    /// All steps in execution order.
    pub const ALL: [BootstrapStep; Self::COUNT] = [
        Self::LaunchCompanion,
        Self::StartCapture,
        Self::ClickStart,
        Self::AwaitCredentials,
        Self::WriteSettings,
        Self::LaunchBroadcaster,
        Self::CloseCompanion,
    ];

    /// Returns the next step, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::LaunchCompanion => Some(Self::StartCapture),
            Self::StartCapture => Some(Self::ClickStart),
            Self::ClickStart => Some(Self::AwaitCredentials),
            Self::AwaitCredentials => Some(Self::WriteSettings),
            Self::WriteSettings => Some(Self::LaunchBroadcaster),
            Self::LaunchBroadcaster => Some(Self::CloseCompanion),
            Self::CloseCompanion => None,
        }
    }

    /// One-based position of this step.
    pub fn number(self) -> usize {
        match self {
            Self::LaunchCompanion => 1,
            Self::StartCapture => 2,
            Self::ClickStart => 3,
            Self::AwaitCredentials => 4,
            Self::WriteSettings => 5,
            Self::LaunchBroadcaster => 6,
            Self::CloseCompanion => 7,
        }
    }

    /// Fraction of the run completed when this step begins.
    pub fn progress(self) -> f32 {
        (self.number() - 1) as f32 / Self::COUNT as f32
    }

    /// Returns the display name for this step.
    pub fn name(self) -> &'static str {
        match self {
            Self::LaunchCompanion => "Launching companion",
            Self::StartCapture => "Capturing traffic",
            Self::ClickStart => "Starting broadcast",
            Self::AwaitCredentials => "Waiting for stream credentials",
            Self::WriteSettings => "Writing broadcaster settings",
            Self::LaunchBroadcaster => "Launching broadcaster",
            Self::CloseCompanion => "Closing companion",
        }
    }
}

impl std::fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({})", self.number(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_ordered() {
        let mut step = BootstrapStep::LaunchCompanion;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            assert_eq!(next.number(), step.number() + 1);
            seen.push(next);
            step = next;
        }
        assert_eq!(seen, BootstrapStep::ALL.to_vec());
    }

    #[test]
    fn test_step_progress() {
        assert_eq!(BootstrapStep::LaunchCompanion.progress(), 0.0);
        assert!((BootstrapStep::CloseCompanion.progress() - 6.0 / 7.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            BootstrapStep::ClickStart.to_string(),
            "step 3 (Starting broadcast)"
        );
    }
}
