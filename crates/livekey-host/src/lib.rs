//! Host-side collaborators driven by the bootstrap.
//!
//! Process control, the UI automation helper and the broadcaster's settings
//! file, each behind a trait so the orchestrator can be tested with fakes.

mod automation;
mod error;
mod process;
mod settings;

pub use automation::{AutomationTool, ControlLocation, UiAutomation};
pub use error::HostError;
pub use process::{
    find_by_name, parse_ps, parse_tasklist, powershell_quote, LaunchSpec, ProcessControl,
    RunningProcess, SystemProcesses,
};
pub use settings::{validate_server, JsonSettingsFile, SettingsSink};

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
