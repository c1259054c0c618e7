//! Checks run once before a bootstrap touches anything.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use livekey_capture::PatternMatcher;
use livekey_host::ProcessControl;
use livekey_ipc::{BootstrapConfig, TimingConfig};

use crate::error::BootstrapError;
use crate::BootstrapResult;

/// Smallest accepted poll interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Smallest accepted discovery timeout.
pub const MIN_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Smallest accepted automation helper timeout.
pub const MIN_HELPER_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Validate timing parameters against their floors.
pub fn validate_timing(timing: &TimingConfig) -> Result<(), String> {
    if timing.check_interval() < MIN_CHECK_INTERVAL {
        return Err(format!(
            "check interval must be at least {}ms",
            MIN_CHECK_INTERVAL.as_millis()
        ));
    }
    if timing.discovery_timeout() < MIN_DISCOVERY_TIMEOUT {
        return Err(format!(
            "discovery timeout must be at least {}ms",
            MIN_DISCOVERY_TIMEOUT.as_millis()
        ));
    }
    if timing.helper_timeout() < MIN_HELPER_TIMEOUT {
        return Err(format!(
            "automation helper timeout must be at least {}ms",
            MIN_HELPER_TIMEOUT.as_millis()
        ));
    }
    if timing.check_interval() > timing.discovery_timeout() {
        return Err("check interval must not exceed the discovery timeout".to_string());
    }
    Ok(())
}

/// Validate a bootstrap configuration and the host state.
///
/// Every problem found is reported in a single configuration error.
pub fn preflight(config: &BootstrapConfig, processes: &dyn ProcessControl) -> BootstrapResult<()> {
    let mut problems = Vec::new();

    let paths = &config.paths;
    for (what, path) in [
        ("companion executable", &paths.companion),
        ("broadcaster executable", &paths.broadcaster),
        ("broadcaster settings file", &paths.broadcaster_settings),
        ("automation helper", &paths.automation_helper),
    ] {
        if let Some(problem) = check_path(what, path) {
            problems.push(problem);
        }
    }

    if let Err(problem) = validate_timing(&config.timing) {
        problems.push(problem);
    }

    if let Err(e) = PatternMatcher::from_config(&config.capture) {
        problems.push(e.to_string());
    }

    if !config.terminate_running_broadcaster {
        match processes.find_running(&config.targets.broadcaster_processes) {
            Ok(Some(process)) => problems.push(format!(
                "{} is running (pid {}); close it first",
                process.name, process.pid
            )),
            Ok(None) => {}
            Err(e) => problems.push(e.to_string()),
        }
    }

    if problems.is_empty() {
        debug!("Pre-flight checks passed");
        Ok(())
    } else {
        Err(BootstrapError::Config(problems.join("; ")))
    }
}

fn check_path(what: &str, path: &Path) -> Option<String> {
    if path.as_os_str().is_empty() {
        Some(format!("{what} path is not configured"))
    } else if !path.exists() {
        Some(format!("{what} not found at {}", path.display()))
    } else {
        None
    }
}
