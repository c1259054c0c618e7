//! UI automation through the external helper program.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::{debug, instrument};

use livekey_ipc::ControlTarget;

use crate::error::HostError;
use crate::HostResult;

/// Screen position of a clicked control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ControlLocation {
    pub x: i32,
    pub y: i32,
}

/// Locates controls in other applications' windows and clicks them.
pub trait UiAutomation: Send + Sync {
    /// Find `target` and click its center.
    fn locate_and_click(&self, target: &ControlTarget) -> HostResult<ControlLocation>;
}

/// Report printed by the helper on stdout.
#[derive(Debug, Deserialize)]
struct HelperReport {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    center: ControlLocation,
    /// Omitted by the helper whenever it did not click.
    #[serde(default)]
    clicked: Option<bool>,
}

/// [`UiAutomation`] running the automation helper executable.
pub struct AutomationTool {
    helper: PathBuf,
    timeout: Duration,
    runtime: Runtime,
}

impl AutomationTool {
    /// Create a tool running `helper`, bounding each call by `timeout`.
    pub fn new(helper: impl Into<PathBuf>, timeout: Duration) -> HostResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            helper: helper.into(),
            timeout,
            runtime,
        })
    }

    fn helper_args(target: &ControlTarget) -> Vec<String> {
        vec![
            "--app".to_string(),
            target.app.clone(),
            "--control".to_string(),
            target.label.clone(),
            "--type".to_string(),
            target.kind.as_str().to_string(),
            "--click".to_string(),
        ]
    }

    async fn run_helper(&self, target: &ControlTarget) -> HostResult<Vec<u8>> {
        let mut command = Command::new(&self.helper);
        command
            .args(Self::helper_args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.helper.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| HostError::Helper {
                control: target.label.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                return Err(HostError::HelperTimeout {
                    control: target.label.clone(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(HostError::Helper {
                control: target.label.clone(),
                message: format!("exited with {}: {}", output.status, detail),
            });
        }

        Ok(output.stdout)
    }

    /// Helper path.
    pub fn helper(&self) -> &Path {
        &self.helper
    }
}

impl UiAutomation for AutomationTool {
    #[instrument(name = "ui_click", skip(self), fields(control = %target.label))]
    fn locate_and_click(&self, target: &ControlTarget) -> HostResult<ControlLocation> {
        bring_to_front(&target.app)?;
        let stdout = self.runtime.block_on(self.run_helper(target))?;
        let location = interpret_report(target, &stdout)?;

        debug!(x = location.x, y = location.y, "Control clicked");
        Ok(location)
    }
}

fn interpret_report(target: &ControlTarget, stdout: &[u8]) -> HostResult<ControlLocation> {
    let report: HelperReport =
        serde_json::from_slice(stdout).map_err(|e| HostError::HelperOutput {
            control: target.label.clone(),
            message: format!("{}: {}", e, String::from_utf8_lossy(stdout).trim()),
        })?;

    if !report.success {
        return Err(HostError::ControlNotFound {
            control: target.label.clone(),
            message: report
                .error
                .unwrap_or_else(|| "no reason given".to_string()),
        });
    }

    if report.clicked != Some(true) {
        return Err(HostError::NotClicked {
            control: target.label.clone(),
        });
    }

    Ok(report.center)
}

/// Restore and focus the first visible top-level window whose title
/// contains `app`, so the click lands on it.
#[cfg(windows)]
fn bring_to_front(app: &str) -> HostResult<()> {
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextW, IsWindowVisible, SetForegroundWindow, ShowWindow,
        SW_RESTORE,
    };

    struct Search<'a> {
        wanted: &'a str,
        found: Option<HWND>,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam is the `Search` passed to EnumWindows below, which
        // outlives the enumeration.
        let search = unsafe { &mut *(lparam.0 as *mut Search) };
        let mut buf = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
        if len <= 0 {
            return BOOL(1);
        }

        let title = String::from_utf16_lossy(&buf[..len as usize]);
        if title.contains(search.wanted) && unsafe { IsWindowVisible(hwnd) }.as_bool() {
            search.found = Some(hwnd);
            return BOOL(0);
        }
        BOOL(1)
    }

    if app.is_empty() {
        return Err(HostError::WindowNotFound {
            app: app.to_string(),
        });
    }

    let mut search = Search {
        wanted: app,
        found: None,
    };
    // EnumWindows reports an error when the callback stops early, so only
    // the search result matters.
    let _ = unsafe { EnumWindows(Some(visit), LPARAM(&mut search as *mut Search as isize)) };

    let hwnd = search.found.ok_or_else(|| HostError::WindowNotFound {
        app: app.to_string(),
    })?;
    // SAFETY: hwnd came from EnumWindows during this call.
    unsafe {
        let _ = ShowWindow(hwnd, SW_RESTORE);
        if !SetForegroundWindow(hwnd).as_bool() {
            debug!(app, "Window did not accept focus");
        }
    }
    debug!(app, "Window brought to front");
    Ok(())
}

#[cfg(not(windows))]
fn bring_to_front(app: &str) -> HostResult<()> {
    debug!(app, "Window focusing is only supported on Windows");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekey_ipc::ControlKind;

    fn target() -> ControlTarget {
        ControlTarget::new("直播伴侣", "开始直播", ControlKind::Text)
    }

    #[test]
    fn test_helper_arguments() {
        assert_eq!(
            AutomationTool::helper_args(&target()),
            vec!["--app", "直播伴侣", "--control", "开始直播", "--type", "Text", "--click"]
        );
    }

    #[test]
    fn test_successful_report() {
        let stdout = br#"{"success":true,"control_title":"x","center":{"x":640,"y":360},"clicked":true}"#;
        assert_eq!(
            interpret_report(&target(), stdout).unwrap(),
            ControlLocation { x: 640, y: 360 }
        );
    }

    #[test]
    fn test_failed_report() {
        let stdout = br#"{"success":false,"error":"window not found"}"#;
        let err = interpret_report(&target(), stdout).unwrap_err();
        assert!(matches!(err, HostError::ControlNotFound { ref message, .. } if message == "window not found"));
    }

    #[test]
    fn test_unclicked_report() {
        let stdout = br#"{"success":true,"center":{"x":1,"y":2},"clicked":false}"#;
        assert!(matches!(
            interpret_report(&target(), stdout),
            Err(HostError::NotClicked { .. })
        ));
    }

    #[test]
    fn test_report_without_clicked_is_not_a_click() {
        let stdout = br#"{"success":true,"center":{"x":640,"y":360}}"#;
        assert!(matches!(
            interpret_report(&target(), stdout),
            Err(HostError::NotClicked { ref control }) if control == "开始直播"
        ));
    }

    #[test]
    fn test_garbage_report() {
        assert!(matches!(
            interpret_report(&target(), b"Traceback: boom"),
            Err(HostError::HelperOutput { .. })
        ));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join(name);
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Let concurrently forked test processes drop the inherited write handle.
        std::thread::sleep(Duration::from_millis(50));
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_script_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "helper.sh",
            r#"echo '{"success":true,"center":{"x":5,"y":7},"clicked":true}'"#,
        );

        let tool = AutomationTool::new(&script, Duration::from_secs(5)).unwrap();
        assert_eq!(
            tool.locate_and_click(&target()).unwrap(),
            ControlLocation { x: 5, y: 7 }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_script_located_only() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "locate.sh",
            r#"echo '{"success":true,"control_title":"开始直播","center":{"x":5,"y":7}}'"#,
        );

        let tool = AutomationTool::new(&script, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            tool.locate_and_click(&target()),
            Err(HostError::NotClicked { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 5");

        let tool = AutomationTool::new(&script, Duration::from_millis(200)).unwrap();
        assert!(matches!(
            tool.locate_and_click(&target()),
            Err(HostError::HelperTimeout { .. })
        ));
    }
}
