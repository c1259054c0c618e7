//! Process launch, lookup and termination.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, instrument};

use crate::error::HostError;
use crate::HostResult;

/// A process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path.
    pub program: PathBuf,

    /// Command line arguments.
    pub args: Vec<String>,

    /// Request administrator rights when the current process lacks them.
    pub elevated: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            elevated: false,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Directory the process starts in: the executable's own directory.
    pub fn working_dir(&self) -> Option<&Path> {
        self.program
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// A process found in the system process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
}

/// Control over local processes.
pub trait ProcessControl: Send + Sync {
    /// Start a process without waiting for it.
    fn launch(&self, spec: &LaunchSpec) -> HostResult<()>;

    /// First running process whose executable name matches one of `names`,
    /// compared case-insensitively.
    fn find_running(&self, names: &[String]) -> HostResult<Option<RunningProcess>>;

    /// Forcefully terminate a process. The process may still be listed for
    /// a moment after this returns.
    fn kill(&self, pid: u32) -> HostResult<()>;

    /// Whether the current process runs with administrator rights.
    fn is_elevated(&self) -> bool;
}

/// [`ProcessControl`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    #[instrument(name = "process_launch", skip(self), fields(program = %spec.program.display()))]
    fn launch(&self, spec: &LaunchSpec) -> HostResult<()> {
        let launch_error = |message: String| HostError::Launch {
            path: spec.program.clone(),
            message,
        };

        if spec.elevated && !self.is_elevated() {
            info!("Launching with elevation");
            return launch_elevated(spec).map_err(launch_error);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = spec.working_dir() {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| launch_error(e.to_string()))?;
        debug!(pid = child.id(), "Process started");
        Ok(())
    }

    fn find_running(&self, names: &[String]) -> HostResult<Option<RunningProcess>> {
        let processes = list_processes()?;
        Ok(find_by_name(&processes, names))
    }

    #[instrument(name = "process_kill", skip(self))]
    fn kill(&self, pid: u32) -> HostResult<()> {
        let output = kill_command(pid)
            .output()
            .map_err(|e| HostError::Kill {
                pid,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HostError::Kill {
                pid,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Process terminated");
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        is_elevated()
    }
}

/// Pick the first process whose name matches one of `names`.
pub fn find_by_name(processes: &[RunningProcess], names: &[String]) -> Option<RunningProcess> {
    let wanted: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
    processes
        .iter()
        .find(|process| wanted.contains(&process.name.to_lowercase()))
        .cloned()
}

fn list_processes() -> HostResult<Vec<RunningProcess>> {
    let output = list_command()
        .output()
        .map_err(|e| HostError::ProcessList(e.to_string()))?;

    if !output.status.success() {
        return Err(HostError::ProcessList(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let text = decode_console_output(&output.stdout);
    if cfg!(windows) {
        Ok(parse_tasklist(&text))
    } else {
        Ok(parse_ps(&text))
    }
}

#[cfg(windows)]
fn list_command() -> Command {
    let mut command = Command::new("tasklist");
    command.args(["/FO", "CSV", "/NH"]);
    command
}

#[cfg(not(windows))]
fn list_command() -> Command {
    let mut command = Command::new("ps");
    command.args(["-A", "-o", "pid=", "-o", "comm="]);
    command
}

#[cfg(windows)]
fn kill_command(pid: u32) -> Command {
    let mut command = Command::new("taskkill");
    command.args(["/PID", &pid.to_string(), "/F"]);
    command
}

#[cfg(not(windows))]
fn kill_command(pid: u32) -> Command {
    let mut command = Command::new("kill");
    command.args(["-KILL", &pid.to_string()]);
    command
}

/// Console tools write in the OEM code page (GBK on Chinese systems).
#[cfg(windows)]
fn decode_console_output(bytes: &[u8]) -> String {
    use windows::Win32::Globalization::CP_OEMCP;

    decode_code_page(bytes, CP_OEMCP)
}

#[cfg(not(windows))]
fn decode_console_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(windows)]
fn decode_code_page(bytes: &[u8], code_page: u32) -> String {
    use windows::Win32::Globalization::{MultiByteToWideChar, MULTI_BYTE_TO_WIDE_CHAR_FLAGS};

    if bytes.is_empty() {
        return String::new();
    }

    // SAFETY: the first call only measures; the second fills a buffer of
    // exactly the measured length.
    let wide = unsafe {
        let len = MultiByteToWideChar(code_page, MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0), bytes, None);
        if len <= 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let mut wide = vec![0u16; len as usize];
        let written = MultiByteToWideChar(
            code_page,
            MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0),
            bytes,
            Some(&mut wide),
        );
        wide.truncate(written.max(0) as usize);
        wide
    };
    String::from_utf16_lossy(&wide)
}

/// `Start-Process` returns once the elevated process has been created.
#[cfg(windows)]
fn launch_elevated(spec: &LaunchSpec) -> Result<(), String> {
    let status = elevated_command(spec)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| e.to_string())?;

    if !status.success() {
        return Err(format!("elevated launch exited with {status}"));
    }
    Ok(())
}

/// `pkexec` lives as long as the program it runs, so it is not waited for.
#[cfg(not(windows))]
fn launch_elevated(spec: &LaunchSpec) -> Result<(), String> {
    let child = elevated_command(spec)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| e.to_string())?;
    debug!(pid = child.id(), "Elevation helper started");
    Ok(())
}

#[cfg(windows)]
fn elevated_command(spec: &LaunchSpec) -> Command {
    let mut script = format!(
        "Start-Process -FilePath {} -Verb RunAs",
        powershell_quote(&spec.program.to_string_lossy())
    );
    if let Some(dir) = spec.working_dir() {
        script.push_str(&format!(
            " -WorkingDirectory {}",
            powershell_quote(&dir.to_string_lossy())
        ));
    }
    if !spec.args.is_empty() {
        let args: Vec<String> = spec.args.iter().map(|a| powershell_quote(a)).collect();
        script.push_str(&format!(" -ArgumentList {}", args.join(",")));
    }

    let mut command = Command::new("powershell");
    command.args(["-NoProfile", "-WindowStyle", "Hidden", "-Command", &script]);
    command
}

#[cfg(not(windows))]
fn elevated_command(spec: &LaunchSpec) -> Command {
    let mut command = Command::new("pkexec");
    command.arg(&spec.program).args(&spec.args);
    if let Some(dir) = spec.working_dir() {
        command.current_dir(dir);
    }
    command
}

/// Quote a string as a PowerShell single-quoted literal.
pub fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Parse `tasklist /FO CSV /NH` output.
pub fn parse_tasklist(output: &str) -> Vec<RunningProcess> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim().strip_prefix('"')?.strip_suffix('"')?;
            let mut fields = line.split("\",\"");
            let name = fields.next()?.to_string();
            let pid = fields.next()?.parse().ok()?;
            Some(RunningProcess { pid, name })
        })
        .collect()
}

/// Parse `ps -A -o pid= -o comm=` output.
pub fn parse_ps(output: &str) -> Vec<RunningProcess> {
    output
        .lines()
        .filter_map(|line| {
            let (pid, name) = line.trim().split_once(char::is_whitespace)?;
            let name = name.trim();
            let name = Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            Some(RunningProcess {
                pid: pid.parse().ok()?,
                name,
            })
        })
        .collect()
}

#[cfg(windows)]
fn is_elevated() -> bool {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    // SAFETY: the token handle is owned here and closed before returning;
    // the output buffer is a TOKEN_ELEVATION of the size passed.
    unsafe {
        let mut token = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        let queried = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut core::ffi::c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
        .is_ok();
        let _ = CloseHandle(token);

        queried && elevation.TokenIsElevated != 0
    }
}

#[cfg(unix)]
fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(any(windows, unix)))]
fn is_elevated() -> bool {
    false
}
