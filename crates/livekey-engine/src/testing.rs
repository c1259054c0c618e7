//! Recording fakes of the host collaborators.

use std::sync::Arc;

use parking_lot::Mutex;

use livekey_host::{
    ControlLocation, HostError, HostResult, LaunchSpec, ProcessControl, RunningProcess,
    SettingsSink, UiAutomation,
};
use livekey_ipc::ControlTarget;

/// Ordered log of collaborator calls, shared by the fakes of one test.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Debug, Default)]
struct ProcessTable {
    running: Vec<RunningProcess>,
    launches: usize,
    appears_after: Option<(usize, RunningProcess)>,
    linger: usize,
    dying: Vec<(u32, usize)>,
}

#[derive(Debug, Default)]
pub struct FakeProcesses {
    journal: Journal,
    table: Mutex<ProcessTable>,
}

impl FakeProcesses {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            table: Mutex::default(),
        }
    }

    pub fn with_running(name: &str, pid: u32) -> Self {
        let fake = Self::default();
        fake.set_running(name, pid);
        fake
    }

    pub fn set_running(&self, name: &str, pid: u32) {
        self.table.lock().running.push(RunningProcess {
            pid,
            name: name.to_string(),
        });
    }

    /// `name` shows up as running once `launches` processes were started.
    pub fn start_running_after_launches(&self, name: &str, pid: u32, launches: usize) {
        self.table.lock().appears_after = Some((
            launches,
            RunningProcess {
                pid,
                name: name.to_string(),
            },
        ));
    }

    /// Killed processes stay listed for `checks` more lookups.
    pub fn linger_after_kill(&self, checks: usize) {
        self.table.lock().linger = checks;
    }
}

impl ProcessControl for FakeProcesses {
    fn launch(&self, spec: &LaunchSpec) -> HostResult<()> {
        let name = spec
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = if spec.elevated { " elevated" } else { "" };
        self.journal.record(format!("launch {name}{suffix}"));

        let mut table = self.table.lock();
        table.launches += 1;
        let due = matches!(&table.appears_after, Some((after, _)) if table.launches >= *after);
        if due {
            if let Some((_, process)) = table.appears_after.take() {
                table.running.push(process);
            }
        }
        Ok(())
    }

    fn find_running(&self, names: &[String]) -> HostResult<Option<RunningProcess>> {
        let mut table = self.table.lock();
        let found = livekey_host::find_by_name(&table.running, names);

        let mut exited = Vec::new();
        for (pid, checks) in table.dying.iter_mut() {
            if *checks == 0 {
                exited.push(*pid);
            } else {
                *checks -= 1;
            }
        }
        table.dying.retain(|(pid, _)| !exited.contains(pid));
        table.running.retain(|p| !exited.contains(&p.pid));
        Ok(found)
    }

    fn kill(&self, pid: u32) -> HostResult<()> {
        self.journal.record(format!("kill {pid}"));
        let mut table = self.table.lock();
        if table.linger == 0 {
            table.running.retain(|p| p.pid != pid);
        } else {
            let checks = table.linger - 1;
            table.dying.push((pid, checks));
        }
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct FakeAutomation {
    journal: Journal,
    failing: Mutex<Vec<String>>,
}

impl FakeAutomation {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failing: Mutex::default(),
        }
    }

    /// Clicking the control labelled `label` fails.
    pub fn fail_on(&self, label: &str) {
        self.failing.lock().push(label.to_string());
    }
}

impl UiAutomation for FakeAutomation {
    fn locate_and_click(&self, target: &ControlTarget) -> HostResult<ControlLocation> {
        if self.failing.lock().contains(&target.label) {
            return Err(HostError::ControlNotFound {
                control: target.label.clone(),
                message: "window not found".to_string(),
            });
        }
        self.journal.record(format!("click {}", target.label));
        Ok(ControlLocation { x: 100, y: 200 })
    }
}

#[derive(Debug, Default)]
pub struct FakeSettings {
    journal: Journal,
    writes: Mutex<Vec<(String, String)>>,
}

impl FakeSettings {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            writes: Mutex::default(),
        }
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }
}

impl SettingsSink for FakeSettings {
    fn write_stream_settings(&self, server: &str, key: &str) -> HostResult<()> {
        self.journal.record(format!("settings {server} {key}"));
        self.writes.lock().push((server.to_string(), key.to_string()));
        Ok(())
    }
}
