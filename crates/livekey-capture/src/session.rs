//! Capture session management.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use livekey_ipc::{CaptureConfig, ExtractionResult, NetworkDevice, SessionState, StopReason};

use crate::backend::{CaptureBackend, PacketSource};
use crate::error::CaptureError;
use crate::interface::select_interfaces;
use crate::matcher::PatternMatcher;
use crate::observer::CaptureObserver;
use crate::packet::RawFrame;
use crate::worker::run_worker;
use crate::CaptureResult;

/// Values discovered so far in the latest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub server: Option<String>,
    pub key: Option<String>,
    pub endpoint: Option<String>,
}

impl Discovered {
    /// The full result, once both values are known.
    pub fn complete(&self) -> Option<ExtractionResult> {
        Some(ExtractionResult {
            server_url: self.server.clone()?,
            stream_key: self.key.clone()?,
            source_endpoint: self.endpoint.clone(),
        })
    }
}

/// A passive capture session over the selected interfaces.
///
/// Cloning yields another handle to the same session. At most one run is
/// active at a time; `stop` is idempotent and may be called from any thread,
/// including from observer callbacks.
#[derive(Clone)]
pub struct CaptureSession {
    shared: Arc<SessionShared>,
}

impl CaptureSession {
    /// Create an idle session on top of a capture backend.
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                backend,
                state: RwLock::new(SessionState::Idle),
                current: Mutex::new(None),
            }),
        }
    }

    /// Start capturing with `config`, reporting to `observer`.
    ///
    /// Fails with [`CaptureError::AlreadyStarted`] while a run is active.
    /// Pattern and interface problems are reported to `observer.on_error`
    /// and returned; per-interface open failures only end that interface's
    /// worker.
    #[instrument(name = "capture_start", skip_all)]
    pub fn start(
        &self,
        config: &CaptureConfig,
        observer: Arc<dyn CaptureObserver>,
    ) -> CaptureResult<()> {
        let mut current = self.shared.current.lock();
        if self.shared.state.read().is_active() {
            debug!("Capture already active, rejecting start");
            return Err(CaptureError::AlreadyStarted);
        }

        let (matcher, devices) = match self.prepare(config) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Capture start failed: {}", e);
                observer.on_error(&e);
                return Err(e);
            }
        };

        let run = Arc::new(RunState::new(matcher, Arc::clone(&observer)));
        *current = Some(Arc::clone(&run));
        self.shared.transition_to(SessionState::Active, &run);

        info!(interfaces = devices.len(), "Starting capture");

        for device in devices {
            let backend = Arc::clone(&self.shared.backend);
            let worker_run = Arc::clone(&run);
            let session = Arc::downgrade(&self.shared);
            let name = device.name.clone();

            let spawned = thread::Builder::new()
                .name(format!("capture-{}", device.description))
                .spawn(move || {
                    let completed_run = Arc::clone(&worker_run);
                    run_worker(backend, device, worker_run, move || {
                        auto_stop(&session, &completed_run)
                    });
                });

            if let Err(e) = spawned {
                warn!(device = %name, "Failed to spawn capture worker: {}", e);
                run.stats.workers_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    /// Stop the active run. Does nothing when idle.
    #[instrument(name = "capture_stop", skip(self))]
    pub fn stop(&self) {
        self.shared.stop_run(None, StopReason::Requested);
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Returns true while a run is active.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Values discovered by the latest run.
    pub fn discovered(&self) -> Discovered {
        let run = self.shared.current.lock().clone();
        run.map(|run| run.discovery.lock().snapshot())
            .unwrap_or_default()
    }

    /// Number of workers currently holding an open capture.
    pub fn listening_workers(&self) -> usize {
        let run = self.shared.current.lock().clone();
        run.map(|run| run.handles.lock().len()).unwrap_or(0)
    }

    fn prepare(&self, config: &CaptureConfig) -> CaptureResult<(PatternMatcher, Vec<NetworkDevice>)> {
        let matcher = PatternMatcher::from_config(config)?;
        let available = self.shared.backend.list_devices()?;
        let devices = select_interfaces(&available, &config.interfaces)?;

        for device in &devices {
            debug!(device = %device.name, description = %device.description, "Listening on interface");
        }

        Ok((matcher, devices))
    }
}

fn auto_stop(session: &Weak<SessionShared>, run: &Arc<RunState>) {
    match session.upgrade() {
        Some(shared) => shared.stop_run(Some(run), StopReason::AllFound),
        None => run.shutdown(),
    }
}

struct SessionShared {
    backend: Arc<dyn CaptureBackend>,
    state: RwLock<SessionState>,
    /// Latest run; kept after stop so its results stay readable.
    current: Mutex<Option<Arc<RunState>>>,
}

impl SessionShared {
    fn stop_run(&self, expected: Option<&Arc<RunState>>, reason: StopReason) {
        let current = self.current.lock();
        let Some(run) = current.as_ref() else {
            debug!("Capture never started, ignoring stop");
            return;
        };

        if let Some(expected) = expected {
            if !Arc::ptr_eq(run, expected) {
                expected.shutdown();
                return;
            }
        }

        if !self.state.read().is_active() {
            debug!("Capture already idle, ignoring stop");
            return;
        }

        info!(?reason, "Stopping capture");
        self.transition_to(SessionState::Idle, run);
        run.shutdown();
    }

    fn transition_to(&self, new_state: SessionState, run: &RunState) {
        let previous = std::mem::replace(&mut *self.state.write(), new_state);

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        run.observer.on_state_changed(previous, new_state);
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Some(run) = self.current.get_mut().take() {
            run.shutdown();
        }
    }
}

/// Result of inspecting one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inspection {
    /// Still waiting for at least one value.
    Pending,

    /// This payload completed the discovery.
    Completed,

    /// Discovery had already completed.
    Done,
}

#[derive(Debug, Default)]
struct Discovery {
    server: Option<String>,
    key: Option<String>,
    endpoint: Option<String>,
    complete: bool,
}

impl Discovery {
    fn snapshot(&self) -> Discovered {
        Discovered {
            server: self.server.clone(),
            key: self.key.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunStats {
    pub frames: AtomicU64,
    pub workers_listening: AtomicUsize,
    pub workers_failed: AtomicUsize,
}

/// State of one session run, shared by its workers.
pub(crate) struct RunState {
    matcher: PatternMatcher,
    observer: Arc<dyn CaptureObserver>,
    cancelled: AtomicBool,
    discovery: Mutex<Discovery>,
    handles: Mutex<Vec<Arc<CaptureHandle>>>,
    pub stats: RunStats,
}

impl RunState {
    fn new(matcher: PatternMatcher, observer: Arc<dyn CaptureObserver>) -> Self {
        Self {
            matcher,
            observer,
            cancelled: AtomicBool::new(false),
            discovery: Mutex::new(Discovery::default()),
            handles: Mutex::new(Vec::new()),
            stats: RunStats::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Track an open handle. Returns false if the run is already stopping.
    pub fn register(&self, handle: Arc<CaptureHandle>) -> bool {
        let mut handles = self.handles.lock();
        if self.is_cancelled() {
            return false;
        }
        handles.push(handle);
        self.stats.workers_listening.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Match a payload against the patterns that are still needed.
    ///
    /// Matching runs outside the discovery lock; results are committed and
    /// observers notified under it, so each notification fires once and
    /// completion is never decided on a stale read.
    pub fn inspect(&self, payload: &[u8], destination: Option<SocketAddr>) -> Inspection {
        let (need_server, need_key) = {
            let discovery = self.discovery.lock();
            if discovery.complete {
                return Inspection::Done;
            }
            (discovery.server.is_none(), discovery.key.is_none())
        };

        let server = need_server
            .then(|| self.matcher.extract_server(payload))
            .flatten();
        let key = need_key.then(|| self.matcher.extract_key(payload)).flatten();
        if server.is_none() && key.is_none() {
            return Inspection::Pending;
        }

        let mut discovery = self.discovery.lock();
        if discovery.complete {
            return Inspection::Done;
        }

        if let Some(server) = server {
            if discovery.server.is_none() {
                info!(server = %server, "Found ingest server");
                self.observer.on_server_found(&server);
                discovery.server = Some(server);
            }
        }

        if let Some(key) = key {
            if discovery.key.is_none() {
                info!("Found stream key");
                self.observer.on_key_found(&key);
                if let Some(destination) = destination {
                    let endpoint = destination.to_string();
                    debug!(endpoint = %endpoint, "Key sent to endpoint");
                    self.observer.on_endpoint_found(&endpoint);
                    discovery.endpoint = Some(endpoint);
                }
                discovery.key = Some(key);
            }
        }

        match discovery.snapshot().complete() {
            Some(result) => {
                discovery.complete = true;
                info!("All credentials found");
                self.observer.on_all_found(&result);
                Inspection::Completed
            }
            None => Inspection::Pending,
        }
    }

    /// Fire the cancel signal and close every registered handle.
    ///
    /// Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in &handles {
            handle.close();
        }

        info!(
            handles = handles.len(),
            frames = self.stats.frames.load(Ordering::Relaxed),
            failed_workers = self.stats.workers_failed.load(Ordering::Relaxed),
            "Capture run finished"
        );
    }
}

/// An open capture shared between its worker and the session.
pub(crate) struct CaptureHandle {
    device: String,
    source: Mutex<Option<Box<dyn PacketSource>>>,
}

impl CaptureHandle {
    pub fn new(device: String, source: Box<dyn PacketSource>) -> Self {
        Self {
            device,
            source: Mutex::new(Some(source)),
        }
    }

    /// Read from the source; `None` once the handle is closed.
    pub fn next_packet(&self) -> Option<CaptureResult<Option<RawFrame>>> {
        let mut source = self.source.lock();
        source.as_mut().map(|source| source.next_packet())
    }

    /// Release the source. Returns false if it was already released.
    pub fn close(&self) -> bool {
        let source = self.source.lock().take();
        match source {
            Some(source) => {
                drop(source);
                debug!(device = %self.device, "Capture handle closed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{tcp_frame, ScriptedBackend, ScriptedDevice};
    use crossbeam_channel::Receiver;
    use livekey_ipc::{capture_event_channel, CaptureEvent};
    use std::time::{Duration, Instant};

    const SERVER: &str = "rtmp://push-rtmp-abc.example.com/thirdgame";
    const KEY: &str = "stream-123?expire=1999999999&sign=deadbeef";

    fn observer() -> (Arc<dyn CaptureObserver>, Receiver<CaptureEvent>) {
        let (tx, rx) = capture_event_channel();
        (Arc::new(tx), rx)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn discovery_events(rx: &Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
        rx.try_iter()
            .filter(|e| !matches!(e, CaptureEvent::StateChanged { .. }))
            .collect()
    }

    #[test]
    fn test_end_to_end_discovery_auto_stops() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")
            .with_payloads([
                format!("POST /api HTTP/1.1\r\n\r\n{{\"url\":\"{SERVER}\"}}"),
                "noise".to_string(),
                format!("{{\"stream\":\"{KEY}\"}}"),
                format!("again {SERVER} {KEY}"),
            ])]);
        let counters = backend.counters();
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| !session.is_active());

        let events: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(
            events.first(),
            Some(&CaptureEvent::StateChanged {
                previous: SessionState::Idle,
                current: SessionState::Active,
            })
        );
        assert_eq!(
            events.last(),
            Some(&CaptureEvent::StateChanged {
                previous: SessionState::Active,
                current: SessionState::Idle,
            })
        );

        let discovery: Vec<CaptureEvent> = events
            .into_iter()
            .filter(|e| !matches!(e, CaptureEvent::StateChanged { .. }))
            .collect();
        assert_eq!(
            discovery,
            vec![
                CaptureEvent::ServerFound(SERVER.to_string()),
                CaptureEvent::KeyFound(KEY.to_string()),
                CaptureEvent::EndpointFound("203.0.113.7:443".to_string()),
                CaptureEvent::AllFound(ExtractionResult {
                    server_url: SERVER.to_string(),
                    stream_key: KEY.to_string(),
                    source_endpoint: Some("203.0.113.7:443".to_string()),
                }),
            ]
        );

        // The fourth frame is never inspected.
        assert_eq!(counters.frames_read(), 3);
        assert_eq!(counters.closed(), 1);
        assert_eq!(session.discovered().complete().unwrap().stream_key, KEY);
    }

    #[test]
    fn test_discovery_fires_once_across_workers() {
        let payload = format!("{SERVER}/{KEY}");
        let devices = (0..4)
            .map(|i| {
                ScriptedDevice::new(format!("eth{i}"), format!("Ethernet {i}"))
                    .with_payloads(vec![payload.clone(); 20])
            })
            .collect();
        let session = CaptureSession::new(Arc::new(ScriptedBackend::new(devices)));
        let (observer, rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| !session.is_active());
        thread::sleep(Duration::from_millis(50));

        let events = discovery_events(&rx);
        let count = |f: fn(&CaptureEvent) -> bool| events.iter().filter(|e| f(e)).count();
        assert_eq!(count(|e| matches!(e, CaptureEvent::ServerFound(_))), 1);
        assert_eq!(count(|e| matches!(e, CaptureEvent::KeyFound(_))), 1);
        assert_eq!(count(|e| matches!(e, CaptureEvent::AllFound(_))), 1);
    }

    #[test]
    fn test_key_before_server_is_accepted() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")
            .with_payloads([KEY.to_string(), SERVER.to_string()])]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| !session.is_active());

        let events = discovery_events(&rx);
        assert!(matches!(events[0], CaptureEvent::KeyFound(_)));
        assert!(matches!(events.last(), Some(CaptureEvent::AllFound(_))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let devices = vec![
            ScriptedDevice::new("eth0", "Ethernet"),
            ScriptedDevice::new("wlan0", "Wi-Fi"),
        ];
        let backend = ScriptedBackend::new(devices);
        let counters = backend.counters();
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        // Never started.
        session.stop();
        assert!(session.state().is_idle());

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| session.listening_workers() == 2);

        session.stop();
        session.stop();
        assert!(session.state().is_idle());
        assert_eq!(counters.closed(), 2);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.closed(), 2);

        let transitions = rx
            .try_iter()
            .filter(|e| matches!(e, CaptureEvent::StateChanged { .. }))
            .count();
        assert_eq!(transitions, 2);
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, _rx) = observer();

        session
            .start(&CaptureConfig::default(), Arc::clone(&observer))
            .unwrap();
        let err = session.start(&CaptureConfig::default(), observer).unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyStarted));
        session.stop();
    }

    #[test]
    fn test_restart_resets_discovery() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")
            .with_payloads([SERVER.to_string()])]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        session
            .start(&CaptureConfig::default(), Arc::clone(&observer))
            .unwrap();
        wait_until(|| session.discovered().server.is_some());
        session.stop();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| session.discovered().server.is_some());
        session.stop();

        let servers = discovery_events(&rx)
            .into_iter()
            .filter(|e| matches!(e, CaptureEvent::ServerFound(_)))
            .count();
        assert_eq!(servers, 2);
    }

    #[test]
    fn test_no_interfaces_reports_error() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("bt0", "Bluetooth Adapter")]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        let err = session.start(&CaptureConfig::default(), observer).unwrap_err();
        assert!(matches!(err, CaptureError::NoInterfaces));
        assert!(session.state().is_idle());
        assert!(matches!(
            rx.try_recv(),
            Ok(CaptureEvent::Error { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_reports_error() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();
        let config = CaptureConfig {
            key_pattern: "[".to_string(),
            ..CaptureConfig::default()
        };

        assert!(session.start(&config, observer).is_err());
        assert!(matches!(rx.try_recv(), Ok(CaptureEvent::Error { .. })));
    }

    #[test]
    fn test_failing_worker_does_not_affect_others() {
        let backend = ScriptedBackend::new(vec![
            ScriptedDevice::new("eth0", "Ethernet").failing_open(),
            ScriptedDevice::new("eth1", "Ethernet 2").failing_filter(),
            ScriptedDevice::new("wlan0", "Wi-Fi").with_payloads([format!("{SERVER} {KEY}")]),
        ]);
        let counters = backend.counters();
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| !session.is_active());

        assert!(discovery_events(&rx)
            .iter()
            .any(|e| matches!(e, CaptureEvent::AllFound(_))));
        // The filter failure closed its own source; the open failure had none.
        wait_until(|| counters.closed() == 2);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")
            .with_frames([
                RawFrame::ethernet(vec![0xde, 0xad]),
                tcp_frame(format!("{SERVER} {KEY}").as_bytes()).unwrap(),
            ])]);
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| !session.is_active());
        assert!(discovery_events(&rx)
            .iter()
            .any(|e| matches!(e, CaptureEvent::AllFound(_))));
    }

    #[test]
    fn test_dropping_session_stops_workers() {
        let backend = ScriptedBackend::new(vec![ScriptedDevice::new("eth0", "Ethernet")]);
        let counters = backend.counters();
        let session = CaptureSession::new(Arc::new(backend));
        let (observer, _rx) = observer();

        session.start(&CaptureConfig::default(), observer).unwrap();
        wait_until(|| session.listening_workers() == 1);
        drop(session);

        wait_until(|| counters.closed() == 1);
    }
}
