use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::detect::{DetectedTarget, DetectorPlugin};
use crate::error::{DetectionError, ThreadTerminationError};
use crate::frame::Frame;
use crate::ingest::{Camera, CameraGeometry};
use crate::stats::FrameStats;

use super::result::{FrameResult, FrameSink};
use super::snapshot::{CameraSnapshot, SnapshotCell};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl RunnerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunnerState::Idle,
            1 => RunnerState::Running,
            2 => RunnerState::Stopping,
            _ => RunnerState::Stopped,
        }
    }
}

/// One-way state cell shared between the runner and its worker.
#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RunnerState::Idle as u8)))
    }

    fn get(&self) -> RunnerState {
        RunnerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move `from -> to`; fails if the current state is not `from`.
    fn advance(&self, from: RunnerState, to: RunnerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move forward to `to` from any earlier state. Never moves backwards.
    fn raise(&self, to: RunnerState) {
        self.0.fetch_max(to as u8, Ordering::SeqCst);
    }
}

/// Cooperative cancellation flag. Once cancelled it stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct RunnerOptions {
    /// Sleep after a tick that ran no detection (failed read or disabled
    /// camera). Cut short by `stop`.
    pub backoff: Duration,
    /// Extra wait after the stop timeout before the worker is abandoned.
    pub force_grace: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(10),
            force_grace: Duration::from_millis(100),
        }
    }
}

struct DetectorSlot {
    plugin: Box<dyn DetectorPlugin>,
    failing: bool,
}

impl DetectorSlot {
    fn run(
        &mut self,
        camera: &str,
        frame: &Frame,
        geometry: &CameraGeometry,
    ) -> Option<Vec<DetectedTarget>> {
        let plugin = &mut self.plugin;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            plugin.find_objects(frame, geometry.width, geometry.height, geometry.fov)
        }))
        .unwrap_or_else(|_| {
            Err(DetectionError::Panicked {
                detector: plugin.name().to_string(),
            })
        });
        match outcome {
            Ok(found) => {
                if self.failing {
                    self.failing = false;
                    log::info!("PipelineRunner[{}]: {} recovered", camera, self.plugin.name());
                }
                Some(found)
            }
            Err(err) => {
                if !self.failing {
                    self.failing = true;
                    log::warn!("PipelineRunner[{}]: {}", camera, err);
                }
                None
            }
        }
    }
}

/// State owned by whichever thread drives the loop.
struct Worker {
    camera: Camera,
    detectors: Vec<DetectorSlot>,
    sink: Box<dyn FrameSink>,
    snapshot: Arc<SnapshotCell>,
    stats: FrameStats,
    detections: BTreeMap<String, Vec<DetectedTarget>>,
    ticks: u64,
    warmed_up: bool,
}

impl Worker {
    fn warm_up(&mut self) {
        if self.warmed_up {
            return;
        }
        self.warmed_up = true;
        for slot in &mut self.detectors {
            if let Err(err) = slot.plugin.warm_up() {
                log::warn!("PipelineRunner[{}]: warm-up: {}", self.camera.name(), err);
            }
        }
        self.stats = FrameStats::new(Instant::now());
    }

    /// One capture, detect, publish cycle. Returns whether detection ran.
    fn tick(&mut self) -> bool {
        let captured = self.camera.read_frame_raw().0;
        let enabled = self.camera.is_enabled();
        self.detections.clear();

        let camera = &self.camera;
        let detect = captured && enabled;
        if detect {
            let geometry = camera.geometry();
            for slot in &mut self.detectors {
                let name = slot.plugin.name().to_string();
                if !camera.filter().allows(&name) {
                    continue;
                }
                if let Some(found) = slot.run(camera.name(), camera.frame(), &geometry) {
                    self.detections.insert(name, found);
                }
            }
        }
        if captured {
            self.stats.record();
        }
        self.ticks += 1;

        let result = FrameResult {
            camera: camera.name(),
            table: camera.table(),
            frame: camera.frame(),
            detections: &self.detections,
            captured,
            enabled,
            state: camera.state(),
            health: camera.health(),
            stats: self.stats.snapshot(),
        };
        self.sink.on_frame(&result);
        self.snapshot.publish(CameraSnapshot {
            camera: result.camera.to_string(),
            state: result.state,
            enabled,
            health: result.health,
            stats: result.stats,
            ticks: self.ticks,
            detections: self.detections.clone(),
            frame: Arc::new(camera.frame().clone()),
        });
        detect
    }

    fn run(mut self, cancel: CancelToken, backoff: Duration) {
        self.warm_up();
        while !cancel.is_cancelled() {
            if !self.tick() && !cancel.is_cancelled() {
                std::thread::park_timeout(backoff);
            }
        }
        self.camera.close();
    }
}

/// Drives one camera and its detectors.
///
/// `Idle -> Running -> Stopping -> Stopped`, one way. A runner is either
/// started on its own worker thread or stepped with `run_once` from the
/// caller's thread, not both.
pub struct PipelineRunner {
    name: String,
    options: RunnerOptions,
    state: SharedState,
    cancel: CancelToken,
    snapshot: Arc<SnapshotCell>,
    worker: Option<Worker>,
    handle: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
}

impl PipelineRunner {
    pub fn new(
        camera: Camera,
        detectors: Vec<Box<dyn DetectorPlugin>>,
        sink: Box<dyn FrameSink>,
        options: RunnerOptions,
    ) -> Self {
        let geometry = camera.geometry();
        let name = camera.name().to_string();
        let snapshot = Arc::new(SnapshotCell::new(CameraSnapshot::empty(
            &name,
            geometry.width,
            geometry.height,
        )));
        let worker = Worker {
            camera,
            detectors: detectors
                .into_iter()
                .map(|plugin| DetectorSlot {
                    plugin,
                    failing: false,
                })
                .collect(),
            sink,
            snapshot: Arc::clone(&snapshot),
            stats: FrameStats::default(),
            detections: BTreeMap::new(),
            ticks: 0,
            warmed_up: false,
        };
        Self {
            name,
            options,
            state: SharedState::new(),
            cancel: CancelToken::new(),
            snapshot,
            worker: Some(worker),
            handle: None,
            exited: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunnerState {
        self.state.get()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared handle to the latest snapshot.
    pub fn snapshots(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<CameraSnapshot> {
        self.snapshot.load()
    }

    /// The camera, while it is still owned by the caller's thread (`Idle`).
    pub fn camera(&self) -> Option<&Camera> {
        self.worker.as_ref().map(|w| &w.camera)
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.worker.as_mut().map(|w| &mut w.camera)
    }

    /// Spawn the worker thread. `Idle -> Running`.
    pub fn start(&mut self) -> Result<()> {
        if !self.state.advance(RunnerState::Idle, RunnerState::Running) {
            return Err(anyhow!(
                "runner {} cannot start from {:?}",
                self.name,
                self.state.get()
            ));
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("runner {} has no worker", self.name))?;
        let (tx, rx) = mpsc::channel();
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        let backoff = self.options.backoff;
        let handle = std::thread::Builder::new()
            .name(format!("vision-{}", self.name.to_lowercase()))
            .spawn(move || {
                worker.run(cancel, backoff);
                state.raise(RunnerState::Stopped);
                let _ = tx.send(());
            })
            .with_context(|| format!("spawn worker for {}", self.name))?;
        log::info!("PipelineRunner[{}]: started", self.name);
        self.handle = Some(handle);
        self.exited = Some(rx);
        Ok(())
    }

    /// Run one tick on the caller's thread. Only valid while `Idle`; returns
    /// `None` otherwise, else whether detection ran.
    pub fn run_once(&mut self) -> Option<bool> {
        if self.state.get() != RunnerState::Idle || self.cancel.is_cancelled() {
            return None;
        }
        let worker = self.worker.as_mut()?;
        worker.warm_up();
        Some(worker.tick())
    }

    /// Set the cancellation flag without waiting.
    pub fn request_stop(&self) {
        self.cancel.cancel();
        self.state.advance(RunnerState::Running, RunnerState::Stopping);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    /// Cancel and wait up to `timeout` for the worker to exit.
    ///
    /// A worker that misses the deadline is woken once more and given a short
    /// grace period; if it is still running it is detached and the failure is
    /// returned. The camera is closed by whichever thread owns it.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), ThreadTerminationError> {
        self.request_stop();

        let Some(handle) = self.handle.take() else {
            if let Some(mut worker) = self.worker.take() {
                worker.camera.close();
            }
            self.state.raise(RunnerState::Stopped);
            return Ok(());
        };
        let exited = self.exited.take();
        let wait = |limit: Duration| match &exited {
            Some(rx) => !matches!(rx.recv_timeout(limit), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        if wait(timeout) {
            let _ = handle.join();
            log::info!("PipelineRunner[{}]: stopped", self.name);
            return Ok(());
        }

        let err = ThreadTerminationError {
            name: handle.thread().name().unwrap_or(&self.name).to_string(),
            timeout,
        };
        log::error!("PipelineRunner[{}]: {}", self.name, err);
        handle.thread().unpark();
        if wait(self.options.force_grace) {
            let _ = handle.join();
        }
        Err(err)
    }
}

impl Drop for PipelineRunner {
    fn drop(&mut self) {
        // Never block in drop; a running worker is told to stop and detached.
        if self.handle.is_some() {
            self.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, NameFilter, NullDetector};
    use crate::error::DeviceError;
    use crate::ingest::{CameraSource, CameraState, StillSource};
    use std::sync::Mutex;

    fn still_camera(name: &str) -> Camera {
        let geometry = CameraGeometry {
            width: 8,
            height: 6,
            fps: 30,
            fov: 60.0,
        };
        let mut camera = Camera::new(name, geometry, Box::new(StillSource::new(name, [9, 9, 9])));
        camera.open().unwrap();
        camera
    }

    struct Counting {
        name: String,
        panic_on: Option<u64>,
        calls: u64,
    }

    impl DetectorPlugin for Counting {
        fn name(&self) -> &str {
            &self.name
        }

        fn find_objects(
            &mut self,
            _frame: &Frame,
            _width: u32,
            _height: u32,
            _fov: f64,
        ) -> Result<Vec<DetectedTarget>, DetectionError> {
            self.calls += 1;
            if self.panic_on == Some(self.calls) {
                panic!("detector bug");
            }
            let bbox = BoundingBox::new(1.0, 1.0, 2.0, 2.0).unwrap();
            Ok(vec![DetectedTarget::new(self.name.clone(), bbox)])
        }
    }

    fn counting(name: &str, panic_on: Option<u64>) -> Box<dyn DetectorPlugin> {
        Box::new(Counting {
            name: name.to_string(),
            panic_on,
            calls: 0,
        })
    }

    type Log = Arc<Mutex<Vec<(bool, Vec<String>)>>>;

    fn recording_sink() -> (Box<dyn FrameSink>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&log);
        let sink = move |result: &FrameResult<'_>| {
            let names = result.detections.keys().cloned().collect();
            writer.lock().unwrap().push((result.captured, names));
        };
        (Box::new(sink), log)
    }

    #[test]
    fn run_once_applies_filter_and_reports() {
        let camera = still_camera("FRONT").with_filter(NameFilter::parse("!APRIL"));
        let (sink, log) = recording_sink();
        let mut runner = PipelineRunner::new(
            camera,
            vec![counting("RING", None), counting("APRIL", None)],
            sink,
            RunnerOptions::default(),
        );
        assert_eq!(runner.run_once(), Some(true));
        assert_eq!(runner.run_once(), Some(true));
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], (true, vec!["RING".to_string()]));
        assert_eq!(runner.snapshot().ticks, 2);
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[test]
    fn panicking_detector_only_loses_its_own_tick() {
        let camera = still_camera("FRONT");
        let (sink, log) = recording_sink();
        let mut runner = PipelineRunner::new(
            camera,
            vec![counting("RING", Some(1)), counting("CUBE", None)],
            sink,
            RunnerOptions::default(),
        );
        runner.run_once();
        runner.run_once();
        let log = log.lock().unwrap();
        assert_eq!(log[0].1, vec!["CUBE".to_string()]);
        assert_eq!(log[1].1, vec!["CUBE".to_string(), "RING".to_string()]);
    }

    #[test]
    fn disabled_camera_skips_detection_but_still_reports() {
        let camera = still_camera("FRONT");
        camera.set_enabled(false);
        let (sink, log) = recording_sink();
        let mut runner =
            PipelineRunner::new(camera, vec![counting("RING", None)], sink, RunnerOptions::default());
        assert_eq!(runner.run_once(), Some(false));
        assert_eq!(log.lock().unwrap()[0], (true, Vec::new()));
    }

    #[test]
    fn threaded_runner_stops_within_timeout() {
        let (sink, log) = recording_sink();
        let mut runner = PipelineRunner::new(
            still_camera("FRONT"),
            vec![Box::new(NullDetector::new("NONE"))],
            sink,
            RunnerOptions::default(),
        );
        runner.start().unwrap();
        assert!(runner.start().is_err());
        let deadline = Instant::now() + Duration::from_secs(5);
        while log.lock().unwrap().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(runner.stop(Duration::from_secs(2)).is_ok());
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(runner.snapshot().state, CameraState::Open);
        assert!(runner.run_once().is_none());
    }

    struct Stuck {
        release: Arc<AtomicBool>,
    }

    impl CameraSource for Stuck {
        fn kind(&self) -> &'static str {
            "STUCK"
        }

        fn open(&mut self, _geometry: &CameraGeometry) -> Result<(), DeviceError> {
            Ok(())
        }

        fn grab(&mut self, _frame: &mut Frame) -> Result<(), DeviceError> {
            while !self.release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    #[test]
    fn stuck_worker_is_reported_not_waited_on() {
        let release = Arc::new(AtomicBool::new(false));
        let source = Stuck {
            release: Arc::clone(&release),
        };
        let mut camera = Camera::new("STUCK", CameraGeometry::default(), Box::new(source));
        camera.open().unwrap();
        let (sink, _log) = recording_sink();
        let options = RunnerOptions {
            force_grace: Duration::from_millis(10),
            ..RunnerOptions::default()
        };
        let mut runner = PipelineRunner::new(camera, Vec::new(), sink, options);
        runner.start().unwrap();

        let started = Instant::now();
        let err = runner.stop(Duration::from_millis(50)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(err.name, "vision-stuck");
        assert_eq!(runner.state(), RunnerState::Stopping);

        // Once the device unblocks, the worker notices the flag and exits.
        release.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.state() != RunnerState::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[test]
    fn stopping_an_idle_runner_closes_the_camera() {
        let (sink, _log) = recording_sink();
        let mut runner =
            PipelineRunner::new(still_camera("FRONT"), Vec::new(), sink, RunnerOptions::default());
        assert!(runner.stop(Duration::from_millis(10)).is_ok());
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(runner.camera().is_none());
    }
}
