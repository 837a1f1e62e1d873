//! Camera lifecycle around a `CameraSource`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ConfigStore;
use crate::detect::NameFilter;
use crate::error::{ConfigError, DeviceError};
use crate::frame::Frame;
use crate::record::{VideoRecorder, VideoTarget};

use super::source::{CameraGeometry, CameraSource};

/// Per-run construction parameters shared by every camera.
#[derive(Clone, Debug, Default)]
pub struct CameraParams {
    /// Run identifier used in recording file names.
    pub timestamp: String,
    pub video: VideoTarget,
    pub videos_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CameraState {
    Unopened,
    Open,
    Degraded,
    Closed,
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CameraState::Unopened => "unopened",
            CameraState::Open => "open",
            CameraState::Degraded => "degraded",
            CameraState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Failure bookkeeping. Transition counters move once per state change, not
/// once per failed read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraHealth {
    pub degraded_events: u64,
    pub recovered_events: u64,
    pub consecutive_failures: u64,
}

pub struct Camera {
    name: String,
    table: String,
    geometry: CameraGeometry,
    source: Box<dyn CameraSource>,
    state: CameraState,
    device_open: bool,
    health: CameraHealth,
    enabled: Arc<AtomicBool>,
    filter: NameFilter,
    crop_bottom: u32,
    frame: Frame,
    scratch: Frame,
    recorder: Option<VideoRecorder>,
    reopen_interval: Option<Duration>,
    last_open_attempt: Option<Instant>,
}

impl Camera {
    pub fn new(name: impl Into<String>, geometry: CameraGeometry, source: Box<dyn CameraSource>) -> Self {
        let name = name.into();
        Self {
            table: name.to_lowercase(),
            name,
            geometry,
            source,
            state: CameraState::Unopened,
            device_open: false,
            health: CameraHealth::default(),
            enabled: Arc::new(AtomicBool::new(true)),
            filter: NameFilter::allow_all(),
            crop_bottom: 0,
            frame: Frame::zeroed(geometry.width, geometry.height),
            scratch: Frame::zeroed(geometry.width, geometry.height),
            recorder: None,
            reopen_interval: None,
            last_open_attempt: None,
        }
    }

    /// Build from the camera's config section. The source has already been
    /// chosen from `TYPE`.
    pub fn from_config(
        name: &str,
        cfg: &ConfigStore,
        source: Box<dyn CameraSource>,
        params: &CameraParams,
    ) -> Result<Self, ConfigError> {
        let geometry = CameraGeometry::from_config(name, cfg)?;
        let mut camera = Self::new(name, geometry, source)
            .with_filter(NameFilter::parse(&cfg.get_str(name, "VLIBS", "!")))
            .with_crop_bottom(cfg.get(name, "CROP_BOTTOM", 0u32)?);
        if let Some(table) = cfg.get_raw(name, "NTNAME") {
            camera.table = table.to_string();
        }
        let reopen_secs: f64 = cfg.get(name, "REOPEN_SECS", 0.0)?;
        if reopen_secs > 0.0 && reopen_secs.is_finite() {
            camera.reopen_interval = Some(Duration::from_secs_f64(reopen_secs));
        }
        if let Some(path) = params.video.resolve(&params.videos_dir, name, &params.timestamp) {
            camera.recorder = VideoRecorder::create(&path, geometry.width, geometry.height);
        }
        Ok(camera)
    }

    pub fn with_filter(mut self, filter: NameFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_crop_bottom(mut self, rows: u32) -> Self {
        self.crop_bottom = rows;
        self
    }

    pub fn with_reopen_interval(mut self, interval: Option<Duration>) -> Self {
        self.reopen_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Telemetry table this camera publishes into.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn geometry(&self) -> CameraGeometry {
        self.geometry
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn health(&self) -> CameraHealth {
        self.health
    }

    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Shared handle to the enabled flag, for writers on other threads.
    pub fn enabled_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }

    /// Most recent good frame (zeroed before the first capture).
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Acquire the device. On failure the camera is degraded, not removed.
    pub fn open(&mut self) -> Result<(), DeviceError> {
        if self.state == CameraState::Closed {
            return Err(DeviceError::NotOpen {
                name: self.name.clone(),
            });
        }
        self.last_open_attempt = Some(Instant::now());
        match self.source.open(&self.geometry) {
            Ok(()) => {
                self.device_open = true;
                self.mark_success();
                log::info!(
                    "Camera[{}]: open ({} {}x{} @ {} fps)",
                    self.name,
                    self.source.kind(),
                    self.geometry.width,
                    self.geometry.height,
                    self.geometry.fps
                );
                Ok(())
            }
            Err(err) => {
                self.device_open = false;
                self.mark_failure(&err);
                Err(err)
            }
        }
    }

    /// Release and re-acquire the device.
    pub fn reopen(&mut self) -> Result<(), DeviceError> {
        if self.device_open {
            self.source.close();
            self.device_open = false;
        }
        self.open()
    }

    /// Second initialization phase. Failure is logged and leaves the camera
    /// usable at whatever rate the device kept.
    pub fn post_init(&mut self) {
        if !self.device_open {
            return;
        }
        if let Err(err) = self.source.post_init() {
            log::warn!("Camera[{}]: post-init: {}", self.name, err);
        }
    }

    /// Capture one frame.
    ///
    /// Returns whether a fresh frame was captured, and the current frame: the
    /// new one on success, the last good one otherwise. Never panics and
    /// never returns an empty frame.
    pub fn read_frame_raw(&mut self) -> (bool, &Frame) {
        match self.state {
            CameraState::Closed => return (false, &self.frame),
            _ if !self.device_open => {
                if !self.try_reopen() {
                    let err = DeviceError::NotOpen {
                        name: self.name.clone(),
                    };
                    self.mark_failure(&err);
                    return (false, &self.frame);
                }
            }
            _ => {}
        }

        match self.source.grab(&mut self.scratch) {
            Ok(()) => {
                std::mem::swap(&mut self.frame, &mut self.scratch);
                self.frame.black_out_bottom(self.crop_bottom);
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.write(&self.frame);
                }
                self.mark_success();
                (true, &self.frame)
            }
            Err(err) => {
                self.mark_failure(&err);
                if self.reopen_due() {
                    self.source.close();
                    self.device_open = false;
                }
                (false, &self.frame)
            }
        }
    }

    /// Release the device and finish the recording. Idempotent.
    pub fn close(&mut self) {
        if self.state == CameraState::Closed {
            return;
        }
        self.source.close();
        self.device_open = false;
        if let Some(recorder) = self.recorder.take() {
            recorder.finish();
        }
        self.state = CameraState::Closed;
        log::info!("Camera[{}]: closed", self.name);
    }

    fn reopen_due(&self) -> bool {
        match (self.reopen_interval, self.last_open_attempt) {
            (Some(interval), Some(last)) => last.elapsed() >= interval,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn try_reopen(&mut self) -> bool {
        if !self.reopen_due() {
            return false;
        }
        log::debug!("Camera[{}]: attempting re-open", self.name);
        self.last_open_attempt = Some(Instant::now());
        match self.source.open(&self.geometry) {
            Ok(()) => {
                self.device_open = true;
                if let Err(err) = self.source.post_init() {
                    log::warn!("Camera[{}]: post-init after re-open: {}", self.name, err);
                }
                true
            }
            Err(_) => false,
        }
    }

    fn mark_failure(&mut self, err: &DeviceError) {
        self.health.consecutive_failures += 1;
        if self.state != CameraState::Degraded {
            self.state = CameraState::Degraded;
            self.health.degraded_events += 1;
            log::warn!("Camera[{}]: degraded: {}", self.name, err);
        }
    }

    fn mark_success(&mut self) {
        if self.state == CameraState::Degraded {
            self.health.recovered_events += 1;
            log::info!(
                "Camera[{}]: recovered after {} failed attempts",
                self.name,
                self.health.consecutive_failures
            );
        }
        self.health.consecutive_failures = 0;
        self.state = CameraState::Open;
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fails every grab while `failing` is set.
    struct Flaky {
        failing: Arc<AtomicBool>,
        opens: Arc<AtomicUsize>,
        fail_open: bool,
    }

    impl CameraSource for Flaky {
        fn kind(&self) -> &'static str {
            "FLAKY"
        }

        fn open(&mut self, _geometry: &CameraGeometry) -> Result<(), DeviceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(DeviceError::Open {
                    name: "FLAKY".to_string(),
                    reason: "unplugged".to_string(),
                });
            }
            Ok(())
        }

        fn grab(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeviceError::Read {
                    name: "FLAKY".to_string(),
                    reason: "timeout".to_string(),
                });
            }
            frame.as_bytes_mut().fill(200);
            Ok(())
        }
    }

    fn flaky_source(fail_open: bool) -> (Flaky, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let failing = Arc::new(AtomicBool::new(false));
        let opens = Arc::new(AtomicUsize::new(0));
        let source = Flaky {
            failing: Arc::clone(&failing),
            opens: Arc::clone(&opens),
            fail_open,
        };
        (source, failing, opens)
    }

    fn flaky(fail_open: bool) -> (Camera, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let (source, failing, opens) = flaky_source(fail_open);
        let geometry = CameraGeometry {
            width: 8,
            height: 4,
            ..CameraGeometry::default()
        };
        (Camera::new("FLAKY", geometry, Box::new(source)), failing, opens)
    }

    #[test]
    fn failures_are_debounced_to_one_event_per_transition() {
        let (mut camera, failing, _) = flaky(false);
        camera.open().unwrap();
        assert_eq!(camera.state(), CameraState::Open);

        failing.store(true, Ordering::SeqCst);
        for _ in 0..25 {
            let (ok, frame) = camera.read_frame_raw();
            assert!(!ok);
            assert_eq!(frame.as_bytes().len(), 8 * 4 * 3);
        }
        assert_eq!(camera.state(), CameraState::Degraded);
        assert_eq!(camera.health().degraded_events, 1);
        assert_eq!(camera.health().consecutive_failures, 25);

        failing.store(false, Ordering::SeqCst);
        assert!(camera.read_frame_raw().0);
        assert!(camera.read_frame_raw().0);
        let health = camera.health();
        assert_eq!(health.recovered_events, 1);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(camera.state(), CameraState::Open);
    }

    #[test]
    fn failed_read_keeps_last_good_frame() {
        let (mut camera, failing, _) = flaky(false);
        camera.open().unwrap();
        assert!(camera.frame().is_blank());
        assert!(camera.read_frame_raw().0);
        failing.store(true, Ordering::SeqCst);
        let (ok, frame) = camera.read_frame_raw();
        assert!(!ok);
        assert_eq!(frame.pixel(0, 0), Some([200, 200, 200]));
    }

    #[test]
    fn crop_blacks_out_bottom_rows() {
        let (camera, _, _) = flaky(false);
        let mut camera = camera.with_crop_bottom(1);
        camera.open().unwrap();
        let (_, frame) = camera.read_frame_raw();
        assert_eq!(frame.pixel(0, 2), Some([200, 200, 200]));
        assert_eq!(frame.pixel(0, 3), Some([0, 0, 0]));
    }

    #[test]
    fn failed_open_degrades_and_reads_never_panic() {
        let (mut camera, _, opens) = flaky(true);
        assert!(camera.open().is_err());
        assert_eq!(camera.state(), CameraState::Degraded);
        for _ in 0..5 {
            assert!(!camera.read_frame_raw().0);
        }
        assert_eq!(camera.health().degraded_events, 1);
        // No reopen interval configured: the device is not retried.
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopen_interval_retries_the_device() {
        let (camera, _, opens) = flaky(true);
        let mut camera = camera.with_reopen_interval(Some(Duration::ZERO));
        assert!(camera.open().is_err());
        camera.read_frame_raw();
        camera.read_frame_raw();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let (mut camera, _, _) = flaky(false);
        camera.open().unwrap();
        camera.close();
        camera.close();
        assert_eq!(camera.state(), CameraState::Closed);
        assert!(!camera.read_frame_raw().0);
        assert!(camera.open().is_err());
    }

    #[test]
    fn config_sets_table_filter_and_geometry() {
        let cfg = ConfigStore::from_text(
            "WIDTH=64\nFRONT:\nHEIGHT=48\nNTNAME=front_cam\nVLIBS=!BALL\nCROP_BOTTOM=4\n",
        );
        let (source, _, _) = flaky_source(false);
        let camera =
            Camera::from_config("FRONT", &cfg, Box::new(source), &CameraParams::default()).unwrap();
        assert_eq!(camera.geometry().width, 64);
        assert_eq!(camera.geometry().height, 48);
        assert_eq!(camera.table(), "front_cam");
        assert!(!camera.filter().allows("ball"));
        assert!(camera.filter().allows("RING"));
        assert_eq!(camera.frame().as_bytes().len(), 64 * 48 * 3);
    }
}
