//! visiond - robot vision daemon
//!
//! This daemon:
//! 1. Loads camera and detector settings for the selected season config
//! 2. Connects the telemetry bus (MQTT when a broker is given)
//! 3. Opens every listed camera; a camera that fails to open stays degraded
//! 4. Runs one pipeline worker per camera (or steps them in turn in sync mode)
//! 5. Stops on Ctrl-C or when `control/RobotStop` is set to 1

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use robot_vision::detect::DetectorRegistry;
use robot_vision::pipeline::{CameraSnapshot, SnapshotCell};
use robot_vision::telemetry::{
    detector_labels, CameraCallback, MemoryBus, MqttBus, MqttSettings, Poller, TelemetryBus,
    TelemetryTable, TelemetryValue,
};
use robot_vision::{
    CameraParams, ConfigStore, PipelineRunner, RunnerOptions, SourceRegistry, VideoTarget,
};

const CONTROL_TABLE: &str = "control";
const MAIN_LOOP_SLEEP: Duration = Duration::from_millis(10);
const BUS_CONNECT_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Robot vision daemon")]
struct Args {
    /// Installation root; config, videos and logs live below it.
    #[arg(long, env = "VISION_HOME", default_value = ".")]
    home: PathBuf,

    /// Config set under `<home>/config/`.
    #[arg(long, env = "VISION_CONFIG", default_value = "2024")]
    config: String,

    /// Camera settings file (overrides `<home>/config/<config>/CameraSettings.txt`).
    #[arg(long, env = "VISION_CAMERA_FILE")]
    camera_file: Option<PathBuf>,

    /// Detector settings file (overrides `<home>/config/<config>/VisionSettings.txt`).
    #[arg(long, env = "VISION_DETECTOR_FILE")]
    vision_file: Option<PathBuf>,

    /// Cameras to run, by config section name.
    #[arg(long, env = "VISION_CAMERAS", value_delimiter = ',', default_value = "INTAKE,SHOOTER")]
    cameras: Vec<String>,

    /// Record every camera to `<videos-dir>/<camera>_<timestamp>.mjpeg`.
    #[arg(long, env = "VISION_SAVE_VIDEO")]
    save_video: bool,

    /// Recording directory (defaults to `<home>/videos`).
    #[arg(long, env = "VISION_VIDEOS_DIR")]
    videos_dir: Option<PathBuf>,

    /// Step all cameras from the main thread instead of one worker each.
    #[arg(long, env = "VISION_CAMERA_SYNC")]
    camera_sync: bool,

    /// Directory for per-run summary logs (defaults to `<home>/logs/run`).
    #[arg(long, env = "VISION_LOGS")]
    logs_dir: Option<PathBuf>,

    /// Seconds between status lines.
    #[arg(long, env = "VISION_STATUS_SECS", default_value = "5")]
    status_secs: u64,

    /// Milliseconds to wait for each worker at shutdown.
    #[arg(long, env = "VISION_STOP_TIMEOUT_MS", default_value = "1000")]
    stop_timeout_ms: u64,

    /// MQTT broker address. Without it telemetry stays in-process.
    #[arg(long, env = "MQTT_BROKER_ADDR")]
    mqtt_broker_addr: Option<String>,

    /// Topic prefix for telemetry tables.
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = "vision")]
    mqtt_prefix: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,
}

impl Args {
    fn config_dir(&self) -> PathBuf {
        self.home.join("config").join(&self.config)
    }

    fn camera_file(&self) -> PathBuf {
        self.camera_file
            .clone()
            .unwrap_or_else(|| self.config_dir().join("CameraSettings.txt"))
    }

    fn vision_file(&self) -> PathBuf {
        self.vision_file
            .clone()
            .unwrap_or_else(|| self.config_dir().join("VisionSettings.txt"))
    }
}

/// Plain-text run summary next to the process log, with a `log_LATEST.txt`
/// link to the newest one.
struct RunLog {
    file: Option<std::fs::File>,
}

impl RunLog {
    fn open(dir: &Path, timestamp: &str) -> Self {
        let file = match Self::create(dir, timestamp) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("visiond: run log disabled: {:#}", e);
                None
            }
        };
        Self { file }
    }

    fn create(dir: &Path, timestamp: &str) -> Result<std::fs::File> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let name = format!("log_{}.txt", timestamp);
        let path = dir.join(&name);
        let file = std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        #[cfg(unix)]
        {
            let link = dir.join("log_LATEST.txt");
            let _ = std::fs::remove_file(&link);
            if let Err(e) = std::os::unix::fs::symlink(&name, &link) {
                log::debug!("visiond: {}: {}", link.display(), e);
            }
        }
        Ok(file)
    }

    fn line(&mut self, text: &str) {
        if let Some(file) = self.file.as_mut() {
            if writeln!(file, "{}", text).is_err() {
                self.file = None;
            }
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn connect_bus(args: &Args) -> Result<Arc<dyn TelemetryBus>> {
    let Some(addr) = args.mqtt_broker_addr.as_deref() else {
        log::info!("visiond: no MQTT broker configured; telemetry stays in-process");
        return Ok(Arc::new(MemoryBus::new()));
    };
    let mut settings = MqttSettings::new(addr);
    settings.prefix = args.mqtt_prefix.clone();
    settings.username = args.mqtt_username.clone();
    settings.password = args.mqtt_password.clone();
    settings.use_tls = args.mqtt_use_tls;
    let bus = MqttBus::connect(&settings).context("MQTT setup")?;

    let deadline = Instant::now() + BUS_CONNECT_WAIT;
    while !bus.is_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    if !bus.is_connected() {
        log::warn!("visiond: broker {} not reachable yet; continuing", addr);
    }
    Ok(Arc::new(bus))
}

fn load_config(path: &Path) -> ConfigStore {
    let mut store = ConfigStore::new();
    if let Err(e) = store.load_file(path, false) {
        log::error!("visiond: {}", e);
    }
    store
}

fn status_line(snapshot: &CameraSnapshot) -> String {
    let found: Vec<String> = snapshot
        .detections
        .iter()
        .map(|(name, targets)| format!("{}={}", name, targets.len()))
        .collect();
    format!(
        "{} [{}{}] {:5.1} fps (avg {:5.1}) frames={} failures={} {}",
        snapshot.camera,
        snapshot.state,
        if snapshot.enabled { "" } else { ", disabled" },
        snapshot.stats.fps,
        snapshot.stats.avg_fps,
        snapshot.stats.frames,
        snapshot.health.consecutive_failures,
        found.join(" ")
    )
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cameras_cfg = load_config(&args.camera_file());
    let vision_cfg = load_config(&args.vision_file());

    let bus = connect_bus(&args)?;
    let control = bus.table(CONTROL_TABLE);
    if let Err(e) = control.put_number("RobotStop", 0.0) {
        log::debug!("visiond: RobotStop not reset: {}", e);
    }
    // The robot may hand out a match-wide timestamp for file names.
    let timestamp = match control.get("Time") {
        Some(TelemetryValue::Text(time)) if !time.is_empty() => time,
        _ => unix_seconds().to_string(),
    };

    let logs_dir = args
        .logs_dir
        .clone()
        .unwrap_or_else(|| args.home.join("logs").join("run"));
    let mut run_log = RunLog::open(&logs_dir, &timestamp);
    run_log.line(&format!("Run {} started (unix {}).", timestamp, unix_seconds()));
    run_log.line(if bus.is_connected() {
        "connected to telemetry bus"
    } else {
        "telemetry bus not connected"
    });

    let params = CameraParams {
        timestamp: timestamp.clone(),
        video: if args.save_video {
            VideoTarget::Auto
        } else {
            VideoTarget::Disabled
        },
        videos_dir: args
            .videos_dir
            .clone()
            .unwrap_or_else(|| args.home.join("videos")),
    };

    let sources = SourceRegistry::with_builtin();
    let mut cameras = Vec::new();
    for name in args.cameras.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        match sources.create(name, &cameras_cfg, &params) {
            Ok(mut camera) => {
                if let Err(e) = camera.open() {
                    run_log.line(&format!("camera {} failed to open: {}", camera.name(), e));
                }
                cameras.push(camera);
            }
            Err(e) => {
                log::error!("visiond: skipping camera {}: {}", name, e);
                run_log.line(&format!("camera {} skipped: {}", name, e));
            }
        }
    }
    if cameras.is_empty() {
        return Err(anyhow!("no usable cameras among {:?}", args.cameras));
    }

    // Every camera has claimed its bandwidth; now raise the frame rates.
    for camera in cameras.iter_mut() {
        camera.post_init();
    }

    let detectors = DetectorRegistry::with_builtin();
    let labels = detector_labels(&vision_cfg);
    let mut runners: Vec<PipelineRunner> = cameras
        .into_iter()
        .map(|camera| {
            let sink = CameraCallback::new(Arc::clone(&bus), &camera, labels.clone());
            PipelineRunner::new(
                camera,
                detectors.build_all(&vision_cfg),
                Box::new(sink),
                RunnerOptions::default(),
            )
        })
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("error setting Ctrl-C handler")?;
    }

    if !args.camera_sync {
        for runner in runners.iter_mut() {
            runner.start()?;
        }
    }
    let cells: Vec<Arc<SnapshotCell>> = runners.iter().map(|r| r.snapshots()).collect();

    let remote_stop = {
        let bus = Arc::clone(&bus);
        let control = Arc::clone(&control);
        move || bus.is_connected() && control.get_number("RobotStop", 0.0) == 1.0
    };
    let mut check_stop = Poller::new(remote_stop);

    log::info!(
        "visiond running: {} camera(s), {} mode",
        runners.len(),
        if args.camera_sync { "sync" } else { "threaded" }
    );
    let status_every = Duration::from_secs(args.status_secs.max(1));
    let start = Instant::now();
    let mut last_status = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        if check_stop.poll(false) {
            log::info!("visiond: RobotStop received");
            break;
        }
        if args.camera_sync {
            for runner in runners.iter_mut() {
                runner.run_once();
            }
        } else {
            std::thread::sleep(MAIN_LOOP_SLEEP);
        }
        if last_status.elapsed() >= status_every {
            last_status = Instant::now();
            for cell in &cells {
                log::info!("{}", status_line(&cell.load()));
            }
        }
    }
    let elapsed = start.elapsed().as_secs_f64();

    let timeout = Duration::from_millis(args.stop_timeout_ms);
    for runner in runners.iter() {
        runner.request_stop();
    }
    for runner in runners.iter_mut() {
        if let Err(e) = runner.stop(timeout) {
            run_log.line(&format!("{}", e));
        }
    }

    for cell in &cells {
        let snapshot = cell.load();
        let stats = snapshot.stats;
        let line = format!(
            "Average FPS for {}: {:5.2}/{:5.2}/{:5.2}/{:5.2}",
            snapshot.camera,
            if elapsed > 0.0 { stats.frames as f64 / elapsed } else { 0.0 },
            stats.avg_fps,
            stats.min_fps.unwrap_or_default(),
            stats.max_fps.unwrap_or_default()
        );
        log::info!("{}", line);
        run_log.line(&line);
    }
    run_log.line(&format!("Run {} stopped (unix {}).", timestamp, unix_seconds()));

    drop(runners);
    drop(control);
    drop(bus);
    Ok(())
}
