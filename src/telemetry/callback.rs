use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ConfigStore;
use crate::detect::DetectedTarget;
use crate::error::TelemetryError;
use crate::ingest::{Camera, CameraHealth, CameraState};
use crate::pipeline::{FrameResult, FrameSink};
use crate::stats::StatsSnapshot;

use super::{Poller, TelemetryBus, TelemetryTable, MISSING_VALUE};

/// Telemetry category for each detector section: `LABEL`, else the section name.
pub fn detector_labels(cfg: &ConfigStore) -> HashMap<String, String> {
    cfg.sections()
        .map(|section| {
            let label = cfg
                .get_own(section, "LABEL")
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .unwrap_or(section);
            (section.to_string(), label.to_string())
        })
        .collect()
}

#[derive(Serialize)]
struct StatsDocument<'a> {
    camera: &'a str,
    state: CameraState,
    enabled: bool,
    health: CameraHealth,
    stats: StatsSnapshot,
}

/// Per-camera sink that forwards tick results to the telemetry bus and reads
/// the camera's `Enabled` key back.
///
/// Publishing only happens while the cached reachability check says the bus
/// is up; the check itself is refreshed every `Poller::DEFAULT_MAX_COUNT`
/// ticks.
///
/// Every known label gets a `<Label>Found` count each tick, zero when the
/// read failed or the detector produced nothing, so stale counts never stay
/// on the bus.
pub struct CameraCallback {
    camera: String,
    table: Arc<dyn TelemetryTable>,
    reachable: Poller<bool>,
    labels: HashMap<String, String>,
    known_labels: BTreeSet<String>,
    enabled: Arc<AtomicBool>,
    /// Set once `Enabled=true` has reached the bus.
    enabled_announced: bool,
    publish_failing: bool,
}

impl CameraCallback {
    pub fn new(bus: Arc<dyn TelemetryBus>, camera: &Camera, labels: HashMap<String, String>) -> Self {
        let table = bus.table(camera.table());
        let enabled_announced = match table.put_bool("Enabled", true) {
            Ok(()) => true,
            Err(e) => {
                log::debug!(
                    "CameraCallback[{}]: Enabled deferred until the bus is up: {}",
                    camera.name(),
                    e
                );
                false
            }
        };
        let known_labels = labels.values().cloned().collect();
        Self {
            camera: camera.name().to_string(),
            table,
            reachable: Poller::new(move || bus.is_connected()),
            labels,
            known_labels,
            enabled: camera.enabled_handle(),
            enabled_announced,
            publish_failing: false,
        }
    }

    fn announce_enabled(&mut self) -> Result<(), TelemetryError> {
        if !self.enabled_announced {
            self.table.put_bool("Enabled", true)?;
            self.enabled_announced = true;
            log::debug!("CameraCallback[{}]: Enabled announced", self.camera);
        }
        Ok(())
    }

    fn label<'a>(&'a self, detector: &'a str) -> &'a str {
        self.labels.get(detector).map_or(detector, String::as_str)
    }

    fn publish(&self, result: &FrameResult<'_>) -> Result<(), TelemetryError> {
        let table = &self.table;
        table.put_string("State", &result.state.to_string())?;
        table.put_number("ConsecutiveFailures", result.health.consecutive_failures as f64)?;

        let mut found: BTreeMap<&str, Vec<&DetectedTarget>> = self
            .known_labels
            .iter()
            .map(|label| (label.as_str(), Vec::new()))
            .collect();
        if !result.captured {
            return self.publish_targets(&found);
        }
        for (detector, targets) in result.detections {
            found.entry(self.label(detector)).or_default().extend(targets);
        }

        table.put_number("FPS", result.stats.fps)?;
        table.put_number("AvgFPS", result.stats.avg_fps)?;
        let document = StatsDocument {
            camera: result.camera,
            state: result.state,
            enabled: result.enabled,
            health: result.health,
            stats: result.stats,
        };
        match serde_json::to_string(&document) {
            Ok(json) => table.put_string("Stats", &json)?,
            Err(e) => log::debug!("CameraCallback[{}]: stats document: {}", self.camera, e),
        }

        self.publish_targets(&found)
    }

    fn publish_targets(&self, found: &BTreeMap<&str, Vec<&DetectedTarget>>) -> Result<(), TelemetryError> {
        let table = &self.table;
        for (label, targets) in found {
            table.put_number(&format!("{}Found", label), targets.len() as f64)?;
            for (i, target) in targets.iter().enumerate() {
                let key = |field: &str| format!("{}.{}.{}", label, i, field);
                table.put_number(&key("distance"), target.distance.unwrap_or(MISSING_VALUE))?;
                table.put_number(&key("angle"), target.angle.unwrap_or(MISSING_VALUE))?;
                table.put_number(&key("offset"), target.offset.unwrap_or(MISSING_VALUE))?;
                if let Some(ident) = target.ident {
                    table.put_number(&key("id"), ident as f64)?;
                }
            }
        }
        Ok(())
    }
}

impl FrameSink for CameraCallback {
    fn on_frame(&mut self, result: &FrameResult<'_>) {
        if !self.reachable.poll(false) {
            return;
        }
        let outcome = self.announce_enabled().and_then(|()| self.publish(result));
        match outcome {
            Ok(()) => {
                if self.publish_failing {
                    log::info!("CameraCallback[{}]: publishing again", self.camera);
                    self.publish_failing = false;
                }
            }
            Err(e) => {
                if !self.publish_failing {
                    log::warn!("CameraCallback[{}]: {}", self.camera, e);
                    self.publish_failing = true;
                }
                // Refresh the reachability cache on the next tick.
                self.reachable.poll(true);
                return;
            }
        }
        let enabled = self.table.get_bool("Enabled", true);
        if self.enabled.swap(enabled, Ordering::SeqCst) != enabled {
            log::info!(
                "CameraCallback[{}]: processing {}",
                self.camera,
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }
}
