use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::detect::DetectedTarget;
use crate::frame::Frame;
use crate::ingest::{CameraHealth, CameraState};
use crate::stats::StatsSnapshot;

/// Latest complete view of one camera, for display and status readers.
#[derive(Clone, Debug, Serialize)]
pub struct CameraSnapshot {
    pub camera: String,
    pub state: CameraState,
    pub enabled: bool,
    pub health: CameraHealth,
    pub stats: StatsSnapshot,
    pub ticks: u64,
    pub detections: BTreeMap<String, Vec<DetectedTarget>>,
    #[serde(skip)]
    pub frame: Arc<Frame>,
}

impl CameraSnapshot {
    pub fn empty(camera: &str, width: u32, height: u32) -> Self {
        Self {
            camera: camera.to_string(),
            state: CameraState::Unopened,
            enabled: true,
            health: CameraHealth::default(),
            stats: StatsSnapshot::default(),
            ticks: 0,
            detections: BTreeMap::new(),
            frame: Arc::new(Frame::zeroed(width, height)),
        }
    }
}

/// Single-slot publish cell.
///
/// The writer swaps in a whole new `Arc`; readers clone the current `Arc`.
/// A reader sees either the previous or the new snapshot and never a partial
/// one. This is not lock-free: the mutex is held only for the pointer swap or
/// the `Arc` clone, so contention stalls either side for that long at most.
/// The replaced snapshot is dropped after the lock is released.
pub struct SnapshotCell {
    slot: Mutex<Arc<CameraSnapshot>>,
}

impl SnapshotCell {
    pub fn new(initial: CameraSnapshot) -> Self {
        Self {
            slot: Mutex::new(Arc::new(initial)),
        }
    }

    pub fn publish(&self, snapshot: CameraSnapshot) {
        let snapshot = Arc::new(snapshot);
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, snapshot)
        };
        drop(previous);
    }

    pub fn load(&self) -> Arc<CameraSnapshot> {
        Arc::clone(&self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_the_snapshot_they_loaded() {
        let cell = SnapshotCell::new(CameraSnapshot::empty("FRONT", 4, 4));
        let before = cell.load();
        let mut next = CameraSnapshot::empty("FRONT", 4, 4);
        next.ticks = 9;
        cell.publish(next);
        assert_eq!(before.ticks, 0);
        assert_eq!(cell.load().ticks, 9);
    }

    #[test]
    fn concurrent_reader_sees_only_complete_snapshots() {
        let cell = Arc::new(SnapshotCell::new(CameraSnapshot::empty("FRONT", 4, 4)));
        let reader = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1000 {
                    let seen = cell.load();
                    assert!(seen.ticks >= last);
                    assert_eq!(seen.stats.frames, seen.ticks);
                    last = seen.ticks;
                }
            })
        };
        for tick in 1..=1000 {
            let mut next = CameraSnapshot::empty("FRONT", 4, 4);
            next.ticks = tick;
            next.stats.frames = tick;
            cell.publish(next);
        }
        reader.join().unwrap();
        assert_eq!(cell.load().ticks, 1000);
    }

    #[test]
    fn snapshot_serializes_without_pixels() {
        let snapshot = CameraSnapshot::empty("FRONT", 4, 4);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["camera"], "FRONT");
        assert_eq!(json["state"], "Unopened");
        assert!(json.get("frame").is_none());
    }
}
