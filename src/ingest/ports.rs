//! Physical USB port to V4L2 device resolution.
//!
//! Cameras are configured by the port they are plugged into rather than by
//! `/dev/videoN`, since device numbering changes across boots. Ports are
//! numbered 0..=3 and mapped to the sysfs topology of the Raspberry Pi 4 and
//! Pi 5 USB controllers.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ConfigStore;

/// Hub port on the Pi 4 for each logical port.
const PI4_HUB_PORT: [u32; 4] = [2, 1, 4, 3];
/// Controller slot on the Pi 5 for each logical port. Its own inverse.
const PI5_SLOT: [u32; 4] = [0, 1, 3, 2];

fn pi4_dir(root: &Path, port: u32) -> Option<PathBuf> {
    let hub = PI4_HUB_PORT.get(port as usize)?;
    Some(root.join(format!(
        "devices/platform/scb/fd500000.pcie/pci0000:00/0000:00:00.0/0000:01:00.0/usb1/1-1/1-1.{hub}/1-1.{hub}:1.0/video4linux"
    )))
}

fn pi5_dir(root: &Path, port: u32) -> Option<PathBuf> {
    let slot = PI5_SLOT.get(port as usize)?;
    let controller = slot % 2;
    let bus = controller * 2 + 1;
    let socket = slot / 2 + 1;
    Some(root.join(format!(
        "devices/platform/axi/1000120000.pcie/1f00{}00000.usb/xhci-hcd.{controller}/usb{bus}/{bus}-{socket}/{bus}-{socket}:1.0/video4linux",
        controller + 2
    )))
}

/// Lowest `videoN` index under a `video4linux` directory.
fn lowest_video_index(dir: &Path) -> Option<u32> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix("video")?
                .parse::<u32>()
                .ok()
        })
        .min()
}

/// Resolve a logical port to a V4L2 device index using the live sysfs tree.
pub fn find_device_index(port: u32) -> Option<u32> {
    find_device_index_in(Path::new("/sys"), port)
}

/// Resolve a logical port under an arbitrary sysfs root.
///
/// The Pi 4 layout is tried first, then the Pi 5 layout.
pub fn find_device_index_in(root: &Path, port: u32) -> Option<u32> {
    [pi4_dir(root, port), pi5_dir(root, port)]
        .into_iter()
        .flatten()
        .find_map(|dir| lowest_video_index(&dir))
}

fn pi4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^/devices/platform/scb/fd500000\.pcie/pci0000:00/0000:00:00\.0/0000:01:00\.0/usb1/1-1/1-1\.(\d)/1-1\.(\d):1\.0.*$",
        )
        .unwrap()
    })
}

fn pi5_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^/devices/platform/axi/1000120000\.pcie/1f00(\d)00000\.usb/xhci-hcd\.(\d)/usb(\d)/(\d)-(\d)/(\d)-(\d):1\.0.*$",
        )
        .unwrap()
    })
}

fn digit(caps: &regex::Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

/// Logical port of a udev `DEVPATH` (relative to `/sys`), if it sits on a
/// known controller layout.
pub fn port_from_devpath(devpath: &str) -> Option<u32> {
    if let Some(caps) = pi4_re().captures(devpath) {
        let hub = digit(&caps, 1)?;
        if digit(&caps, 2)? != hub {
            return None;
        }
        return PI4_HUB_PORT.iter().position(|&h| h == hub).map(|p| p as u32);
    }
    let caps = pi5_re().captures(devpath)?;
    let [n1, controller, bus, bus_a, socket, bus_b, socket_b] =
        [1, 2, 3, 4, 5, 6, 7].map(|i| digit(&caps, i));
    let (n1, controller, bus, socket) = (n1?, controller?, bus?, socket?);
    if bus_a? != bus || bus_b? != bus || socket_b? != socket {
        return None;
    }
    if n1 != controller + 2 || bus != controller * 2 + 1 || socket == 0 {
        return None;
    }
    let slot = controller + (socket - 1) * 2;
    PI5_SLOT.get(slot as usize).copied()
}

/// Name of the configured camera that a hot-plugged device belongs to.
///
/// A camera whose `PORT` matches the device's port wins; otherwise the first
/// camera whose `DEVPATH` pattern matches the whole path.
pub fn camera_name_from_devpath(devpath: &str, cameras: &ConfigStore) -> Option<String> {
    if let Some(port) = port_from_devpath(devpath) {
        let by_port = cameras.sections().find(|name| {
            cameras
                .get_own(name, "PORT")
                .and_then(|p| p.trim().parse::<u32>().ok())
                == Some(port)
        });
        if let Some(name) = by_port {
            return Some(name.to_string());
        }
    }

    cameras
        .sections()
        .find(|name| {
            cameras
                .get_own(name, "DEVPATH")
                .is_some_and(|pattern| match Regex::new(&format!("^(?:{})$", pattern)) {
                    Ok(re) => re.is_match(devpath),
                    Err(err) => {
                        log::warn!("camera {}: bad DEVPATH pattern: {}", name, err);
                        false
                    }
                })
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(dir: PathBuf, names: &[&str]) {
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn pi4_port_picks_lowest_video_node() {
        let root = tempfile::tempdir().unwrap();
        plant(pi4_dir(root.path(), 0).unwrap(), &["video3", "video2", "videoX"]);
        assert_eq!(find_device_index_in(root.path(), 0), Some(2));
        assert_eq!(find_device_index_in(root.path(), 1), None);
    }

    #[test]
    fn pi5_layout_is_fallback() {
        let root = tempfile::tempdir().unwrap();
        plant(pi5_dir(root.path(), 2).unwrap(), &["video4"]);
        assert_eq!(find_device_index_in(root.path(), 2), Some(4));
    }

    #[test]
    fn out_of_range_port_resolves_nothing() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(find_device_index_in(root.path(), 7), None);
    }

    #[test]
    fn devpath_round_trips_every_port() {
        let sys = Path::new("/sys");
        for port in 0..4 {
            for dir in [pi4_dir(sys, port).unwrap(), pi5_dir(sys, port).unwrap()] {
                let devpath = dir.strip_prefix(sys).unwrap().to_str().unwrap();
                let devpath = format!("/{}/video0", devpath);
                assert_eq!(port_from_devpath(&devpath), Some(port), "{}", devpath);
            }
        }
    }

    #[test]
    fn inconsistent_hub_numbers_are_ignored() {
        let path = "/devices/platform/scb/fd500000.pcie/pci0000:00/0000:00:00.0/0000:01:00.0/usb1/1-1/1-1.2/1-1.3:1.0/video4linux/video0";
        assert_eq!(port_from_devpath(path), None);
    }

    #[test]
    fn camera_name_by_port_then_devpath() {
        let cfg = ConfigStore::from_text(
            "TYPE=USB\nFRONT:\nPORT=1\nBACK:\nDEVPATH=/devices/virtual/.*\n",
        );
        let front = "/devices/platform/scb/fd500000.pcie/pci0000:00/0000:00:00.0/0000:01:00.0/usb1/1-1/1-1.1/1-1.1:1.0/video4linux/video0";
        assert_eq!(camera_name_from_devpath(front, &cfg).as_deref(), Some("FRONT"));
        assert_eq!(
            camera_name_from_devpath("/devices/virtual/video9", &cfg).as_deref(),
            Some("BACK")
        );
        assert_eq!(camera_name_from_devpath("/devices/other", &cfg), None);
    }
}
