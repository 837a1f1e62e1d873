//! cam_ports - show which video device sits on which USB port.
//!
//! Prints `port: index` for every port with a camera attached. With
//! `--devpath` it also reports which configured camera that kernel device
//! path belongs to (for udev rules).

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use robot_vision::ingest::ports::{
    camera_name_from_devpath, find_device_index_in, port_from_devpath,
};
use robot_vision::ConfigStore;

const PORT_COUNT: u32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "List USB camera ports and their video device indices")]
struct Args {
    /// Sysfs root to inspect.
    #[arg(long, env = "VISION_SYSFS_ROOT", default_value = "/sys")]
    sysfs_root: PathBuf,

    /// Kernel devpath to resolve to a camera name.
    #[arg(long)]
    devpath: Option<String>,

    /// Camera settings used to resolve `--devpath`.
    #[arg(long, env = "VISION_CAMERA_FILE")]
    camera_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    for port in 0..PORT_COUNT {
        if let Some(index) = find_device_index_in(&args.sysfs_root, port) {
            println!("{}: {}", port, index);
        }
    }

    let Some(devpath) = args.devpath.as_deref() else {
        return Ok(());
    };
    match port_from_devpath(devpath) {
        Some(port) => println!("{} is on port {}", devpath, port),
        None => println!("{} is not on a known port", devpath),
    }
    if let Some(path) = &args.camera_file {
        let mut cameras = ConfigStore::new();
        cameras.load_file(path, false)?;
        let name = camera_name_from_devpath(devpath, &cameras)
            .ok_or_else(|| anyhow!("no camera in {} matches {}", path.display(), devpath))?;
        println!("{}", name);
    }
    Ok(())
}
