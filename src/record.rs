//! Diagnostic video recording.
//!
//! One MJPEG stream (concatenated JPEG images) per camera per run, at the
//! capture resolution. Any failure degrades to "no recording"; capture is
//! never interrupted by the recorder.

use std::path::{Path, PathBuf};

use crate::frame::Frame;

/// Where a camera's recording goes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum VideoTarget {
    #[default]
    Disabled,
    /// `<videos_dir>/<camera>_<timestamp>.mjpeg`
    Auto,
    Path(PathBuf),
}

impl VideoTarget {
    pub fn resolve(&self, videos_dir: &Path, camera: &str, timestamp: &str) -> Option<PathBuf> {
        match self {
            VideoTarget::Disabled => None,
            VideoTarget::Auto => Some(videos_dir.join(format!("{}_{}.mjpeg", camera, timestamp))),
            VideoTarget::Path(path) => Some(path.clone()),
        }
    }
}

pub struct VideoRecorder {
    path: PathBuf,
    width: u32,
    height: u32,
    frames: u64,
    mismatch_logged: bool,
    #[cfg(feature = "record-mjpeg")]
    writer: std::io::BufWriter<std::fs::File>,
}

impl VideoRecorder {
    /// Open a recording. Returns `None` (after logging) when recording is not
    /// possible.
    pub fn create(path: &Path, width: u32, height: u32) -> Option<Self> {
        #[cfg(feature = "record-mjpeg")]
        {
            if let Some(parent) = path.parent() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    log::warn!(
                        "VideoRecorder: cannot create {}: {}; recording disabled",
                        parent.display(),
                        err
                    );
                    return None;
                }
            }
            match std::fs::File::create(path) {
                Ok(file) => {
                    log::info!(
                        "VideoRecorder: writing {} ({}x{})",
                        path.display(),
                        width,
                        height
                    );
                    Some(Self {
                        path: path.to_path_buf(),
                        width,
                        height,
                        frames: 0,
                        mismatch_logged: false,
                        writer: std::io::BufWriter::new(file),
                    })
                }
                Err(err) => {
                    log::warn!(
                        "VideoRecorder: cannot open {}: {}; recording disabled",
                        path.display(),
                        err
                    );
                    None
                }
            }
        }
        #[cfg(not(feature = "record-mjpeg"))]
        {
            log::warn!(
                "VideoRecorder: {} ({}x{}) not recorded: built without the record-mjpeg feature",
                path.display(),
                width,
                height
            );
            None
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Append one frame. Frames of the wrong size are skipped.
    pub fn write(&mut self, frame: &Frame) {
        if frame.width != self.width || frame.height != self.height {
            if !self.mismatch_logged {
                self.mismatch_logged = true;
                log::warn!(
                    "VideoRecorder: {} expects {}x{}, got {}x{}; skipping such frames",
                    self.path.display(),
                    self.width,
                    self.height,
                    frame.width,
                    frame.height
                );
            }
            return;
        }
        #[cfg(feature = "record-mjpeg")]
        {
            use image::codecs::jpeg::JpegEncoder;

            let mut encoder = JpegEncoder::new_with_quality(&mut self.writer, 80);
            if let Err(err) = encoder.encode(
                frame.as_bytes(),
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgb8,
            ) {
                log::debug!("VideoRecorder: encode failed: {}", err);
                return;
            }
            self.frames += 1;
        }
    }

    /// Flush and close the recording.
    pub fn finish(self) {
        #[cfg(feature = "record-mjpeg")]
        {
            use std::io::Write;

            let mut writer = self.writer;
            if let Err(err) = writer.flush() {
                log::warn!("VideoRecorder: flush of {} failed: {}", self.path.display(), err);
            }
        }
        log::info!(
            "VideoRecorder: closed {} after {} frames",
            self.path.display(),
            self.frames
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_target_names_file_after_camera_and_run() {
        let path = VideoTarget::Auto.resolve(Path::new("/videos"), "INTAKE", "1700000000");
        assert_eq!(path, Some(PathBuf::from("/videos/INTAKE_1700000000.mjpeg")));
        assert_eq!(VideoTarget::Disabled.resolve(Path::new("/v"), "A", "1"), None);
    }

    #[cfg(feature = "record-mjpeg")]
    #[test]
    fn writes_jpeg_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.mjpeg");
        let mut recorder = VideoRecorder::create(&path, 8, 8).unwrap();
        recorder.write(&Frame::zeroed(8, 8));
        recorder.write(&Frame::zeroed(4, 4));
        assert_eq!(recorder.frames_written(), 1);
        recorder.finish();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[cfg(not(feature = "record-mjpeg"))]
    #[test]
    fn recording_degrades_without_encoder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VideoRecorder::create(&dir.path().join("cam.mjpeg"), 8, 8).is_none());
    }
}
