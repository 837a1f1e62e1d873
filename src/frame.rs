//! Frame buffers.
//!
//! A `Frame` is a packed RGB8 image, `width * height * 3` bytes, row-major.
//! Cameras keep one frame alive at all times (zeroed before the first
//! successful capture) so readers never observe a missing image.

/// Bytes per pixel.
pub const CHANNELS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// All-zero (black) frame.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0])
    }

    /// Frame with every pixel set to `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let len = Self::byte_len(width, height);
        let mut data = Vec::with_capacity(len);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap an existing buffer. Returns `None` when the length does not match.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_len(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * CHANNELS
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// Fill an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for row in y..y_end {
            for col in x..x_end {
                self.set_pixel(col, row, rgb);
            }
        }
    }

    /// Paint the bottom `rows` rows black (masks robot bumpers out of view).
    pub fn black_out_bottom(&mut self, rows: u32) {
        let rows = rows.min(self.height);
        if rows == 0 {
            return;
        }
        let start = (self.height - rows) as usize * self.width as usize * CHANNELS;
        self.data[start..].fill(0);
    }

    /// Overwrite this frame's pixels with `other`'s when the sizes match.
    pub fn copy_from(&mut self, other: &Frame) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.data.copy_from_slice(&other.data);
        true
    }

    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}
