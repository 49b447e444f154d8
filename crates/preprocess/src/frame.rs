use crate::config::RGB_CHANNELS;
use std::fmt;
use thiserror::Error;

/// Channel order of interleaved 3-channel pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgb,
    Bgr,
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorFormat::Rgb => write!(f, "RGB"),
            ColorFormat::Bgr => write!(f, "BGR"),
        }
    }
}

/// Rectangle restricting detection to a sub-image. Coordinates are in pixels
/// of the full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A zero-area ROI means "no ROI".
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty frame: {width}x{height}")]
    Empty { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected}, got {actual} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Unsupported color format: {0} (expected RGB)")]
    UnsupportedFormat(ColorFormat),

    #[error("ROI {roi} exceeds frame bounds {width}x{height}")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },
}

/// Borrowed view of one decoded image in HWC layout.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
    format: ColorFormat,
}

impl<'a> Frame<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32, format: ColorFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
        }
    }

    pub fn rgb(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self::new(pixels, width, height, ColorFormat::Rgb)
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    /// Reject frames the pipeline cannot consume.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 || self.pixels.is_empty() {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }

        if self.format != ColorFormat::Rgb {
            return Err(FrameError::UnsupportedFormat(self.format));
        }

        let expected = self.width as usize * self.height as usize * RGB_CHANNELS;
        if self.pixels.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: self.pixels.len(),
            });
        }

        Ok(())
    }

    /// Copy the ROI rows into `scratch` and return a frame over them.
    ///
    /// `scratch` is reused across calls so steady-state cropping does not allocate.
    pub fn crop<'b>(&self, roi: &Roi, scratch: &'b mut Vec<u8>) -> Result<Frame<'b>, FrameError> {
        self.validate()?;

        if roi.is_empty() || !roi.fits_within(self.width, self.height) {
            return Err(FrameError::RoiOutOfBounds {
                roi: *roi,
                width: self.width,
                height: self.height,
            });
        }

        let src_stride = self.width as usize * RGB_CHANNELS;
        let row_bytes = roi.width as usize * RGB_CHANNELS;
        let col_start = roi.x as usize * RGB_CHANNELS;

        scratch.clear();
        scratch.reserve(row_bytes * roi.height as usize);

        for y in roi.y..roi.y + roi.height {
            let start = y as usize * src_stride + col_start;
            scratch.extend_from_slice(&self.pixels[start..start + row_bytes]);
        }

        Ok(Frame::new(scratch, roi.width, roi.height, self.format))
    }
}
