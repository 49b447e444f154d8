pub mod config;
pub mod frame;
pub mod letterbox;

pub use config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR};
pub use frame::{ColorFormat, Frame, FrameError, Roi};
pub use letterbox::LetterboxPreProcessor;

/// Inverse-mapping bookkeeping for one letterbox call.
///
/// A point `(x, y)` in the (possibly cropped) source image lands at
/// `(x * scale + offset_x, y * scale + offset_y)` in the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    /// Uniform scale factor applied to the source image
    pub scale: f32,
    /// Horizontal padding on the left edge (in pixels)
    pub offset_x: u32,
    /// Vertical padding on the top edge (in pixels)
    pub offset_y: u32,
}

impl LetterboxTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0,
            offset_y: 0,
        }
    }

    /// Map a source-image point into model-input coordinates.
    pub fn to_letterboxed(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.offset_x as f32,
            y * self.scale + self.offset_y as f32,
        )
    }

    /// Map a model-input point back to source-image coordinates.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

impl Default for LetterboxTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Preprocess a frame directly into a packed model input buffer
    ///
    /// # Arguments
    /// * `frame` - RGB frame in HWC layout
    /// * `input` - Destination buffer, `height * width * 3` floats in HWC layout
    ///
    /// # Returns
    /// The transform needed to map model coordinates back onto `frame`
    fn preprocess(
        &mut self,
        frame: &Frame<'_>,
        input: &mut [f32],
    ) -> anyhow::Result<LetterboxTransform>;

    /// Get the input size this preprocessor targets as (width, height)
    fn input_size(&self) -> (u32, u32);
}
