pub mod anchors;
pub mod nms;
pub mod post;

use preprocess::{LetterboxTransform, Roi};
use std::time::Duration;

pub use nms::{iou, nms};
pub use post::PostProcessor;

/// Default minimum width or height, in pixels, for a box to be reported.
pub const DEFAULT_MIN_BOX_BORDER: f32 = 16.0;

/// One detected object in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Box confidence times the winning class score
    pub confidence: f32,
    /// Class index
    pub label: usize,
    /// Duration of the forward pass that produced this box
    pub processing_time: Duration,
}

impl DetectionBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Per-call parameters for turning raw outputs into [`DetectionBox`]es.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub transform: LetterboxTransform,
    pub roi: Option<Roi>,
    pub processing_time: Duration,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub min_box_border: f32,
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self {
            transform: LetterboxTransform::identity(),
            roi: None,
            processing_time: Duration::ZERO,
            confidence_threshold: 0.5,
            nms_threshold: 0.5,
            min_box_border: DEFAULT_MIN_BOX_BORDER,
        }
    }
}
