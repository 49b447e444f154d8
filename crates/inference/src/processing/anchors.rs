/// Downsampling factor of each output scale, in output-tensor order.
pub const STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

/// Anchors per scale.
pub const ANCHORS_PER_SCALE: usize = 3;

/// Anchor (width, height) priors in input pixels, one row per stride.
pub const ANCHORS: [[(f32, f32); ANCHORS_PER_SCALE]; 3] = [
    [(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)],
    [(30.0, 61.0), (62.0, 45.0), (59.0, 119.0)],
    [(116.0, 90.0), (156.0, 198.0), (373.0, 326.0)],
];

/// Box geometry (4) plus box confidence (1) ahead of the class scores.
pub const BOX_CHANNELS: usize = 5;

/// Index of the box confidence within one anchor's values.
pub const CONFIDENCE_INDEX: usize = 4;

/// Values emitted per anchor for a model with `num_labels` classes.
pub const fn per_anchor(num_labels: usize) -> usize {
    BOX_CHANNELS + num_labels
}

/// Total anchor-grid cells for a square `input` size.
pub fn grid_cells(input: usize) -> usize {
    STRIDES
        .iter()
        .map(|&s| {
            let side = input / s as usize;
            side * side * ANCHORS_PER_SCALE
        })
        .sum()
}
