use super::anchors::{ANCHORS, ANCHORS_PER_SCALE, BOX_CHANNELS, CONFIDENCE_INDEX, STRIDES, per_anchor};
use super::{DecodeContext, DetectionBox, nms};
use crate::tensor::TensorBufferSet;
use common::{span, span_debug};

/// Box confidence a cell must exceed before its classes are scored.
pub const COARSE_CONFIDENCE: f32 = 0.001;

/// Decodes the three per-stride output tensors of an anchor-based detector.
pub struct PostProcessor {
    num_labels: usize,
    grids: usize,
    /// Decoded values for every (cell, anchor), `per_anchor` floats each.
    decoded: Vec<f32>,
    grid_mismatch_reported: bool,
}

impl PostProcessor {
    /// `grids` is the expected total number of (cell, anchor) rows across all
    /// scales. The real count is taken from the output shapes.
    pub fn new(num_labels: usize, grids: usize) -> Self {
        Self {
            num_labels,
            grids,
            decoded: Vec::with_capacity(grids * per_anchor(num_labels)),
            grid_mismatch_reported: false,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Decoded rows from the most recent call.
    pub fn decoded(&self) -> &[f32] {
        &self.decoded
    }

    /// Decode, filter and suppress.
    ///
    /// `output_tensors` names the outputs in stride order (8, 16, 32).
    pub fn decode(
        &mut self,
        outputs: &TensorBufferSet,
        output_tensors: &[String],
        ctx: &DecodeContext,
    ) -> anyhow::Result<Vec<DetectionBox>> {
        let _s = span!("postprocess");

        self.flatten_and_decode(outputs, output_tensors)?;

        let candidates = self.collect_candidates(ctx);
        let candidate_count = candidates.len();

        let mut detections = nms(candidates, ctx.nms_threshold);
        detections.retain(|b| b.width >= ctx.min_box_border || b.height >= ctx.min_box_border);

        if let Some(roi) = ctx.roi.filter(|r| !r.is_empty()) {
            for b in &mut detections {
                b.x += roi.x as f32;
                b.y += roi.y as f32;
            }
        }

        tracing::debug!(
            candidates = candidate_count,
            detections = detections.len(),
            "Decoded detections"
        );

        Ok(detections)
    }

    /// Copy every scale into `decoded` in (scale, row, column, anchor) order,
    /// applying the grid and anchor transform to the first four channels.
    fn flatten_and_decode(
        &mut self,
        outputs: &TensorBufferSet,
        output_tensors: &[String],
    ) -> anyhow::Result<()> {
        let _s = span_debug!("flatten_and_decode");

        if output_tensors.len() != STRIDES.len() {
            anyhow::bail!(
                "Expected {} output tensors, got {}",
                STRIDES.len(),
                output_tensors.len()
            );
        }

        let width = per_anchor(self.num_labels);
        let mut scales = Vec::with_capacity(STRIDES.len());
        let mut rows = 0usize;

        for name in output_tensors {
            let buffer = outputs
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("Missing output tensor '{}'", name))?;
            let dims = buffer.shape().dims();

            if dims.len() != 4 || dims[0] != 1 || dims[3] != ANCHORS_PER_SCALE * width {
                anyhow::bail!(
                    "Output '{}' has shape {}, expected [1, H, W, {}]",
                    name,
                    buffer.shape(),
                    ANCHORS_PER_SCALE * width
                );
            }

            rows += dims[1] * dims[2] * ANCHORS_PER_SCALE;
            scales.push((buffer.data(), dims[1], dims[2]));
        }

        if rows != self.grids && !self.grid_mismatch_reported {
            tracing::warn!(
                configured = self.grids,
                actual = rows,
                "Configured grid count differs from model outputs"
            );
            self.grid_mismatch_reported = true;
        }

        self.decoded.clear();
        self.decoded.reserve(rows * width);

        for (scale, &(data, height, grid_width)) in scales.iter().enumerate() {
            let stride = STRIDES[scale];
            let mut src = data.chunks_exact(width);

            for gy in 0..height {
                for gx in 0..grid_width {
                    for &(anchor_w, anchor_h) in &ANCHORS[scale] {
                        let Some(raw) = src.next() else {
                            anyhow::bail!("Output tensor shorter than its shape");
                        };
                        self.decoded.extend_from_slice(&[
                            (raw[0] * 2.0 - 0.5 + gx as f32) * stride,
                            (raw[1] * 2.0 - 0.5 + gy as f32) * stride,
                            raw[2] * raw[2] * 4.0 * anchor_w,
                            raw[3] * raw[3] * 4.0 * anchor_h,
                        ]);
                        self.decoded.extend_from_slice(&raw[CONFIDENCE_INDEX..]);
                    }
                }
            }
        }

        Ok(())
    }

    /// Score every decoded row and map survivors back to source coordinates.
    fn collect_candidates(&self, ctx: &DecodeContext) -> Vec<DetectionBox> {
        let _s = span_debug!("collect_candidates");
        let transform = &ctx.transform;
        let mut candidates = Vec::new();

        for row in self.decoded.chunks_exact(per_anchor(self.num_labels)) {
            let box_confidence = row[CONFIDENCE_INDEX];
            if box_confidence <= COARSE_CONFIDENCE {
                continue;
            }

            let Some((label, class_score)) = argmax(&row[BOX_CHANNELS..]) else {
                continue;
            };

            let score = box_confidence * class_score;
            if score <= ctx.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let x = (cx - w / 2.0).max(0.0) - transform.offset_x as f32;
            let y = (cy - h / 2.0).max(0.0) - transform.offset_y as f32;

            candidates.push(DetectionBox {
                x: x / transform.scale,
                y: y / transform.scale,
                width: w / transform.scale,
                height: h / transform.scale,
                confidence: score,
                label,
                processing_time: ctx.processing_time,
            });
        }

        candidates
    }
}

/// Index and value of the first maximum.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let (&first, rest) = scores.split_first()?;
    let mut best = (0, first);
    for (i, &s) in rest.iter().enumerate() {
        if s > best.1 {
            best = (i + 1, s);
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{NamedBuffer, TensorShape};
    use preprocess::{LetterboxTransform, Roi};

    const LABELS: usize = 4;
    const WIDTH: usize = BOX_CHANNELS + LABELS;
    /// 64x64 input: grids of 8x8, 4x4 and 2x2
    const SIDES: [usize; 3] = [8, 4, 2];

    fn names() -> Vec<String> {
        vec!["p3".to_string(), "p4".to_string(), "p5".to_string()]
    }

    fn empty_outputs() -> TensorBufferSet {
        let mut set = TensorBufferSet::new();
        for (name, side) in names().into_iter().zip(SIDES) {
            set.insert(NamedBuffer::zeroed(
                name,
                TensorShape::new(vec![1, side, side, ANCHORS_PER_SCALE * WIDTH]),
            ));
        }
        set
    }

    /// Write one anchor's raw values at (scale, gy, gx, anchor)
    fn set_anchor(
        outputs: &mut TensorBufferSet,
        scale: usize,
        gy: usize,
        gx: usize,
        anchor: usize,
        values: &[f32],
    ) {
        let side = SIDES[scale];
        let name = names()[scale].clone();
        let start = ((gy * side + gx) * ANCHORS_PER_SCALE + anchor) * WIDTH;
        outputs.get_mut(&name).unwrap().data_mut()[start..start + values.len()]
            .copy_from_slice(values);
    }

    fn processor() -> PostProcessor {
        PostProcessor::new(LABELS, (64 + 16 + 4) * 3)
    }

    /// Test the anchor arithmetic on one known cell
    #[test]
    fn test_decode_single_cell() {
        let mut outputs = empty_outputs();
        // stride 16, grid (2, 2), anchor 0 -> (30, 61)
        set_anchor(&mut outputs, 1, 2, 2, 0, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.0, 0.0, 0.0, 0.9]);

        let mut post = processor();
        let boxes = post
            .decode(&outputs, &names(), &DecodeContext::default())
            .unwrap();

        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        // cx = cy = (0.5*2 - 0.5 + 2) * 16 = 40, w = 30, h = 61
        assert!((b.x - 25.0).abs() < 1e-4, "x = 40 - 15, got {}", b.x);
        assert!((b.y - 9.5).abs() < 1e-4, "y = 40 - 30.5, got {}", b.y);
        assert!((b.width - 30.0).abs() < 1e-4);
        assert!((b.height - 61.0).abs() < 1e-4);
        assert_eq!(b.label, 3);
        assert!((b.confidence - 0.81).abs() < 1e-6);
    }

    /// Test the flattened array follows scale, row, column, anchor order
    #[test]
    fn test_flatten_order() {
        let mut outputs = empty_outputs();
        // First row of the stride-32 block is scale 2, cell (0, 0), anchor 0
        set_anchor(&mut outputs, 2, 0, 0, 0, &[0.0, 0.0, 0.0, 0.0, 0.42]);
        // Last row overall is scale 2, cell (1, 1), anchor 2
        set_anchor(&mut outputs, 2, 1, 1, 2, &[0.0, 0.0, 0.0, 0.0, 0.77]);

        let mut post = processor();
        post.flatten_and_decode(&outputs, &names()).unwrap();

        let rows: Vec<&[f32]> = post.decoded().chunks_exact(WIDTH).collect();
        assert_eq!(rows.len(), (64 + 16 + 4) * 3);
        assert_eq!(rows[(64 + 16) * 3][CONFIDENCE_INDEX], 0.42);
        assert_eq!(rows[rows.len() - 1][CONFIDENCE_INDEX], 0.77);
        // Last row: gx = gy = 1 at stride 32 with raw 0 -> (0 - 0.5 + 1) * 32
        assert_eq!(rows[rows.len() - 1][0], 16.0);
    }

    /// Test cells at or below the coarse epsilon never produce boxes
    #[test]
    fn test_coarse_filter() {
        let mut outputs = empty_outputs();
        set_anchor(&mut outputs, 0, 3, 3, 1, &[0.5, 0.5, 1.0, 1.0, 0.0005, 1.0, 1.0, 1.0, 1.0]);

        let ctx = DecodeContext {
            confidence_threshold: 0.0,
            ..DecodeContext::default()
        };
        let boxes = processor().decode(&outputs, &names(), &ctx).unwrap();
        assert!(boxes.is_empty(), "Sub-epsilon confidence must be dropped");
    }

    /// Test the score threshold is strict
    #[test]
    fn test_confidence_threshold_is_strict() {
        let mut outputs = empty_outputs();
        set_anchor(&mut outputs, 1, 1, 1, 0, &[0.5, 0.5, 0.5, 0.5, 1.0, 0.5]);

        let ctx = DecodeContext {
            confidence_threshold: 0.5,
            ..DecodeContext::default()
        };
        assert!(processor().decode(&outputs, &names(), &ctx).unwrap().is_empty());

        let ctx = DecodeContext {
            confidence_threshold: 0.49,
            ..DecodeContext::default()
        };
        assert_eq!(processor().decode(&outputs, &names(), &ctx).unwrap().len(), 1);
    }

    /// Test raw values are decoded without any activation
    #[test]
    fn test_no_activation_applied() {
        let mut outputs = empty_outputs();
        // Raw confidence and class score above 1 pass through unchanged
        set_anchor(&mut outputs, 1, 0, 0, 0, &[0.5, 0.5, 1.5, 1.5, 2.0, 0.0, 3.0]);

        let boxes = processor()
            .decode(&outputs, &names(), &DecodeContext::default())
            .unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].confidence, 6.0, "Score should be raw conf * raw class");
        // w = 1.5^2 * 4 * 30 = 270
        assert!((boxes[0].width - 270.0).abs() < 1e-3);
    }

    /// Test the first maximal class wins ties
    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(argmax(&[]), None);
    }

    /// Test letterbox offsets and scale are inverted
    #[test]
    fn test_letterbox_inverse_mapping() {
        let mut outputs = empty_outputs();
        set_anchor(&mut outputs, 1, 2, 2, 0, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.9]);

        let ctx = DecodeContext {
            transform: LetterboxTransform {
                scale: 0.5,
                offset_x: 5,
                offset_y: 4,
            },
            min_box_border: 0.0,
            ..DecodeContext::default()
        };
        let boxes = processor().decode(&outputs, &names(), &ctx).unwrap();

        let b = boxes[0];
        assert!((b.x - (25.0 - 5.0) / 0.5).abs() < 1e-4);
        assert!((b.y - (9.5 - 4.0) / 0.5).abs() < 1e-4);
        assert!((b.width - 60.0).abs() < 1e-4);
        assert!((b.height - 122.0).abs() < 1e-4);
    }

    /// Test negative top-left corners clamp to zero before the offset
    #[test]
    fn test_top_left_clamped_before_offset() {
        let mut outputs = empty_outputs();
        // stride 8, grid (0, 0), anchor 2 (33, 23): cx = cy = 4, w = 33, h = 23
        set_anchor(&mut outputs, 0, 0, 0, 2, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.9]);

        let ctx = DecodeContext {
            transform: LetterboxTransform {
                scale: 1.0,
                offset_x: 3,
                offset_y: 0,
            },
            ..DecodeContext::default()
        };
        let boxes = processor().decode(&outputs, &names(), &ctx).unwrap();

        assert_eq!(boxes[0].x, -3.0, "max(0, 4 - 16.5) - 3");
        assert_eq!(boxes[0].y, 0.0);
    }

    /// Test boxes smaller than the minimum border in both axes are dropped
    #[test]
    fn test_min_box_border() {
        let mut outputs = empty_outputs();
        // anchor (10, 13) with raw 0.5 -> 10x13, below 16 on both axes
        set_anchor(&mut outputs, 0, 1, 1, 0, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.9]);
        // anchor (16, 30) -> 16x30, kept
        set_anchor(&mut outputs, 0, 6, 6, 1, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.8]);

        let boxes = processor()
            .decode(&outputs, &names(), &DecodeContext::default())
            .unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].width, 16.0);
    }

    /// Test the ROI origin is added to every surviving box
    #[test]
    fn test_roi_offset() {
        let mut outputs = empty_outputs();
        set_anchor(&mut outputs, 1, 2, 2, 0, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.9]);

        let ctx = DecodeContext {
            roi: Some(Roi::new(100, 50, 200, 200)),
            ..DecodeContext::default()
        };
        let boxes = processor().decode(&outputs, &names(), &ctx).unwrap();

        assert!((boxes[0].x - 125.0).abs() < 1e-4);
        assert!((boxes[0].y - 59.5).abs() < 1e-4);
    }

    /// Test wrong output count and shapes are reported as errors
    #[test]
    fn test_invalid_outputs() {
        let outputs = empty_outputs();
        let mut post = processor();

        let two = vec!["p3".to_string(), "p4".to_string()];
        assert!(post.decode(&outputs, &two, &DecodeContext::default()).is_err());

        let missing = vec!["p3".to_string(), "p4".to_string(), "p6".to_string()];
        assert!(post.decode(&outputs, &missing, &DecodeContext::default()).is_err());

        let mut wrong = TensorBufferSet::new();
        for name in names() {
            wrong.insert(NamedBuffer::zeroed(name, TensorShape::new(vec![1, 2, 2, 7])));
        }
        let err = post
            .decode(&wrong, &names(), &DecodeContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("expected [1, H, W, 27]"));
    }

    /// Test the processing time is stamped on every box
    #[test]
    fn test_processing_time_propagated() {
        let mut outputs = empty_outputs();
        set_anchor(&mut outputs, 1, 2, 2, 0, &[0.5, 0.5, 0.5, 0.5, 0.9, 0.9]);

        let ctx = DecodeContext {
            processing_time: std::time::Duration::from_millis(12),
            ..DecodeContext::default()
        };
        let boxes = processor().decode(&outputs, &names(), &ctx).unwrap();
        assert_eq!(boxes[0].processing_time.as_millis(), 12);
    }
}
