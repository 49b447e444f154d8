use super::DetectionBox;

/// Intersection over union with inclusive pixel edges, so touching boxes
/// still overlap by one pixel.
pub fn iou(a: &DetectionBox, b: &DetectionBox) -> f32 {
    let x_overlap = (a.right().min(b.right()) - a.x.max(b.x) + 1.0).max(0.0);
    let y_overlap = (a.bottom().min(b.bottom()) - a.y.max(b.y) + 1.0).max(0.0);
    let intersection = x_overlap * y_overlap;
    let union = (a.width + 1.0) * (a.height + 1.0) + (b.width + 1.0) * (b.height + 1.0)
        - intersection;

    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Class-agnostic greedy suppression.
///
/// Boxes are stable-sorted by confidence, highest first. A box is dropped when
/// its IoU with an earlier surviving box exceeds `threshold`.
pub fn nms(mut boxes: Vec<DetectionBox>, threshold: f32) -> Vec<DetectionBox> {
    if boxes.is_empty() {
        return boxes;
    }

    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; boxes.len()];
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        for j in i + 1..boxes.len() {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > threshold {
                suppressed[j] = true;
            }
        }
    }

    boxes
        .into_iter()
        .zip(suppressed)
        .filter_map(|(b, s)| (!s).then_some(b))
        .collect()
}
