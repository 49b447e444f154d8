use crate::processing::DetectionBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw each box outline onto `image`. Edges outside the image are not drawn.
pub fn draw_detections(image: &mut RgbImage, detections: &[DetectionBox], thickness: u32) {
    for detection in detections {
        draw_box(image, detection, thickness);
    }
}

fn draw_box(image: &mut RgbImage, detection: &DetectionBox, thickness: u32) {
    let (width, height) = (i64::from(image.width()), i64::from(image.height()));
    let margin = i64::from(thickness) + 1;

    // Bound to just outside the image; edges past the margin are never visible
    let left = (detection.x.round() as i64).max(-margin);
    let top = (detection.y.round() as i64).max(-margin);
    let right = (detection.right().round() as i64).min(width + margin);
    let bottom = (detection.bottom().round() as i64).min(height + margin);

    if right <= left || bottom <= top {
        return;
    }
    if right <= 0 || bottom <= 0 || left >= width || top >= height {
        return;
    }

    for inset in 0..i64::from(thickness) {
        let rect_width = right - left - 2 * inset;
        let rect_height = bottom - top - 2 * inset;
        if rect_width <= 0 || rect_height <= 0 {
            break;
        }
        let rect = Rect::at((left + inset) as i32, (top + inset) as i32)
            .of_size(rect_width as u32, rect_height as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
