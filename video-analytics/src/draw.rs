//! Overlay drawing on BGR frames for the preview path.

use director_types::BgrFrame;

pub const GREEN: [u8; 3] = [0, 255, 0];
pub const RED: [u8; 3] = [0, 0, 255];

/// Draw an axis-aligned rectangle outline, clamped to the frame.
pub fn draw_rect(
    frame: &mut BgrFrame,
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
    color: [u8; 3],
    thickness: u32,
) {
    let x1 = x1.min(frame.width.saturating_sub(1));
    let y1 = y1.min(frame.height.saturating_sub(1));
    let x2 = x2.min(frame.width);
    let y2 = y2.min(frame.height);
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    for t in 0..thickness {
        // horizontal edges
        for x in x1..x2 {
            if y1 + t < frame.height {
                frame.set_pixel(x, y1 + t, color);
            }
            if y2 > t + 1 {
                frame.set_pixel(x, y2 - t - 1, color);
            }
        }
        // vertical edges
        for y in y1..y2 {
            if x1 + t < frame.width {
                frame.set_pixel(x1 + t, y, color);
            }
            if x2 > t + 1 {
                frame.set_pixel(x2 - t - 1, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_outline_is_drawn_and_clamped() {
        let mut frame = BgrFrame::new(32, 32);
        draw_rect(&mut frame, 4, 4, 28, 28, GREEN, 1);
        assert_eq!(frame.pixel(4, 4), GREEN);
        assert_eq!(frame.pixel(27, 27), GREEN);
        assert_eq!(frame.pixel(16, 16), [0, 0, 0]);

        // out-of-frame coordinates do not panic
        draw_rect(&mut frame, 20, 20, 64, 64, RED, 2);
        assert_eq!(frame.pixel(31, 20), RED);
    }
}
