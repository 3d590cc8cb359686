//! Label stamping for crops.

use image::RgbImage;
use rusttype::{point, Font, Scale};

// Pixel height of the label text per unit of font scale.
const SCALE_TO_PX: f32 = 22.0;
const PAD: u32 = 2;

/// Draw `text` in white on a black band anchored at the top-left corner.
pub(crate) fn label_top_left(image: &mut RgbImage, font: &Font<'_>, text: &str, font_scale: f32) {
    let scale = Scale::uniform(font_scale * SCALE_TO_PX);
    let v_metrics = font.v_metrics(scale);

    let x0 = PAD as f32;
    let y0 = PAD as f32;
    let glyphs: Vec<_> = font
        .layout(text, scale, point(x0, y0 + v_metrics.ascent))
        .collect();

    let text_width = glyphs
        .iter()
        .rev()
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .next()
        .unwrap_or(0.0)
        .ceil() as u32;
    let band_w = (text_width + 2 * PAD).min(image.width());
    let band_h = ((v_metrics.ascent - v_metrics.descent).ceil() as u32 + 2 * PAD).min(image.height());

    for y in 0..band_h {
        for x in 0..band_w {
            image.put_pixel(x, y, image::Rgb([0, 0, 0]));
        }
    }

    let (img_w, img_h) = (image.width() as i32, image.height() as i32);
    for glyph in glyphs {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                let x = gx as i32 + bb.min.x;
                let y = gy as i32 + bb.min.y;
                if x < 0 || y < 0 || x >= img_w || y >= img_h {
                    return;
                }
                let value = (coverage * 255.0).round() as u8;
                let px = image.get_pixel_mut(x as u32, y as u32);
                // blend over the black band
                px.0 = [
                    px.0[0].max(value),
                    px.0[1].max(value),
                    px.0[2].max(value),
                ];
            });
        }
    }
}
