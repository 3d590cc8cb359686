//! Grayscale image kernels for the motion detector.
//!
//! All operations work on tightly packed single-channel buffers.

use director_types::BgrFrame;

use crate::MotionRegion;

const BLUR_KERNEL_SIZE: usize = 21;
const DILATE_RADIUS: usize = 2; // 5x5 structuring element

#[derive(Clone)]
pub(crate) struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayFrame {
    fn new(width: u32, height: u32) -> Self {
        GrayFrame {
            width,
            height,
            data: vec![0u8; width as usize * height as usize],
        }
    }
}

/// BGR to grayscale with the standard luma weights.
pub(crate) fn bgr_to_gray(frame: &BgrFrame) -> GrayFrame {
    let mut out = GrayFrame::new(frame.width, frame.height);
    for (dst, src) in out.data.iter_mut().zip(frame.data.chunks_exact(3)) {
        let (b, g, r) = (src[0] as f32, src[1] as f32, src[2] as f32);
        *dst = (0.114 * b + 0.587 * g + 0.299 * r).round().min(255.0) as u8;
    }
    out
}

fn gaussian_kernel() -> [f32; BLUR_KERNEL_SIZE] {
    // Sigma for an automatically sized kernel: 0.3*((ksize-1)*0.5 - 1) + 0.8
    let sigma = 0.3_f32 * ((BLUR_KERNEL_SIZE as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (BLUR_KERNEL_SIZE / 2) as i32;
    let mut kernel = [0f32; BLUR_KERNEL_SIZE];
    let mut sum = 0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let d = (i as i32 - center) as f32;
        *k = (-d * d / (2.0 * sigma * sigma)).exp();
        sum += *k;
    }
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable 21x21 Gaussian blur with replicated borders.
pub(crate) fn gaussian_blur_21(im: &GrayFrame) -> GrayFrame {
    let kernel = gaussian_kernel();
    let radius = (BLUR_KERNEL_SIZE / 2) as i32;
    let (w, h) = (im.width as i32, im.height as i32);

    // horizontal pass
    let mut tmp = vec![0f32; im.data.len()];
    for (y, row) in im.data.chunks_exact(w as usize).enumerate() {
        let tmp_row = &mut tmp[y * w as usize..(y + 1) * w as usize];
        for x in 0..w {
            let mut accum = 0f32;
            for (k, coeff) in kernel.iter().enumerate() {
                let xi = (x + k as i32 - radius).clamp(0, w - 1) as usize;
                accum += row[xi] as f32 * coeff;
            }
            tmp_row[x as usize] = accum;
        }
    }

    // vertical pass
    let mut out = GrayFrame::new(im.width, im.height);
    for y in 0..h {
        for x in 0..w {
            let mut accum = 0f32;
            for (k, coeff) in kernel.iter().enumerate() {
                let yi = (y + k as i32 - radius).clamp(0, h - 1) as usize;
                accum += tmp[yi * w as usize + x as usize] * coeff;
            }
            out.data[(y * w + x) as usize] = accum.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Per-pixel absolute difference.
pub(crate) fn absdiff(a: &GrayFrame, b: &GrayFrame) -> GrayFrame {
    let mut out = GrayFrame::new(a.width, a.height);
    for ((dst, pa), pb) in out.data.iter_mut().zip(&a.data).zip(&b.data) {
        *dst = pa.abs_diff(*pb);
    }
    out
}

/// In-place binary threshold: strictly greater than `threshold` becomes 255,
/// the rest 0.
pub(crate) fn threshold_binary(im: &mut GrayFrame, threshold: u8) {
    for p in im.data.iter_mut() {
        *p = if *p > threshold { 255 } else { 0 };
    }
}

/// Binary dilation with a 5x5 rectangular structuring element, as two
/// separable 1-D max passes.
pub(crate) fn dilate_5x5(im: &GrayFrame) -> GrayFrame {
    let (w, h) = (im.width as i32, im.height as i32);
    let r = DILATE_RADIUS as i32;

    let mut tmp = GrayFrame::new(im.width, im.height);
    for y in 0..h {
        let row = &im.data[(y * w) as usize..((y + 1) * w) as usize];
        let tmp_row = &mut tmp.data[(y * w) as usize..((y + 1) * w) as usize];
        for x in 0..w {
            let lo = (x - r).max(0) as usize;
            let hi = (x + r).min(w - 1) as usize;
            tmp_row[x as usize] = row[lo..=hi].iter().copied().max().unwrap_or(0);
        }
    }

    let mut out = GrayFrame::new(im.width, im.height);
    for y in 0..h {
        let lo = (y - r).max(0);
        let hi = (y + r).min(h - 1);
        for x in 0..w {
            let mut m = 0u8;
            for yi in lo..=hi {
                m = m.max(tmp.data[(yi * w + x) as usize]);
            }
            out.data[(y * w + x) as usize] = m;
        }
    }
    out
}

/// Bounding boxes of 8-connected foreground components with at least
/// `min_area` pixels, in scan order of their first pixel.
pub(crate) fn component_bounding_boxes(mask: &GrayFrame, min_area: u32) -> Vec<MotionRegion> {
    let (w, h) = (mask.width as i32, mask.height as i32);
    let mut visited = vec![false; mask.data.len()];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.data.len() {
        if mask.data[start] == 0 || visited[start] {
            continue;
        }

        let mut area = 0u32;
        let (mut min_x, mut min_y) = (w - 1, h - 1);
        let (mut max_x, mut max_y) = (0, 0);

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = (idx % w as usize) as i32;
            let y = (idx / w as usize) as i32;
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let nidx = (ny * w + nx) as usize;
                    if mask.data[nidx] != 0 && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        if area >= min_area {
            regions.push(MotionRegion {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            });
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_conversion_weights() {
        let mut frame = BgrFrame::new(2, 1);
        frame.set_pixel(0, 0, [255, 0, 0]); // pure blue
        frame.set_pixel(1, 0, [0, 0, 255]); // pure red
        let gray = bgr_to_gray(&frame);
        assert_eq!(gray.data[0], 29); // 0.114 * 255
        assert_eq!(gray.data[1], 76); // 0.299 * 255
    }

    #[test]
    fn blur_preserves_flat_images() {
        let im = GrayFrame {
            width: 64,
            height: 64,
            data: vec![77u8; 64 * 64],
        };
        let blurred = gaussian_blur_21(&im);
        assert!(blurred.data.iter().all(|p| (*p as i32 - 77).abs() <= 1));
    }

    #[test]
    fn dilation_grows_a_point() {
        let mut im = GrayFrame::new(16, 16);
        im.data[8 * 16 + 8] = 255;
        let out = dilate_5x5(&im);
        let on = out.data.iter().filter(|p| **p == 255).count();
        assert_eq!(on, 25);
    }

    #[test]
    fn component_area_filter() {
        let mut im = GrayFrame::new(32, 32);
        // 3x3 blob (area 9) and a single pixel (area 1).
        for y in 4..7 {
            for x in 4..7 {
                im.data[y * 32 + x] = 255;
            }
        }
        im.data[20 * 32 + 20] = 255;

        let regions = component_bounding_boxes(&im, 2);
        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions[0],
            MotionRegion {
                x: 4,
                y: 4,
                width: 3,
                height: 3
            }
        );
    }
}
