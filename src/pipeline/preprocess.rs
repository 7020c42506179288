//! Image preprocessing: grayscale → denoise → contrast → binarise.
//!
//! Every step is a pure function of its input bitmap; there is no hidden
//! state and no randomness, so the same photo always yields the same
//! bitmap and therefore the same OCR request.
//!
//! ## Steps
//!
//! | Step | Implementation | Purpose |
//! |------|----------------|---------|
//! | grayscale | `to_luma8` | Tesseract only uses luminance |
//! | denoise | 3×3 median | removes sensor speckle without blurring stroke edges |
//! | contrast | CLAHE, 8×8 tiles, clip 2.0 | evens out glare and shadow across the label |
//! | binarise | Otsu's global threshold | pure black/white input is what Tesseract is tuned for |
//!
//! An input that is already bilevel skips denoise and contrast: both would
//! only erode thin glyph strokes. Combined with Otsu being the identity on a
//! 0/255 image, this makes [`preprocess`] idempotent.

use crate::config::PreprocessOptions;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use serde::Serialize;
use tracing::debug;

/// The bitmap handed to the OCR engine. Pixels are only ever 0 or 255.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: GrayImage,
    /// Otsu threshold used for binarisation; pixels above it became white.
    pub threshold: u8,
    /// Steps actually applied, in order.
    pub steps: Vec<PreprocessStep>,
}

/// A single transform applied by [`preprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessStep {
    Grayscale,
    Denoise,
    Contrast,
    Binarize,
}

/// Scale an image by `factor` before preprocessing.
///
/// A factor within 0.001 of 1.0 returns the image unchanged.
pub fn upscale(image: &DynamicImage, factor: f32) -> DynamicImage {
    if (factor - 1.0).abs() < 1e-3 {
        return image.clone();
    }
    let width = ((image.width() as f32 * factor).round() as u32).max(1);
    let height = ((image.height() as f32 * factor).round() as u32).max(1);
    debug!(
        "Resizing {}x{} → {}x{} (×{:.2})",
        image.width(),
        image.height(),
        width,
        height,
        factor
    );
    image.resize_exact(width, height, FilterType::CatmullRom)
}

/// Run the preprocessing chain on a decoded image.
pub fn preprocess(image: &DynamicImage, options: &PreprocessOptions) -> PreprocessedImage {
    let mut steps = vec![PreprocessStep::Grayscale];
    let mut gray = image.to_luma8();

    if is_bilevel(&gray) {
        debug!("Input is already bilevel; skipping denoise and contrast");
    } else {
        if options.denoise {
            gray = median_filter_3x3(&gray);
            steps.push(PreprocessStep::Denoise);
        }
        if options.enhance_contrast {
            gray = clahe(&gray, options.clahe_clip_limit, options.clahe_tile_grid);
            steps.push(PreprocessStep::Contrast);
        }
    }

    let threshold = otsu_threshold(&gray);
    let image = binarize(&gray, threshold);
    steps.push(PreprocessStep::Binarize);

    debug!(
        "Preprocessed {}x{} bitmap, Otsu threshold {}",
        image.width(),
        image.height(),
        threshold
    );

    PreprocessedImage {
        image,
        threshold,
        steps,
    }
}

/// True if every pixel is pure black or pure white.
pub fn is_bilevel(img: &GrayImage) -> bool {
    img.pixels().all(|p| p[0] == 0 || p[0] == 255)
}

// ── Denoise ──────────────────────────────────────────────────────────────

/// 3×3 median filter with clamped borders.
pub fn median_filter_3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    GrayImage::from_fn(w, h, |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in [-1i64, 0, 1] {
            for dx in [-1i64, 0, 1] {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                window[i] = img.get_pixel(sx, sy)[0];
                i += 1;
            }
        }
        window.sort_unstable();
        Luma([window[4]])
    })
}

// ── Contrast ─────────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into `grid × grid` tiles (fewer if the image is
/// smaller than the grid). Each tile gets its own equalisation LUT built from
/// a histogram clipped at `clip_limit × mean bin height`, with the clipped
/// excess spread evenly over all bins. Output pixels bilinearly blend the
/// LUTs of the four nearest tile centres so tile seams don't show.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let nx = grid.clamp(1, w) as usize;
    let ny = grid.clamp(1, h) as usize;
    let tile_w = (w as usize).div_ceil(nx);
    let tile_h = (h as usize).div_ceil(ny);

    let mut luts = vec![[0u8; 256]; nx * ny];
    for ty in 0..ny {
        for tx in 0..nx {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = ((tx + 1) * tile_w).min(w as usize);
            let y1 = ((ty + 1) * tile_h).min(h as usize);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }
            let area = ((x1.saturating_sub(x0)) * (y1.saturating_sub(y0))) as u32;
            luts[ty * nx + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let centre = |pos: u32, tile: usize, n: usize| -> (usize, usize, f32) {
        let f = ((pos as f32 + 0.5) / tile as f32 - 0.5).max(0.0);
        let lo = (f.floor() as usize).min(n - 1);
        let hi = (lo + 1).min(n - 1);
        let weight = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, weight)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = img.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, wx) = centre(x, tile_w, nx);
        let (ty0, ty1, wy) = centre(y, tile_h, ny);

        let top = luts[ty0 * nx + tx0][v] as f32 * (1.0 - wx) + luts[ty0 * nx + tx1][v] as f32 * wx;
        let bottom =
            luts[ty1 * nx + tx0][v] as f32 * (1.0 - wx) + luts[ty1 * nx + tx1][v] as f32 * wx;
        let out = top * (1.0 - wy) + bottom * wy;
        Luma([out.round().clamp(0.0, 255.0) as u8])
    })
}

/// Clip a tile histogram, redistribute the excess and return its equalisation LUT.
fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * area as f32 / 256.0).round() as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = ((cdf as f32 * 255.0 / area as f32).round()).min(255.0) as u8;
    }
    lut
}

// ── Binarise ─────────────────────────────────────────────────────────────

/// Otsu's method: the threshold maximising between-class variance.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u32; 256];
    for p in img.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let total = (img.width() as f64) * (img.height() as f64);

    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut w_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        w_b += count as f64;
        if w_b == 0.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f == 0.0 {
            break;
        }
        sum_b += t as f64 * count as f64;

        let m_b = sum_b / w_b;
        let m_f = (sum - sum_b) / w_f;
        let variance = w_b * w_f * (m_b - m_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = t as u8;
        }
    }

    threshold
}

/// Map pixels above `threshold` to white and the rest to black.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > threshold { 255 } else { 0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// A low-contrast, speckled "label": dark-ish text stripes on a grey card.
    fn noisy_label(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let text = (y / 8) % 3 == 0 && (x / 3) % 4 != 0;
            let base: u8 = if text { 90 } else { 150 };
            // Deterministic speckle.
            let speckle = ((x * 31 + y * 17) % 23) as u8;
            let v = if speckle == 0 { 255 } else { base + speckle };
            image::Rgb([v, v, v.saturating_sub(10)])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn output_is_bilevel() {
        let out = preprocess(&noisy_label(120, 90), &PreprocessOptions::default());
        assert!(is_bilevel(&out.image));
        assert_eq!(
            out.steps,
            vec![
                PreprocessStep::Grayscale,
                PreprocessStep::Denoise,
                PreprocessStep::Contrast,
                PreprocessStep::Binarize
            ]
        );
    }

    #[test]
    fn preprocessing_is_idempotent() {
        let options = PreprocessOptions::default();
        let once = preprocess(&noisy_label(120, 90), &options);
        let twice = preprocess(&DynamicImage::ImageLuma8(once.image.clone()), &options);
        assert_eq!(once.image, twice.image);
        assert_eq!(
            twice.steps,
            vec![PreprocessStep::Grayscale, PreprocessStep::Binarize]
        );
    }

    #[test]
    fn bilevel_input_is_unchanged() {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([if (x + y) % 7 == 0 { 0 } else { 255 }]));
        let out = preprocess(
            &DynamicImage::ImageLuma8(img.clone()),
            &PreprocessOptions::default(),
        );
        assert_eq!(out.image, img);
    }

    #[test]
    fn uniform_images_survive_binarisation() {
        for v in [0u8, 255] {
            let img = GrayImage::from_pixel(10, 10, Luma([v]));
            let t = otsu_threshold(&img);
            assert_eq!(binarize(&img, t), img);
        }
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let img = noisy_label(100, 100);
        let a = preprocess(&img, &PreprocessOptions::default());
        let b = preprocess(&img, &PreprocessOptions::default());
        assert_eq!(a.image, b.image);
        assert_eq!(a.threshold, b.threshold);
    }

    #[test]
    fn median_removes_isolated_speck() {
        let mut img = GrayImage::from_pixel(5, 5, Luma([200]));
        img.put_pixel(2, 2, Luma([0]));
        let out = median_filter_3x3(&img);
        assert_eq!(out.get_pixel(2, 2)[0], 200);
    }

    #[test]
    fn clahe_stretches_low_contrast() {
        // Two tiles per side, each holding both grey levels.
        let img = GrayImage::from_fn(256, 256, |x, _| Luma([if x % 4 < 2 { 110 } else { 130 }]));
        let out = clahe(&img, 8.0, 2);
        let spread = |g: &GrayImage| {
            let (lo, hi) = g
                .pixels()
                .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
            hi - lo
        };
        assert!(spread(&out) > spread(&img), "CLAHE should widen the range");
    }

    #[test]
    fn otsu_separates_two_levels() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 40 } else { 200 }]));
        let t = otsu_threshold(&img);
        assert!((40..200).contains(&t));
    }

    #[test]
    fn upscale_changes_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 40, Luma([128])));
        let up = upscale(&img, 1.5);
        assert_eq!((up.width(), up.height()), (150, 60));
        let same = upscale(&img, 1.0);
        assert_eq!((same.width(), same.height()), (100, 40));
    }
}
