//! Image facts and a rough OCR-readiness score.
//!
//! Needs neither the OCR engine nor an API key, so it backs the CLI's
//! inspect mode as well as the header of every scan report.

use crate::output::{ImageInfo, QualityScore};
use crate::pipeline::validate::{format_name, ValidatedImage};
use image::{DynamicImage, GrayImage};

/// Describe a validated upload.
pub fn image_info(validated: &ValidatedImage) -> ImageInfo {
    ImageInfo {
        format: format_name(validated.format),
        width: validated.image.width(),
        height: validated.image.height(),
        color: format!("{:?}", validated.image.color()),
        size_bytes: validated.size_bytes,
        quality: quality_score(&validated.image),
    }
}

/// Score how well an image is likely to OCR.
///
/// | component    | measure                                   | weight |
/// |--------------|-------------------------------------------|--------|
/// | contrast     | std-dev of luma / 255                     | 0.3    |
/// | sharpness    | variance of the Laplacian / 1000, capped  | 0.3    |
/// | brightness   | 1 − 2·│mean luma − 0.5│                   | 0.2    |
/// | text_density | mean Sobel gradient magnitude / 100, capped | 0.2  |
pub fn quality_score(image: &DynamicImage) -> QualityScore {
    let gray = image.to_luma8();
    let n = (gray.width() as f64) * (gray.height() as f64);
    if n == 0.0 {
        return QualityScore::default();
    }

    let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let variance = gray
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    let contrast = (variance.sqrt() / 255.0).clamp(0.0, 1.0);
    let sharpness = (laplacian_variance(&gray) / 1000.0).min(1.0);
    let brightness = (1.0 - ((mean / 255.0) - 0.5).abs() * 2.0).clamp(0.0, 1.0);
    let text_density = (mean_gradient(&gray) / 100.0).min(1.0);

    let overall = (contrast * 0.3 + sharpness * 0.3 + brightness * 0.2 + text_density * 0.2)
        .clamp(0.0, 1.0);

    QualityScore {
        contrast: contrast as f32,
        sharpness: sharpness as f32,
        brightness: brightness as f32,
        text_density: text_density as f32,
        overall: overall as f32,
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let l = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += l;
            sum_sq += l * l;
            count += 1.0;
        }
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Mean 3×3 Sobel gradient magnitude over interior pixels.
fn mean_gradient(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    let mut total = 0.0;
    let mut count = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            total += (gx * gx + gy * gy).sqrt();
            count += 1.0;
        }
    }
    total / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma};

    fn checker(size: u32, cell: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        }))
    }

    #[test]
    fn flat_grey_has_no_contrast_or_edges() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
        let q = quality_score(&img);
        assert_eq!(q.contrast, 0.0);
        assert_eq!(q.sharpness, 0.0);
        assert_eq!(q.text_density, 0.0);
        assert!(q.brightness > 0.99);
    }

    #[test]
    fn high_contrast_pattern_scores_higher() {
        let flat = quality_score(&DynamicImage::ImageLuma8(GrayImage::from_pixel(
            64,
            64,
            Luma([128]),
        )));
        let sharp = quality_score(&checker(64, 4));
        assert!(sharp.overall > flat.overall);
        assert!(sharp.contrast > 0.45);
        assert_eq!(sharp.sharpness, 1.0);
    }

    #[test]
    fn black_image_has_no_brightness() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([0])));
        assert_eq!(quality_score(&img).brightness, 0.0);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        for cell in [1, 2, 8] {
            let q = quality_score(&checker(32, cell));
            for v in [q.contrast, q.sharpness, q.brightness, q.text_density, q.overall] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn info_reports_format_and_size() {
        let validated = ValidatedImage {
            image: checker(120, 10),
            format: ImageFormat::Png,
            size_bytes: 4321,
        };
        let info = image_info(&validated);
        assert_eq!(info.format, "png");
        assert_eq!((info.width, info.height), (120, 120));
        assert_eq!(info.color, "L8");
        assert_eq!(info.size_bytes, 4321);
    }
}
