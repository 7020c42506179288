//! Upload validation: container sniffing, integrity and dimension checks, decode.
//!
//! Checks run cheapest first so a 150 MB garbage upload is rejected from its
//! first bytes instead of after a full decode:
//!
//! 1. empty / byte-size limit
//! 2. container sniffed from magic bytes (declared format as fallback)
//! 3. container integrity (end markers, declared file size)
//! 4. dimensions read from the header only
//! 5. full decode
//!
//! Step 3 exists because some decoders are lenient: a JPEG cut off halfway
//! through its entropy-coded data still "decodes" into a half-grey picture.
//! A photo that was only partly uploaded must be reported as corrupt, not
//! OCR'd.

use crate::config::ScanConfig;
use crate::error::EatSafeError;
use crate::pipeline::input::UploadedImage;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Containers a label photo may arrive in.
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// A decoded upload that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
    pub size_bytes: u64,
}

/// Validate an upload and decode it.
///
/// # Errors
/// - [`EatSafeError::UploadTooLarge`]: more bytes than `max_upload_bytes`
/// - [`EatSafeError::InvalidFormat`]: not JPEG, PNG, BMP or TIFF
/// - [`EatSafeError::CorruptImage`]: empty, truncated or undecodable
/// - [`EatSafeError::TooSmall`] / [`EatSafeError::TooLarge`]: dimension bounds
pub fn validate(
    upload: UploadedImage,
    config: &ScanConfig,
) -> Result<ValidatedImage, EatSafeError> {
    let size_bytes = upload.bytes.len() as u64;

    if upload.bytes.is_empty() {
        return Err(EatSafeError::CorruptImage {
            format: upload
                .declared_format
                .map(format_name)
                .unwrap_or_else(|| "unknown".into()),
            detail: "upload is empty".into(),
        });
    }
    if size_bytes > config.max_upload_bytes {
        return Err(EatSafeError::UploadTooLarge {
            bytes: size_bytes,
            max: config.max_upload_bytes,
        });
    }

    let format = detect_format(&upload)?;
    let name = format_name(format);
    verify_container(&upload.bytes, format).map_err(|detail| EatSafeError::CorruptImage {
        format: name.clone(),
        detail,
    })?;

    let (width, height) = ImageReader::with_format(Cursor::new(&upload.bytes), format)
        .into_dimensions()
        .map_err(|e| EatSafeError::CorruptImage {
            format: name.clone(),
            detail: e.to_string(),
        })?;

    if width < config.min_dimension || height < config.min_dimension {
        return Err(EatSafeError::TooSmall {
            width,
            height,
            min: config.min_dimension,
        });
    }
    if width > config.max_dimension || height > config.max_dimension {
        return Err(EatSafeError::TooLarge {
            width,
            height,
            max: config.max_dimension,
        });
    }

    let image = ImageReader::with_format(Cursor::new(&upload.bytes), format)
        .decode()
        .map_err(|e| EatSafeError::CorruptImage {
            format: name.clone(),
            detail: e.to_string(),
        })?;

    debug!(
        "Validated {} from {}: {}x{} px, {} bytes",
        name, upload.source, width, height, size_bytes
    );

    Ok(ValidatedImage {
        image,
        format,
        size_bytes,
    })
}

/// Lower-case display name of a container, e.g. "jpeg".
pub fn format_name(format: ImageFormat) -> String {
    format!("{format:?}").to_lowercase()
}

/// Sniff the container from magic bytes, falling back to the declared format.
fn detect_format(upload: &UploadedImage) -> Result<ImageFormat, EatSafeError> {
    let format = match image::guess_format(&upload.bytes) {
        Ok(sniffed) => {
            if let Some(declared) = upload.declared_format {
                if declared != sniffed {
                    debug!(
                        "{} declared as {} but contains {}",
                        upload.source,
                        format_name(declared),
                        format_name(sniffed)
                    );
                }
            }
            sniffed
        }
        Err(_) => match upload.declared_format {
            // The bytes don't start like any known image. If the uploader said
            // it is a supported type, the file is damaged rather than foreign.
            Some(declared) if SUPPORTED_FORMATS.contains(&declared) => {
                return Err(EatSafeError::CorruptImage {
                    format: format_name(declared),
                    detail: "file header is not recognisable".into(),
                });
            }
            Some(declared) => declared,
            None => {
                return Err(EatSafeError::InvalidFormat {
                    detected: "unknown".into(),
                })
            }
        },
    };

    if SUPPORTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(EatSafeError::InvalidFormat {
            detected: format_name(format),
        })
    }
}

const PNG_IEND_CHUNK: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Structural checks the decoders don't reliably perform.
fn verify_container(bytes: &[u8], format: ImageFormat) -> Result<(), String> {
    match format {
        ImageFormat::Jpeg => {
            // The main image is the last scan; EOI must follow it. Searching
            // from the last SOS skips EOI markers of embedded EXIF thumbnails.
            let last_sos = rfind(bytes, &[0xFF, 0xDA]).ok_or("no image data (SOS) segment")?;
            if find(&bytes[last_sos..], &[0xFF, 0xD9]).is_none() {
                return Err("missing end-of-image marker; the file is truncated".into());
            }
            Ok(())
        }
        ImageFormat::Png => {
            // Zero length, type, fixed CRC. A cut inside the CRC still shows "IEND".
            let tail_start = bytes.len().saturating_sub(1024);
            if find(&bytes[tail_start..], &PNG_IEND_CHUNK).is_none() {
                return Err("missing IEND chunk; the file is truncated".into());
            }
            Ok(())
        }
        ImageFormat::Bmp => {
            if bytes.len() < 6 {
                return Err("header is truncated".into());
            }
            let declared = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
            // Some writers leave the size field at zero.
            if declared > bytes.len() {
                return Err(format!(
                    "header declares {declared} bytes but only {} are present",
                    bytes.len()
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    fn label_like(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (y / 10) % 2 == 0 && (x / 4) % 3 != 0 {
                image::Rgb([20, 20, 20])
            } else {
                image::Rgb([240, 235, 225])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn every_supported_format_validates() {
        let config = ScanConfig::default();
        let img = label_like(160, 120);
        for format in SUPPORTED_FORMATS {
            let bytes = encode(&img, format);
            let v = validate(UploadedImage::from_bytes(bytes), &config)
                .unwrap_or_else(|e| panic!("{format:?} should validate: {e}"));
            assert_eq!(v.format, format);
            assert_eq!((v.image.width(), v.image.height()), (160, 120));
        }
    }

    #[test]
    fn truncated_streams_are_corrupt() {
        let config = ScanConfig::default();
        let img = label_like(160, 120);
        for format in SUPPORTED_FORMATS {
            let bytes = encode(&img, format);
            let cut = bytes[..bytes.len() / 2].to_vec();
            let err = validate(UploadedImage::from_bytes(cut), &config).unwrap_err();
            assert!(
                matches!(err, EatSafeError::CorruptImage { .. }),
                "{format:?}: expected CorruptImage, got {err:?}"
            );
        }
    }

    #[test]
    fn png_cut_inside_iend_is_corrupt() {
        let config = ScanConfig::default();
        let bytes = encode(&label_like(160, 120), ImageFormat::Png);
        assert!(bytes.ends_with(&PNG_IEND_CHUNK));
        for cut in 1..=4 {
            let short = bytes[..bytes.len() - cut].to_vec();
            let err = validate(UploadedImage::from_bytes(short), &config).unwrap_err();
            assert!(
                matches!(err, EatSafeError::CorruptImage { .. }),
                "cut {cut}: expected CorruptImage, got {err:?}"
            );
        }
    }

    #[test]
    fn empty_upload_is_corrupt() {
        let err = validate(UploadedImage::from_bytes(Vec::new()), &ScanConfig::default())
            .unwrap_err();
        assert!(matches!(err, EatSafeError::CorruptImage { .. }));
    }

    #[test]
    fn unknown_bytes_are_invalid_format() {
        let err = validate(
            UploadedImage::from_bytes(b"hello, this is plain text".to_vec()),
            &ScanConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EatSafeError::InvalidFormat { .. }));
    }

    #[test]
    fn unsupported_container_is_invalid_format() {
        // GIF magic; the codec isn't compiled in but the sniffer knows it.
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        let err = validate(UploadedImage::from_bytes(bytes), &ScanConfig::default()).unwrap_err();
        match err {
            EatSafeError::InvalidFormat { detected } => assert_eq!(detected, "gif"),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn garbage_declared_as_jpeg_is_corrupt() {
        let upload = UploadedImage::from_bytes(b"definitely not a jpeg".to_vec())
            .with_declared_format(ImageFormat::Jpeg);
        let err = validate(upload, &ScanConfig::default()).unwrap_err();
        assert!(matches!(err, EatSafeError::CorruptImage { .. }));
    }

    #[test]
    fn dimension_bounds_are_enforced() {
        let config = ScanConfig::default();
        let small = DynamicImage::ImageLuma8(GrayImage::from_pixel(80, 300, Luma([255])));
        let err = validate(
            UploadedImage::from_bytes(encode(&small, ImageFormat::Png)),
            &config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EatSafeError::TooSmall {
                width: 80,
                height: 300,
                min: 100
            }
        ));

        let tight = ScanConfig::builder().max_dimension(150).build().unwrap();
        let wide = label_like(200, 120);
        let err = validate(
            UploadedImage::from_bytes(encode(&wide, ImageFormat::Png)),
            &tight,
        )
        .unwrap_err();
        assert!(matches!(err, EatSafeError::TooLarge { max: 150, .. }));
    }

    #[test]
    fn byte_limit_is_enforced() {
        let config = ScanConfig::builder().max_upload_bytes(16).build().unwrap();
        let bytes = encode(&label_like(120, 120), ImageFormat::Png);
        let err = validate(UploadedImage::from_bytes(bytes), &config).unwrap_err();
        assert!(matches!(err, EatSafeError::UploadTooLarge { max: 16, .. }));
    }
}
