//! Error types for the eatsafe library.
//!
//! A single enum, [`EatSafeError`], covers every way a scan can stop. Each
//! pipeline stage converts its own failure modes into one of these variants
//! before returning, so nothing leaks across a stage boundary as a raw
//! `image::ImageError`, `io::Error` or provider error.
//!
//! The `Display` text of every variant is written for the person holding the
//! phone, not for the developer: the CLI prints it verbatim, followed by
//! [`EatSafeError::hint`] when one exists. Developer detail goes to `tracing`.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the eatsafe library.
#[derive(Debug, Error)]
pub enum EatSafeError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload is larger than the configured byte limit.
    #[error("Upload is {bytes} bytes, the limit is {max} bytes")]
    UploadTooLarge { bytes: u64, max: u64 },

    // ── Validator ─────────────────────────────────────────────────────────
    /// The container is not one of JPEG, PNG, BMP or TIFF.
    #[error("Unsupported image format ({detected}). Upload a JPEG, PNG, BMP or TIFF photo.")]
    InvalidFormat { detected: String },

    /// The container was recognised but the bytes do not decode.
    #[error("The {format} image is corrupted or incomplete: {detail}")]
    CorruptImage { format: String, detail: String },

    /// At least one side is below the minimum dimension.
    #[error("Image is {width}x{height} px; both sides must be at least {min} px")]
    TooSmall { width: u32, height: u32, min: u32 },

    /// At least one side is above the maximum dimension.
    #[error("Image is {width}x{height} px; neither side may exceed {max} px")]
    TooLarge { width: u32, height: u32, max: u32 },

    // ── Extractor ─────────────────────────────────────────────────────────
    /// OCR produced too little text, even after the relaxed retry.
    #[error("Unable to extract sufficient text from the image ({chars} characters after {attempts} OCR attempt(s))")]
    NoTextFound { chars: usize, attempts: u32 },

    /// The OCR engine could not be started or exited with an error.
    #[error("OCR engine failed: {detail}")]
    OcrEngineFailed { detail: String },

    // ── Analyzer ──────────────────────────────────────────────────────────
    /// There was nothing to send to the language model.
    #[error("No ingredient text to analyse")]
    EmptyInput,

    /// The LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider reported a network, authentication or rate-limit error.
    #[error("LLM API error from '{provider}': {message}")]
    ApiError { provider: String, message: String },

    /// The provider answered, but not with the expected structure.
    #[error("Malformed analysis response: {detail}")]
    MalformedResponse { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The pipeline stage an error (or progress event) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration and runtime setup, before any image is touched.
    Setup,
    Upload,
    Validate,
    Preprocess,
    Extract,
    Analyze,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Setup => "setup",
            Stage::Upload => "upload",
            Stage::Validate => "validate",
            Stage::Preprocess => "preprocess",
            Stage::Extract => "extract",
            Stage::Analyze => "analyze",
        };
        f.write_str(s)
    }
}

impl EatSafeError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            EatSafeError::FileNotFound { .. }
            | EatSafeError::PermissionDenied { .. }
            | EatSafeError::DownloadFailed { .. }
            | EatSafeError::DownloadTimeout { .. }
            | EatSafeError::UploadTooLarge { .. } => Stage::Upload,
            EatSafeError::InvalidFormat { .. }
            | EatSafeError::CorruptImage { .. }
            | EatSafeError::TooSmall { .. }
            | EatSafeError::TooLarge { .. } => Stage::Validate,
            EatSafeError::NoTextFound { .. } | EatSafeError::OcrEngineFailed { .. } => {
                Stage::Extract
            }
            EatSafeError::EmptyInput
            | EatSafeError::ProviderNotConfigured { .. }
            | EatSafeError::ApiError { .. }
            | EatSafeError::MalformedResponse { .. } => Stage::Analyze,
            EatSafeError::InvalidConfig(_) | EatSafeError::Internal(_) => Stage::Setup,
        }
    }

    /// Suggestions shown under the error message, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            EatSafeError::InvalidFormat { .. } | EatSafeError::CorruptImage { .. } => {
                Some("Upload a different image.")
            }
            EatSafeError::TooSmall { .. } => {
                Some("Use a photo of at least 300x300 pixels for reliable OCR.")
            }
            EatSafeError::TooLarge { .. } | EatSafeError::UploadTooLarge { .. } => {
                Some("Resize or crop the photo to the ingredient list before uploading.")
            }
            EatSafeError::NoTextFound { .. } => Some(
                "Upload a clearer image, make sure the ingredients list is visible, \
                 or adjust the preprocessing options.",
            ),
            EatSafeError::OcrEngineFailed { .. } => Some(
                "Install Tesseract (e.g. `apt install tesseract-ocr`) or point \
                 --tesseract at the binary.",
            ),
            EatSafeError::ProviderNotConfigured { .. } => {
                Some("Set OPENAI_API_KEY (or another provider key) in the environment.")
            }
            EatSafeError::ApiError { .. } => Some("Wait a moment and try again."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_small_display() {
        let e = EatSafeError::TooSmall {
            width: 40,
            height: 500,
            min: 100,
        };
        let msg = e.to_string();
        assert!(msg.contains("40x500"), "got: {msg}");
        assert!(msg.contains("100 px"), "got: {msg}");
    }

    #[test]
    fn no_text_found_display() {
        let e = EatSafeError::NoTextFound {
            chars: 3,
            attempts: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains("3 characters"));
        assert!(msg.contains("2 OCR attempt"));
    }

    #[test]
    fn api_error_display() {
        let e = EatSafeError::ApiError {
            provider: "openai".into(),
            message: "rate limit".into(),
        };
        assert!(e.to_string().contains("openai"));
        assert!(e.to_string().contains("rate limit"));
    }

    #[test]
    fn stages_follow_taxonomy() {
        assert_eq!(
            EatSafeError::InvalidFormat {
                detected: "gif".into()
            }
            .stage(),
            Stage::Validate
        );
        assert_eq!(
            EatSafeError::NoTextFound {
                chars: 0,
                attempts: 2
            }
            .stage(),
            Stage::Extract
        );
        assert_eq!(EatSafeError::EmptyInput.stage(), Stage::Analyze);
        assert_eq!(
            EatSafeError::InvalidConfig("bad threshold".into()).stage(),
            Stage::Setup
        );
        assert_eq!(Stage::Setup.to_string(), "setup");
    }

    #[test]
    fn hints_exist_for_user_recoverable_errors() {
        assert!(EatSafeError::NoTextFound {
            chars: 0,
            attempts: 1
        }
        .hint()
        .is_some());
        assert!(EatSafeError::EmptyInput.hint().is_none());
    }
}
