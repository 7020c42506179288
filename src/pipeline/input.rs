//! Input resolution: turn a user-supplied path or URL into an [`UploadedImage`].
//!
//! Uploads are held entirely in memory. Label photos are a few megabytes at
//! most and every later stage wants the bytes anyway, so there is no temp
//! file to manage. The byte limit is enforced here, before any decoding.

use crate::error::EatSafeError;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw upload bytes plus what the uploader claimed they are.
///
/// Lives for one scan only and is consumed by the validator.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    /// Format implied by the file extension or HTTP content type, if any.
    pub declared_format: Option<ImageFormat>,
    /// File path or URL, for messages.
    pub source: String,
}

impl UploadedImage {
    /// Wrap bytes that did not come from a file, e.g. a web upload.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            declared_format: None,
            source: "<memory>".to_string(),
        }
    }

    pub fn with_declared_format(mut self, format: ImageFormat) -> Self {
        self.declared_format = Some(format);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory upload.
///
/// URLs are downloaded; anything else is treated as a local path.
pub async fn resolve_input(
    input: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<UploadedImage, EatSafeError> {
    if is_url(input) {
        download_url(input, max_bytes, timeout_secs).await
    } else {
        read_local(Path::new(input), max_bytes).await
    }
}

/// Read a local image file, checking its size before loading it.
async fn read_local(path: &Path, max_bytes: u64) -> Result<UploadedImage, EatSafeError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path.to_path_buf(), e))?;
    if !meta.is_file() {
        return Err(EatSafeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if meta.len() > max_bytes {
        return Err(EatSafeError::UploadTooLarge {
            bytes: meta.len(),
            max: max_bytes,
        });
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| io_error(path.to_path_buf(), e))?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(UploadedImage {
        bytes,
        declared_format: ImageFormat::from_path(path).ok(),
        source: path.display().to_string(),
    })
}

fn io_error(path: PathBuf, e: std::io::Error) -> EatSafeError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => EatSafeError::PermissionDenied { path },
        _ => EatSafeError::FileNotFound { path },
    }
}

/// Download a URL into memory.
async fn download_url(
    url: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<UploadedImage, EatSafeError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EatSafeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            EatSafeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            EatSafeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(EatSafeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(EatSafeError::UploadTooLarge {
                bytes: len,
                max: max_bytes,
            });
        }
    }

    let declared_format = declared_format_for(url, &response);

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            EatSafeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            EatSafeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if bytes.len() as u64 > max_bytes {
        return Err(EatSafeError::UploadTooLarge {
            bytes: bytes.len() as u64,
            max: max_bytes,
        });
    }

    info!("Downloaded {} bytes", bytes.len());

    Ok(UploadedImage {
        bytes: bytes.to_vec(),
        declared_format,
        source: url.to_string(),
    })
}

/// Work out the claimed format from the Content-Type header or the URL path.
fn declared_format_for(url: &str, response: &reqwest::Response) -> Option<ImageFormat> {
    let from_header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ImageFormat::from_mime_type(ct.split(';').next().unwrap_or(ct).trim()));

    from_header.or_else(|| format_from_url(url))
}

fn format_from_url(url: &str) -> Option<ImageFormat> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    ImageFormat::from_path(last).ok()
}
