//! Pipeline stages for food-label scanning.
//!
//! Each submodule implements one step and can be tested on its own. The
//! [`crate::scan::Scanner`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ validate ──▶ preprocess ──▶ extract ──▶ analyze
//! (path/URL) (decode)    (bitmap)       (OCR)       (LLM)
//! ```
//!
//! 1. [`input`]     : read a local file or download a URL into memory
//! 2. [`validate`]  : sniff the container, check integrity and dimensions, decode
//! 3. [`quality`]   : image facts and an OCR-readiness score
//! 4. [`preprocess`]: upscale, grayscale, denoise, CLAHE, Otsu binarisation
//! 5. [`ocr`]       : the [`ocr::OcrEngine`] seam and the Tesseract engine
//! 6. [`extract`]   : confidence filter, one relaxed retry; [`cleanup`] fixes OCR quirks
//! 7. [`analyze`]   : prompt the [`llm::ChatBackend`] and parse its reply;
//!    [`section`] isolates the ingredient list first

pub mod analyze;
pub mod cleanup;
pub mod extract;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod preprocess;
pub mod quality;
pub mod section;
pub mod validate;
