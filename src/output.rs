//! Result types produced by a scan.
//!
//! Everything here is plain data with `Serialize`/`Deserialize` so the CLI
//! can emit a whole [`ScanReport`] as JSON and tests can compare values
//! directly.

use serde::{Deserialize, Serialize};

/// Basic facts about an uploaded image, available without OCR or an API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Container format, e.g. "png".
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Pixel layout as reported by the decoder, e.g. "Rgb8".
    pub color: String,
    /// Size of the upload in bytes.
    pub size_bytes: u64,
    pub quality: QualityScore,
}

/// A rough estimate of how well a photo will OCR.
///
/// Every component lies in [0, 1]; `overall` is the weighted blend
/// `0.3·contrast + 0.3·sharpness + 0.2·brightness + 0.2·text_density`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityScore {
    pub contrast: f32,
    pub sharpness: f32,
    pub brightness: f32,
    pub text_density: f32,
    pub overall: f32,
}

/// One recognised word and the engine's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    confidence: f32,
}

impl OcrToken {
    /// Create a token; the confidence is clamped to [0, 1] and NaN becomes 0.
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            text: text.into(),
            confidence,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Text recovered from the label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Cleaned text, built only from `tokens`.
    pub text: String,
    /// Tokens that survived the confidence and allowlist filter, in reading order.
    pub tokens: Vec<OcrToken>,
    /// Confidence threshold that produced `tokens`.
    pub threshold: f32,
    /// True when the relaxed retry produced this text.
    pub relaxed: bool,
    /// Number of OCR engine invocations (1 or 2).
    pub attempts: u32,
    /// Mean confidence of `tokens`; 0 when empty.
    pub mean_confidence: f32,
}

/// An ingredient named by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Health-oriented notes about the product.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NutritionalInsights {
    /// 1 (least healthy) to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<u8>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub key_nutrients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_notes: Option<String>,
}

/// Structured analysis of a label's ingredient list.
///
/// Every field may be empty: the model is free to omit anything it cannot
/// determine from the text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ingredients: Vec<Ingredient>,
    /// Model-reported allergens merged with keyword matches, sorted.
    pub allergens: Vec<String>,
    pub dietary_flags: Vec<String>,
    pub nutritional_insights: NutritionalInsights,
    pub summary: String,
    /// Set when the model's reply could not be parsed; `summary` then holds the raw reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl AnalysisResult {
    /// True if an ingredient with this name (case-insensitive) was identified.
    pub fn has_ingredient(&self, name: &str) -> bool {
        self.ingredients
            .iter()
            .any(|i| i.name.trim().eq_ignore_ascii_case(name.trim()))
    }
}

/// Background information about a single ingredient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientDetails {
    pub name: String,
    pub description: String,
    pub uses: String,
    pub nutrition: String,
    pub health_notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergen_info: Option<String>,
}

/// Timing and usage counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub validate_ms: u64,
    pub preprocess_ms: u64,
    pub extract_ms: u64,
    pub analyze_ms: u64,
    pub total_ms: u64,
    pub ocr_attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Everything a completed scan produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub image: ImageInfo,
    pub extracted: ExtractedText,
    pub analysis: AnalysisResult,
    pub stats: ScanStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_confidence_is_clamped() {
        assert_eq!(OcrToken::new("a", 1.7).confidence(), 1.0);
        assert_eq!(OcrToken::new("a", -0.2).confidence(), 0.0);
        assert_eq!(OcrToken::new("a", f32::NAN).confidence(), 0.0);
        assert_eq!(OcrToken::new("a", 0.42).confidence(), 0.42);
    }

    #[test]
    fn has_ingredient_ignores_case_and_padding() {
        let result = AnalysisResult {
            ingredients: vec![Ingredient {
                name: " Water ".into(),
                description: None,
            }],
            ..Default::default()
        };
        assert!(result.has_ingredient("water"));
        assert!(!result.has_ingredient("salt"));
    }

    #[test]
    fn analysis_serialises_without_empty_optionals() {
        let json = serde_json::to_string(&AnalysisResult::default()).unwrap();
        assert!(!json.contains("degraded"));
        assert!(!json.contains("health_score"));
    }
}
