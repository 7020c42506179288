//! Ingredient analysis: one prompt to the chat backend, one parsed result.
//!
//! The model is asked for a JSON object, but nothing guarantees it sends
//! one. Replies are parsed leniently (code fences stripped, surrounding prose
//! ignored, ingredients accepted as objects or bare strings). If the reply
//! still does not parse, the scan is not failed: the raw reply becomes the
//! summary and [`AnalysisResult::degraded`] says why.

use crate::config::ScanConfig;
use crate::error::EatSafeError;
use crate::output::{AnalysisResult, Ingredient, IngredientDetails, NutritionalInsights};
use crate::pipeline::llm::{ChatBackend, ChatReply, ChatRequest};
use crate::pipeline::section::{detect_allergens, ingredient_section};
use crate::prompts::{
    analysis_prompt, ingredient_details_prompt, DEFAULT_SYSTEM_PROMPT, DETAILS_MAX_TOKENS,
    DETAILS_SYSTEM_PROMPT, DETAILS_TEMPERATURE,
};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Health score used when the model reports one outside 1–10.
const FALLBACK_HEALTH_SCORE: u8 = 5;

/// Token usage of one analysis call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Sends label text to a [`ChatBackend`] and interprets the reply.
pub struct Analyzer<'a> {
    backend: &'a dyn ChatBackend,
    config: &'a ScanConfig,
}

impl<'a> Analyzer<'a> {
    pub fn new(backend: &'a dyn ChatBackend, config: &'a ScanConfig) -> Self {
        Self { backend, config }
    }

    /// Analyse label text.
    ///
    /// # Errors
    /// - [`EatSafeError::EmptyInput`] if the text is too short; the backend is not called
    /// - [`EatSafeError::ApiError`] on backend failure or timeout
    /// - [`EatSafeError::MalformedResponse`] if the backend replied with nothing
    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult, EatSafeError> {
        self.analyze_with_usage(text).await.map(|(result, _)| result)
    }

    /// Like [`Analyzer::analyze`], also returning token usage.
    pub async fn analyze_with_usage(
        &self,
        text: &str,
    ) -> Result<(AnalysisResult, TokenUsage), EatSafeError> {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.config.min_analysis_chars.max(1) {
            return Err(EatSafeError::EmptyInput);
        }

        let section = ingredient_section(trimmed);
        debug!(
            "Analysing {} chars ({} chars of ingredient section)",
            trimmed.chars().count(),
            section.chars().count()
        );

        let request = ChatRequest {
            system: self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user: analysis_prompt(section),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let reply = self.send(&request).await?;
        let usage = TokenUsage {
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
        };

        if reply.content.trim().is_empty() {
            return Err(EatSafeError::MalformedResponse {
                detail: format!("{} returned an empty response", self.backend.name()),
            });
        }

        let mut result = match parse_analysis(&reply.content) {
            Ok(parsed) => parsed,
            Err(detail) => {
                let err = EatSafeError::MalformedResponse { detail };
                warn!("{err}; using the raw reply as summary");
                AnalysisResult {
                    summary: reply.content.trim().to_string(),
                    degraded: Some(err.to_string()),
                    ..Default::default()
                }
            }
        };

        result.allergens = merge_allergens(&result.allergens, &detect_allergens(section));
        info!(
            "Analysis: {} ingredients, {} allergens",
            result.ingredients.len(),
            result.allergens.len()
        );
        Ok((result, usage))
    }

    /// Ask the model about one ingredient.
    ///
    /// Backend or parse failures do not propagate: a record saying the
    /// details are unavailable is returned instead.
    ///
    /// # Errors
    /// [`EatSafeError::EmptyInput`] if `name` is blank.
    pub async fn ingredient_details(&self, name: &str) -> Result<IngredientDetails, EatSafeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EatSafeError::EmptyInput);
        }

        let request = ChatRequest {
            system: DETAILS_SYSTEM_PROMPT.to_string(),
            user: ingredient_details_prompt(name),
            temperature: DETAILS_TEMPERATURE,
            max_tokens: DETAILS_MAX_TOKENS,
        };

        let outcome = match self.send(&request).await {
            Ok(reply) => parse_details(name, &reply.content),
            Err(e) => Err(e.to_string()),
        };

        Ok(outcome.unwrap_or_else(|reason| {
            warn!("Ingredient details for '{}' unavailable: {}", name, reason);
            unavailable_details(name, &reason)
        }))
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, EatSafeError> {
        let secs = self.config.api_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), self.backend.complete(request)).await
        {
            Ok(reply) => reply,
            Err(_) => Err(EatSafeError::ApiError {
                provider: self.backend.name().to_string(),
                message: format!("no response within {secs}s"),
            }),
        }
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────

/// Strip markdown fences and surrounding prose, leaving the outermost object.
fn json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIngredient {
    Named {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
    Bare(String),
}

#[derive(Deserialize, Default)]
struct RawInsights {
    #[serde(default)]
    health_score: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    categories: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    key_nutrients: Vec<String>,
    #[serde(default)]
    health_notes: Option<String>,
}

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    ingredients: Vec<RawIngredient>,
    #[serde(default, deserialize_with = "null_as_default")]
    allergens: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    dietary_flags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    nutritional_insights: RawInsights,
    #[serde(default, deserialize_with = "null_as_default")]
    summary: String,
}

fn parse_analysis(content: &str) -> Result<AnalysisResult, String> {
    let json = json_object(content).ok_or("reply contains no JSON object")?;
    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| format!("reply is not valid analysis JSON: {e}"))?;

    let ingredients = raw
        .ingredients
        .into_iter()
        .filter_map(|i| {
            let (name, description) = match i {
                RawIngredient::Named { name, description } => (name, description),
                RawIngredient::Bare(name) => (name, None),
            };
            let name = name.trim().to_string();
            (!name.is_empty()).then(|| Ingredient {
                name,
                description: description.filter(|d| !d.trim().is_empty()),
            })
        })
        .collect();

    Ok(AnalysisResult {
        ingredients,
        allergens: raw.allergens,
        dietary_flags: non_empty(raw.dietary_flags),
        nutritional_insights: NutritionalInsights {
            health_score: raw
                .nutritional_insights
                .health_score
                .as_ref()
                .and_then(validate_health_score),
            categories: non_empty(raw.nutritional_insights.categories),
            key_nutrients: non_empty(raw.nutritional_insights.key_nutrients),
            health_notes: raw.nutritional_insights.health_notes,
        },
        summary: raw.summary.trim().to_string(),
        degraded: None,
    })
}

/// `null` means the model gave no score; anything else outside 1–10 is replaced.
fn validate_health_score(value: &serde_json::Value) -> Option<u8> {
    let score = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score {
        Some(s) if (1.0..=10.0).contains(&s) => Some(s.round() as u8),
        _ => Some(FALLBACK_HEALTH_SCORE),
    }
}

fn non_empty(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Union of model-reported and keyword-detected allergens, deduplicated
/// case-insensitively (first spelling wins) and sorted.
fn merge_allergens(reported: &[String], detected: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged: Vec<String> = reported
        .iter()
        .chain(detected)
        .map(|a| a.trim())
        .filter(|a| !a.is_empty() && seen.insert(a.to_lowercase()))
        .map(str::to_string)
        .collect();
    merged.sort_by_key(|a| a.to_lowercase());
    merged
}

#[derive(Deserialize)]
struct RawDetails {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    uses: Option<String>,
    #[serde(default)]
    nutrition: Option<String>,
    #[serde(default)]
    health_notes: Option<String>,
    #[serde(default)]
    allergen_info: Option<String>,
}

fn parse_details(name: &str, content: &str) -> Result<IngredientDetails, String> {
    let json = json_object(content).ok_or("reply contains no JSON object")?;
    let raw: RawDetails = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let or_unknown = |v: Option<String>| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    Ok(IngredientDetails {
        name: name.to_string(),
        description: or_unknown(raw.description),
        uses: or_unknown(raw.uses),
        nutrition: or_unknown(raw.nutrition),
        health_notes: or_unknown(raw.health_notes),
        allergen_info: raw
            .allergen_info
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none") && s != "null"),
    })
}

fn unavailable_details(name: &str, reason: &str) -> IngredientDetails {
    IngredientDetails {
        name: name.to_string(),
        description: format!("Unable to analyze ingredient: {reason}"),
        uses: "Unknown".to_string(),
        nutrition: "Unknown".to_string(),
        health_notes: "Analysis unavailable".to_string(),
        allergen_info: None,
    }
}
