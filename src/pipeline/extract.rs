//! Text extraction: OCR, confidence filter, cleanup, one relaxed retry.
//!
//! The first pass uses the strict settings. If the filtered, cleaned text is
//! empty or shorter than `min_text_chars`, the engine is invoked exactly once
//! more with the relaxed page segmentation and threshold. There is no third
//! attempt.

use crate::config::ScanConfig;
use crate::error::EatSafeError;
use crate::output::{ExtractedText, OcrToken};
use crate::pipeline::cleanup::{clean_ocr_text, fold_pipe};
use crate::pipeline::ocr::OcrEngine;
use image::GrayImage;
use tracing::{debug, info, warn};

/// Keep tokens whose confidence is strictly above `threshold`, with
/// characters outside `allowlist` stripped. A `|` is read as `I` first.
/// Tokens left empty are dropped.
///
/// Lowering the threshold never removes a token that a higher one kept.
pub fn filter_tokens(tokens: &[OcrToken], threshold: f32, allowlist: &str) -> Vec<OcrToken> {
    tokens
        .iter()
        .filter(|t| t.confidence() > threshold)
        .filter_map(|t| {
            let text: String = t
                .text
                .chars()
                .map(fold_pipe)
                .filter(|c| allowlist.contains(*c))
                .collect();
            if text.trim().is_empty() {
                None
            } else {
                Some(OcrToken::new(text, t.confidence()))
            }
        })
        .collect()
}

/// Join filtered tokens in reading order and clean the result.
pub fn assemble_text(tokens: &[OcrToken]) -> String {
    let joined = tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    clean_ocr_text(&joined)
}

struct Pass {
    tokens: Vec<OcrToken>,
    text: String,
}

impl Pass {
    fn chars(&self) -> usize {
        self.text.chars().count()
    }

    fn is_sufficient(&self, min_chars: usize) -> bool {
        !self.text.is_empty() && self.chars() >= min_chars
    }
}

async fn run_pass(
    engine: &dyn OcrEngine,
    image: &GrayImage,
    config: &ScanConfig,
    relaxed: bool,
) -> Result<Pass, EatSafeError> {
    let (settings, threshold) = if relaxed {
        (config.relaxed_ocr_settings(), config.relaxed_confidence_threshold)
    } else {
        (config.ocr_settings(), config.confidence_threshold)
    };

    let raw = engine.recognize(image, &settings).await?;
    let tokens = filter_tokens(&raw, threshold, &settings.char_allowlist);
    let text = assemble_text(&tokens);
    debug!(
        "{} pass: {} raw tokens, {} kept at threshold {:.2}, {} chars",
        if relaxed { "Relaxed" } else { "Strict" },
        raw.len(),
        tokens.len(),
        threshold,
        text.chars().count()
    );
    Ok(Pass { tokens, text })
}

/// Extract label text from a preprocessed bitmap.
///
/// # Errors
/// - [`EatSafeError::NoTextFound`] when neither pass yields enough text
/// - [`EatSafeError::OcrEngineFailed`] when the engine itself fails
pub async fn extract_text(
    engine: &dyn OcrEngine,
    image: &GrayImage,
    config: &ScanConfig,
) -> Result<ExtractedText, EatSafeError> {
    let strict = run_pass(engine, image, config, false).await?;
    if strict.is_sufficient(config.min_text_chars) {
        return Ok(finish(strict, config.confidence_threshold, false, 1));
    }

    if !config.relaxed_retry {
        return Err(EatSafeError::NoTextFound {
            chars: strict.chars(),
            attempts: 1,
        });
    }

    warn!(
        "Only {} characters recognised with {}; retrying with relaxed settings",
        strict.chars(),
        engine.name()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_relaxed_retry(strict.chars());
    }

    let relaxed = run_pass(engine, image, config, true).await?;
    if relaxed.is_sufficient(config.min_text_chars) {
        info!("Relaxed OCR pass recovered {} characters", relaxed.chars());
        return Ok(finish(
            relaxed,
            config.relaxed_confidence_threshold,
            true,
            2,
        ));
    }

    Err(EatSafeError::NoTextFound {
        chars: relaxed.chars().max(strict.chars()),
        attempts: 2,
    })
}

fn finish(pass: Pass, threshold: f32, relaxed: bool, attempts: u32) -> ExtractedText {
    let mean_confidence = if pass.tokens.is_empty() {
        0.0
    } else {
        pass.tokens.iter().map(OcrToken::confidence).sum::<f32>() / pass.tokens.len() as f32
    };
    ExtractedText {
        text: pass.text,
        tokens: pass.tokens,
        threshold,
        relaxed,
        attempts,
        mean_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OcrSettings, PageSegMode, DEFAULT_CHAR_ALLOWLIST};
    use async_trait::async_trait;
    use image::Luma;
    use std::sync::Mutex;

    /// Returns one scripted token list per call and records the settings used.
    struct ScriptedEngine {
        responses: Mutex<Vec<Vec<OcrToken>>>,
        seen: Mutex<Vec<PageSegMode>>,
    }

    impl ScriptedEngine {
        fn new(responses: Vec<Vec<OcrToken>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<PageSegMode> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(
            &self,
            _image: &GrayImage,
            settings: &OcrSettings,
        ) -> Result<Vec<OcrToken>, EatSafeError> {
            self.seen.lock().unwrap().push(settings.page_seg_mode);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn tokens(words: &[(&str, f32)]) -> Vec<OcrToken> {
        words.iter().map(|(w, c)| OcrToken::new(*w, *c)).collect()
    }

    fn blank() -> GrayImage {
        GrayImage::from_pixel(32, 32, Luma([255]))
    }

    #[test]
    fn filter_is_strictly_above_threshold() {
        let t = tokens(&[("A", 0.30), ("B", 0.31)]);
        let kept = filter_tokens(&t, 0.30, DEFAULT_CHAR_ALLOWLIST);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "B");
    }

    #[test]
    fn lowering_threshold_never_removes_tokens() {
        let t = tokens(&[
            ("WATER", 0.9),
            ("SUGAR", 0.5),
            ("SALT", 0.2),
            ("x", 0.05),
            ("OIL", 0.31),
        ]);
        let mut previous: Vec<String> = Vec::new();
        for step in (0..=10).rev() {
            let threshold = step as f32 / 10.0;
            let kept: Vec<String> = filter_tokens(&t, threshold, DEFAULT_CHAR_ALLOWLIST)
                .into_iter()
                .map(|t| t.text)
                .collect();
            assert!(previous.iter().all(|p| kept.contains(p)));
            previous = kept;
        }
    }

    #[test]
    fn allowlist_strips_characters() {
        let t = tokens(&[("SUG@R", 0.9), ("§§", 0.9)]);
        let kept = filter_tokens(&t, 0.3, DEFAULT_CHAR_ALLOWLIST);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "SUGR");
    }

    #[tokio::test]
    async fn pipe_read_for_capital_i_survives_the_filter() {
        let engine = ScriptedEngine::new(vec![tokens(&[
            ("|NGREDIENTS:", 0.9),
            ("M|LK,", 0.9),
            ("SALT", 0.9),
        ])]);
        let out = extract_text(&engine, &blank(), &ScanConfig::default())
            .await
            .unwrap();
        assert_eq!(out.text, "INGREDIENTS: MILK, SALT");
        assert_eq!(out.tokens[0].text, "INGREDIENTS:");
    }

    #[tokio::test]
    async fn strict_pass_is_enough() {
        let engine = ScriptedEngine::new(vec![tokens(&[
            ("INGREDIENTS:", 0.95),
            ("WATER,", 0.9),
            ("SUGAR,", 0.9),
            ("SALT", 0.85),
        ])]);
        let config = ScanConfig::default();
        let out = extract_text(&engine, &blank(), &config).await.unwrap();
        assert_eq!(out.text, "INGREDIENTS: WATER, SUGAR, SALT");
        assert_eq!(out.attempts, 1);
        assert!(!out.relaxed);
        assert_eq!(engine.calls(), vec![PageSegMode::SingleBlock]);
        assert!((out.mean_confidence - 0.9).abs() < 1e-4);
    }

    #[tokio::test]
    async fn low_confidence_text_triggers_one_relaxed_retry() {
        let faint = tokens(&[("INGREDIENTS:", 0.2), ("OATS,", 0.15), ("HONEY", 0.12)]);
        let engine = ScriptedEngine::new(vec![faint.clone(), faint]);
        let config = ScanConfig::default();
        let out = extract_text(&engine, &blank(), &config).await.unwrap();
        assert!(out.relaxed);
        assert_eq!(out.attempts, 2);
        assert_eq!(out.text, "INGREDIENTS: OATS, HONEY");
        assert_eq!(
            engine.calls(),
            vec![PageSegMode::SingleBlock, PageSegMode::Auto]
        );
    }

    #[tokio::test]
    async fn retry_happens_at_most_once() {
        let engine = ScriptedEngine::new(vec![Vec::new(), Vec::new(), Vec::new()]);
        let err = extract_text(&engine, &blank(), &ScanConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EatSafeError::NoTextFound {
                chars: 0,
                attempts: 2
            }
        ));
        assert_eq!(engine.calls().len(), 2);
    }

    #[tokio::test]
    async fn retry_can_be_disabled() {
        let engine = ScriptedEngine::new(vec![tokens(&[("HI", 0.9)])]);
        let config = ScanConfig::builder().relaxed_retry(false).build().unwrap();
        let err = extract_text(&engine, &blank(), &config).await.unwrap_err();
        assert!(matches!(
            err,
            EatSafeError::NoTextFound {
                chars: 2,
                attempts: 1
            }
        ));
        assert_eq!(engine.calls().len(), 1);
    }
}
