//! Deterministic cleanup of OCR text before it is shown or analysed.
//!
//! Tesseract output for a photographed label is full of small artefacts:
//! runs of spaces where columns were, `|` for a capital I, stray quote
//! marks from glare, and punctuation glued to the wrong word. The rules
//! below fix those without inventing content.
//!
//! Rules (applied in order):
//! 1. Pipe characters become `I`
//! 2. Characters outside the label set are removed
//! 3. Whitespace runs collapse to a single space
//! 4. `, . ; :` lose the space before them and get exactly one after,
//!    except between two digits (`2.5`, `1,000`)
//! 5. Leading and trailing whitespace is trimmed

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw OCR text.
pub fn clean_ocr_text(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    let s = replace_pipes(input);
    let s = remove_artifacts(&s);
    let s = collapse_whitespace(&s);
    let s = space_punctuation(&s);
    collapse_whitespace(&s).trim().to_string()
}

// ── Rule 1: Pipe → I ─────────────────────────────────────────────────────

fn replace_pipes(input: &str) -> String {
    input.chars().map(fold_pipe).collect()
}

/// Tesseract reads a capital I as `|` on many label fonts. The token filter
/// folds it before the allowlist strips `|`.
pub(crate) fn fold_pipe(c: char) -> char {
    if c == '|' {
        'I'
    } else {
        c
    }
}

// ── Rule 2: Remove characters outside the label set ──────────────────────

static RE_ARTIFACTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s,.:;()\[\]{}\-%/]").unwrap());

fn remove_artifacts(input: &str) -> String {
    RE_ARTIFACTS.replace_all(input, "").into_owned()
}

// ── Rule 3: Collapse whitespace ──────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").into_owned()
}

// ── Rule 4: Punctuation spacing ──────────────────────────────────────────

fn space_punctuation(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);

    for (i, &c) in chars.iter().enumerate() {
        if !matches!(c, ',' | '.' | ';' | ':') {
            out.push(c);
            continue;
        }

        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        let next = chars.get(i + 1).copied();
        let numeric = prev.is_some_and(|p| p.is_ascii_digit())
            && next.is_some_and(|n| n.is_ascii_digit());
        if numeric {
            out.push(c);
            continue;
        }

        while out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
        if next.is_some_and(|n| n != ' ') {
            out.push(' ');
        }
    }
    out
}
