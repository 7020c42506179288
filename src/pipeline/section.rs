//! Locating the ingredient list on a label and keyword allergen matching.
//!
//! A label's OCR text usually carries much more than the ingredient list:
//! nutrition tables, storage instructions, best-before dates. Only the list
//! itself is sent to the model.

use once_cell::sync::Lazy;
use regex::Regex;

/// Shortest section accepted before falling back to the next heading form.
const MIN_SECTION_CHARS: usize = 10;

static RE_INGREDIENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ingredients?[:\s]+").unwrap());
static RE_CONTAINS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)contains?[:\s]+").unwrap());
static RE_MADE_WITH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)made\s*with[:\s]+").unwrap());

/// Headings that end an ingredient list.
static RE_STOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)nutrition|allergen|directions|net\s*weight|best\s*before|expiry|storage")
        .unwrap()
});

/// Same as [`RE_STOP`] plus `contains`, which ends a list introduced by
/// `ingredients:` but not one introduced by `contains:` itself.
static RE_STOP_OR_CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)nutrition|allergen|directions|contains|net\s*weight|best\s*before|expiry|storage",
    )
    .unwrap()
});

/// Return the ingredient list from label text, or the whole text when no
/// recognisable section of useful length is found.
///
/// Headings tried in order: `ingredients:`, `contains:`, `made with:`.
/// A section runs until the next heading such as "nutrition" or
/// "best before", or the end of the text.
pub fn ingredient_section(text: &str) -> &str {
    let patterns: [(&Regex, &Regex); 3] = [
        (&RE_INGREDIENTS, &RE_STOP_OR_CONTAINS),
        (&RE_CONTAINS, &RE_STOP),
        (&RE_MADE_WITH, &RE_STOP),
    ];

    for (start, stop) in patterns {
        if let Some(section) = section_after(text, start, stop) {
            if section.chars().count() > MIN_SECTION_CHARS {
                return section;
            }
        }
    }
    text
}

fn section_after<'a>(text: &'a str, start: &Regex, stop: &Regex) -> Option<&'a str> {
    let heading = start.find(text)?;
    let rest = &text[heading.end()..];
    let end = stop.find(rest).map_or(rest.len(), |m| m.start());
    Some(rest[..end].trim())
}

/// Allergen groups and the words that indicate them.
pub const ALLERGEN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "milk",
        &["milk", "dairy", "lactose", "cream", "butter", "cheese", "whey", "casein"],
    ),
    ("eggs", &["egg", "albumen", "lecithin"]),
    ("wheat", &["wheat", "flour", "gluten"]),
    ("soy", &["soy", "soya", "soybean"]),
    (
        "nuts",
        &["nuts", "almond", "walnut", "pecan", "hazelnut", "cashew", "pistachio"],
    ),
    ("peanuts", &["peanut", "groundnut"]),
    ("fish", &["fish", "salmon", "tuna", "cod"]),
    ("shellfish", &["shellfish", "shrimp", "crab", "lobster"]),
    ("sesame", &["sesame", "tahini"]),
];

/// Allergen groups whose keywords occur anywhere in `text` (case-insensitive
/// substring match), in table order.
pub fn detect_allergens(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    ALLERGEN_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(group, _)| group.to_string())
        .collect()
}
