//! Prompts for ingredient analysis.
//!
//! Every prompt lives here so wording changes touch one file and tests can
//! inspect the exact text sent to the model. Callers can replace the
//! analysis system prompt via [`crate::config::ScanConfig::system_prompt`].

/// Default system prompt for ingredient analysis.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a food science expert specializing in ingredient analysis. \
Provide accurate, helpful information about food ingredients.";

/// System prompt for single-ingredient explanations.
pub const DETAILS_SYSTEM_PROMPT: &str =
    "You are a food science expert. Provide accurate information about food ingredients.";

/// Sampling settings for [`ingredient_details_prompt`] requests.
pub const DETAILS_TEMPERATURE: f32 = 0.2;
pub const DETAILS_MAX_TOKENS: usize = 500;

/// Build the user prompt that asks for a structured analysis of `ingredients_text`.
pub fn analysis_prompt(ingredients_text: &str) -> String {
    format!(
        r#"Analyze the following ingredients text from a food package and provide a comprehensive analysis.

Ingredients text: "{ingredients_text}"

Respond with a single JSON object and nothing else, using this structure:
{{
    "ingredients": [
        {{
            "name": "ingredient name",
            "description": "brief description of what this ingredient is"
        }}
    ],
    "allergens": ["list of potential allergens"],
    "dietary_flags": ["vegetarian", "vegan", "gluten-free", etc.],
    "nutritional_insights": {{
        "health_score": 1-10,
        "categories": ["processed", "natural", "organic", etc.],
        "key_nutrients": ["list of notable nutrients"],
        "health_notes": "brief health assessment"
    }},
    "summary": "A brief summary of the product based on ingredients"
}}

Focus on:
1. Identifying individual ingredients clearly
2. Common allergens (milk, eggs, nuts, wheat, soy, etc.)
3. Dietary compatibility (vegetarian, vegan, gluten-free)
4. Health assessment based on ingredient quality
5. Brief nutritional insights

If the text doesn't contain clear ingredients, return empty arrays and null values."#
    )
}

/// Build the user prompt that asks about a single ingredient.
pub fn ingredient_details_prompt(name: &str) -> String {
    format!(
        r#"Provide detailed information about the food ingredient: "{name}"

Include:
1. What it is (source, type)
2. Common uses in food products
3. Nutritional properties
4. Any health considerations
5. Allergen information if applicable

Respond with a single JSON object and nothing else:
{{
    "name": "{name}",
    "description": "what it is",
    "uses": "common uses",
    "nutrition": "nutritional properties",
    "health_notes": "health considerations",
    "allergen_info": "allergen information or null"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_embeds_text_and_schema() {
        let p = analysis_prompt("WATER, SUGAR, SALT");
        assert!(p.contains("Ingredients text: \"WATER, SUGAR, SALT\""));
        for key in [
            "\"ingredients\"",
            "\"allergens\"",
            "\"dietary_flags\"",
            "\"nutritional_insights\"",
            "\"health_score\"",
            "\"summary\"",
        ] {
            assert!(p.contains(key), "missing {key}");
        }
        assert!(!p.contains("{{"));
    }

    #[test]
    fn details_prompt_names_the_ingredient_twice() {
        let p = ingredient_details_prompt("xanthan gum");
        assert_eq!(p.matches("xanthan gum").count(), 2);
        assert!(p.contains("\"allergen_info\""));
    }

    #[test]
    fn system_prompts_are_not_empty() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("food science"));
        assert!(!DETAILS_SYSTEM_PROMPT.is_empty());
    }
}
