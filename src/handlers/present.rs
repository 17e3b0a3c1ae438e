use serde_json::Value;

/// Map a terminal extraction error onto a message fit for end users.
/// Keys off well-known substrings; anything else longer than a couple of
/// characters is shown as-is.
pub fn friendly_error_message(message: &str) -> String {
    if message.contains("API key") {
        "Gemini API key is not configured. Please check your environment variables.".to_string()
    } else if message.contains("parse") {
        "Unable to read nutrition information. Try a clearer input.".to_string()
    } else if message.contains("network") || message.contains("fetch") {
        "Network error. Please check your internet connection and try again.".to_string()
    } else if message.len() > 2 {
        message.to_string()
    } else {
        "Failed to analyze item. Please try again.".to_string()
    }
}

/// Presentation-side allergen normalization. Unlike the pipeline
/// validator, this accepts comma-separated strings and splits them.
pub fn split_allergens(allergens: &Value) -> Vec<String> {
    match allergens {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(text) => text
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_comma_separated_string() {
        let allergens = json!("peanuts, milk");
        assert_eq!(split_allergens(&allergens), vec!["peanuts", "milk"]);
    }

    #[test]
    fn test_split_filters_blank_entries() {
        assert_eq!(
            split_allergens(&json!(["soy", "", "  ", "wheat"])),
            vec!["soy", "wheat"]
        );
        assert_eq!(split_allergens(&json!("a,, b ,")), vec!["a", "b"]);
    }

    #[test]
    fn test_split_non_array_non_string() {
        assert!(split_allergens(&json!(null)).is_empty());
        assert!(split_allergens(&json!(42)).is_empty());
    }

    #[test]
    fn test_friendly_messages() {
        assert!(friendly_error_message("Gemini API error (400): invalid API key")
            .contains("not configured"));
        assert!(friendly_error_message("Failed to parse model JSON: eof")
            .contains("clearer input"));
        assert!(friendly_error_message("network unreachable").contains("internet connection"));
        assert_eq!(friendly_error_message("Request timeout"), "Request timeout");
        assert_eq!(
            friendly_error_message(""),
            "Failed to analyze item. Please try again."
        );
    }
}
