use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;

use crate::models::{AttemptOutcome, ExtractionRequest, ModelAttempt};
use crate::services::gemini::{GenerativeBackend, InlineImage};

/// Terminal pipeline errors. Per-candidate failures stay inside the
/// pipeline as `ModelAttempt` records and never cross this boundary.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Gemini API key not configured")]
    MissingApiKey,
    #[error("{message}")]
    Exhausted { message: String },
}

/// Parsed nutrition data plus the per-model attempt log for diagnostics.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub data: Value,
    pub attempts: Vec<ModelAttempt>,
}

const IMAGE_PROMPT: &str = r#"You are analyzing a nutrition facts label image. Extract all nutritional information visible on this label. Return ONLY a valid JSON object with this exact format:

{
  "nutrition": {
    "energy": number in kcal per 100g (or convert from serving size),
    "fat": number in grams per 100g,
    "sugars": number in grams per 100g,
    "salt": number in grams per 100g,
    "protein": number in grams per 100g,
    "fiber": number in grams per 100g,
    "sodium": number in grams per 100g
  },
  "ingredients": "ingredients list as shown on label",
  "allergens": ["allergens listed on label"],
  "servingSize": "serving size information if visible"
}

IMPORTANT:
- Extract values directly from the nutrition facts label
- If values are per serving, convert to per 100g
- Use 0 for values not visible on the label
- Return ONLY the JSON object, no markdown, no code blocks"#;

fn text_prompt(query: &str) -> String {
    format!(
        r#"You are a nutrition expert. For the food "{query}", provide a JSON response with this exact structure:
{{
  "name": "",
  "brand": "",
  "originCountry": "",
  "nutrition": {{
    "energy": 0,
    "fat": 0,
    "sugars": 0,
    "salt": 0,
    "protein": 0,
    "fiber": 0,
    "carbs": 0
  }},
  "ingredients": "",
  "allergens": [],
  "nutriScore": "A",
  "ecoScore": "B",
  "description": "",
  "packaging": []
}}

Rules:
- Provide realistic nutrition per 100g or per serving if 100g not available.
- All numbers must be numeric (no strings with units).
- allergens should be an array of simple strings.
- packaging is list of materials if known.
- Use null when data unavailable.
Return ONLY valid JSON with no extra text."#
    )
}

/// Strip code fences and surrounding prose, keeping the greedy
/// first-`{` to last-`}` span. Returns `None` when no brace span exists.
pub fn sanitize_response(raw: &str) -> Option<String> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    Some(cleaned[start..=end].to_string())
}

fn parse_model_response(text: &str) -> anyhow::Result<Value> {
    let json_text =
        sanitize_response(text).ok_or_else(|| anyhow!("Model did not return JSON"))?;
    serde_json::from_str(&json_text)
        .map_err(|e| anyhow!("Failed to parse model JSON: {}", e))
}

fn zero_nutrition() -> Value {
    json!({
        "energy": 0,
        "fat": 0,
        "sugars": 0,
        "salt": 0,
        "protein": 0,
        "fiber": 0,
        "sodium": 0,
    })
}

/// Post-process a parsed model response into a usable nutrition record.
///
/// Allergens are only coerced to `[]` when they are neither an array nor a
/// string; comma-separated strings pass through untouched and are split at
/// the presentation layer instead.
pub fn normalize_record(value: &mut Value, query: Option<&str>) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    let nutrition_missing = obj.get("nutrition").map(Value::is_null).unwrap_or(true);
    if nutrition_missing {
        obj.insert("nutrition".to_string(), zero_nutrition());
    }

    match obj.get("allergens") {
        Some(Value::Array(_)) | Some(Value::String(_)) => {}
        _ => {
            obj.insert("allergens".to_string(), json!([]));
        }
    }

    if let Some(query) = query {
        let has_name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(|n| !n.is_empty())
            .unwrap_or(false);
        if !has_name {
            obj.insert("name".to_string(), json!(query));
        }
    }

    let has_origin = obj
        .get("originCountry")
        .and_then(Value::as_str)
        .map(|c| !c.is_empty())
        .unwrap_or(false);
    if !has_origin {
        obj.insert("originCountry".to_string(), Value::Null);
    }
}

/// Sequential-fallback extraction over an ordered candidate list.
///
/// Each attempt is raced against a fixed timeout; on expiry the in-flight
/// call is dropped and the next candidate is tried. The first response
/// that sanitizes and parses wins.
pub struct ExtractionPipeline {
    backend: Arc<dyn GenerativeBackend>,
    image_models: Vec<String>,
    text_models: Vec<String>,
    attempt_timeout: Duration,
}

impl ExtractionPipeline {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        image_models: Vec<String>,
        text_models: Vec<String>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            image_models,
            text_models,
            attempt_timeout,
        }
    }

    pub async fn extract(
        &self,
        request: ExtractionRequest,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        match request {
            ExtractionRequest::Image { data, mime_type } => {
                let image = InlineImage { data, mime_type };
                let mut outcome = self
                    .run(&self.image_models, IMAGE_PROMPT, Some(image))
                    .await?;
                normalize_record(&mut outcome.data, None);
                Ok(outcome)
            }
            ExtractionRequest::Text { query } => {
                let prompt = text_prompt(&query);
                let mut outcome = self.run(&self.text_models, &prompt, None).await?;
                normalize_record(&mut outcome.data, Some(&query));
                Ok(outcome)
            }
        }
    }

    async fn run(
        &self,
        models: &[String],
        prompt: &str,
        image: Option<InlineImage>,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let mut attempts: Vec<ModelAttempt> = Vec::new();
        let mut last_error = "no candidate models configured".to_string();

        for model in models {
            let started_at = Utc::now();
            log::info!("🤖 Trying extraction with model: {}", model);

            let call = self.backend.generate(model, prompt, image.as_ref());
            let result = match timeout(self.attempt_timeout, call).await {
                Ok(result) => result,
                // the in-flight call is dropped, not aborted at the transport level
                Err(_) => Err(anyhow!("Request timeout")),
            };

            match result.and_then(|text| parse_model_response(&text)) {
                Ok(data) => {
                    log::info!("✓ Model {} produced parseable nutrition data", model);
                    attempts.push(ModelAttempt {
                        model_name: model.clone(),
                        started_at,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(ExtractionOutcome { data, attempts });
                }
                Err(e) => {
                    let message = e.to_string();
                    log::warn!("✗ Model {} failed: {}", model, message);
                    attempts.push(ModelAttempt {
                        model_name: model.clone(),
                        started_at,
                        outcome: AttemptOutcome::Failure(message.clone()),
                    });
                    last_error = message;
                }
            }
        }

        log::error!(
            "❌ All {} candidate models failed, last error: {}",
            models.len(),
            last_error
        );
        Err(ExtractionError::Exhausted {
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays a fixed script, one entry per model call.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _image: Option<&InlineImage>,
        ) -> anyhow::Result<String> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra model call");
            next.map_err(|e| anyhow!(e))
        }
    }

    /// Backend whose calls never complete, to exercise the attempt timeout.
    struct HangingBackend;

    #[async_trait::async_trait]
    impl GenerativeBackend for HangingBackend {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _image: Option<&InlineImage>,
        ) -> anyhow::Result<String> {
            std::future::pending().await
        }
    }

    fn models(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("model-{}", i)).collect()
    }

    fn pipeline(backend: impl GenerativeBackend + 'static, n: usize) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(backend),
            models(n),
            models(n),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_sanitize_strips_fences_and_prose() {
        let raw = "Here is the data:\n```json\n{\"nutrition\": {\"energy\": 100}}\n```\nHope that helps!";
        let sanitized = sanitize_response(raw).unwrap();
        let parsed: Value = serde_json::from_str(&sanitized).unwrap();
        let expected: Value =
            serde_json::from_str("{\"nutrition\": {\"energy\": 100}}").unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_sanitize_bare_fences() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(sanitize_response(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_sanitize_no_brace_span() {
        assert!(sanitize_response("the label is unreadable").is_none());
        assert!(sanitize_response("").is_none());
    }

    #[test]
    fn test_normalize_defaults_missing_nutrition() {
        let mut value = json!({"ingredients": "water"});
        normalize_record(&mut value, None);

        assert_eq!(
            value["nutrition"],
            json!({
                "energy": 0,
                "fat": 0,
                "sugars": 0,
                "salt": 0,
                "protein": 0,
                "fiber": 0,
                "sodium": 0,
            })
        );
    }

    #[test]
    fn test_normalize_keeps_allergen_string_untouched() {
        let mut value = json!({"nutrition": {}, "allergens": "peanuts, milk"});
        normalize_record(&mut value, None);
        assert_eq!(value["allergens"], json!("peanuts, milk"));

        let mut value = json!({"nutrition": {}, "allergens": 42});
        normalize_record(&mut value, None);
        assert_eq!(value["allergens"], json!([]));
    }

    #[test]
    fn test_normalize_fills_name_from_query() {
        let mut value = json!({"nutrition": {}, "allergens": []});
        normalize_record(&mut value, Some("banana"));
        assert_eq!(value["name"], json!("banana"));
        assert_eq!(value["originCountry"], Value::Null);

        let mut value = json!({"name": "Cavendish banana", "nutrition": {}, "allergens": []});
        normalize_record(&mut value, Some("banana"));
        assert_eq!(value["name"], json!("Cavendish banana"));
    }

    #[tokio::test]
    async fn test_first_success_stops_fallback() {
        let backend = ScriptedBackend::new(vec![
            Err("503 overloaded".to_string()),
            Err("quota exceeded".to_string()),
            Ok("```json\n{\"name\": \"oats\", \"nutrition\": {\"energy\": 380}}\n```".to_string()),
        ]);
        let pipeline = pipeline(backend, 5);

        let outcome = pipeline
            .extract(ExtractionRequest::Text {
                query: "oats".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.data["name"], json!("oats"));
        assert_eq!(outcome.attempts.len(), 3);
        let failures = outcome
            .attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failure(_)))
            .count();
        assert_eq!(failures, 2);
        assert_eq!(outcome.attempts[2].model_name, "model-2");
    }

    #[tokio::test]
    async fn test_unparseable_response_counts_as_attempt_failure() {
        let backend = ScriptedBackend::new(vec![
            Ok("I could not read the label, sorry.".to_string()),
            Ok("{\"nutrition\": {\"energy\": 52}}".to_string()),
        ]);
        let pipeline = pipeline(backend, 2);

        let outcome = pipeline
            .extract(ExtractionRequest::Image {
                data: vec![0xFF, 0xD8],
                mime_type: "image/jpeg".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.data["nutrition"]["energy"], json!(52));
        assert!(matches!(
            outcome.attempts[0].outcome,
            AttemptOutcome::Failure(ref m) if m == "Model did not return JSON"
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error() {
        let backend = ScriptedBackend::new(vec![
            Err("first error".to_string()),
            Err("second error".to_string()),
            Err("final error".to_string()),
        ]);
        let pipeline = pipeline(backend, 3);

        let err = pipeline
            .extract(ExtractionRequest::Text {
                query: "tofu".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            ExtractionError::Exhausted { message } => assert_eq!(message, "final error"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_on_every_candidate() {
        let pipeline = ExtractionPipeline::new(
            Arc::new(HangingBackend),
            models(3),
            models(3),
            Duration::from_millis(20),
        );

        let err = pipeline
            .extract(ExtractionRequest::Image {
                data: vec![0u8; 16],
                mime_type: "image/png".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            ExtractionError::Exhausted { message } => assert_eq!(message, "Request timeout"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_path_name_defaulted_when_model_omits_it() {
        let backend = ScriptedBackend::new(vec![Ok(
            "{\"nutrition\": {\"energy\": 89}, \"allergens\": []}".to_string(),
        )]);
        let pipeline = pipeline(backend, 1);

        let outcome = pipeline
            .extract(ExtractionRequest::Text {
                query: "banana".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.data["name"], json!("banana"));
    }

    #[test]
    fn test_text_prompt_embeds_query() {
        let prompt = text_prompt("greek yogurt");
        assert!(prompt.contains("\"greek yogurt\""));
        assert!(prompt.contains("Return ONLY valid JSON"));
    }
}
