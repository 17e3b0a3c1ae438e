use anyhow::Result;
use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Inline image payload passed alongside a prompt.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Single capability every model backend exposes. The fallback invoker
/// only ever calls this, so backends can be swapped (or mocked in tests)
/// without touching the pipeline.
#[async_trait::async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

/// Client for the Google Generative Language REST API.
pub struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(image) = image {
            log::debug!(
                "🖼️ Attaching inline image: {} bytes, mime={}",
                image.data.len(),
                image.mime_type
            );
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: general_purpose::STANDARD.encode(&image.data),
                },
            });
        }
        parts.push(Part::Text {
            text: prompt.to_string(),
        });

        let request = GenerateRequest {
            contents: vec![Content { parts }],
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, model, self.api_key
        );

        log::debug!("🤖 Calling Gemini model: {}", model);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            log::warn!("❌ Gemini API error ({}): {}", status, error_text);
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let generated: GenerateResponse = response.json().await?;

        let text = generated
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))?;

        log::debug!("📄 Model {} returned {} chars", model, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_with_image() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: "aGVsbG8=".to_string(),
                        },
                    },
                    Part::Text {
                        text: "extract".to_string(),
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "extract");
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"nutrition\": {}}"}]}}
            ]
        }"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.candidates[0].content.parts[0].text, "{\"nutrition\": {}}");
    }
}
