use std::env;
use std::time::Duration;

/// Default candidate lists, most capable first. The first model that
/// returns parseable JSON wins; the rest are fallbacks.
const DEFAULT_IMAGE_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro-latest",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-pro-vision",
    "gemini-pro",
];

const DEFAULT_TEXT_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
];

const DEFAULT_PLAN_MODEL: &str = "gemini-2.5-flash";

/// Application configuration, resolved once at startup from the
/// environment. A missing Gemini key is kept as `None` rather than a
/// startup failure so the extraction endpoints can report it per request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub database_url: Option<String>,
    pub image_models: Vec<String>,
    pub text_models: Vec<String>,
    pub plan_model: String,
    pub attempt_timeout: Duration,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        if gemini_api_key.is_none() {
            log::warn!("⚠️ GEMINI_API_KEY not set, extraction endpoints will report an error");
        }

        let database_url = env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());
        if database_url.is_none() {
            log::warn!("⚠️ DATABASE_URL not set, history/diet/reminder endpoints disabled");
        }

        Self {
            gemini_api_key,
            database_url,
            image_models: model_list("GEMINI_IMAGE_MODELS", DEFAULT_IMAGE_MODELS),
            text_models: model_list("GEMINI_TEXT_MODELS", DEFAULT_TEXT_MODELS),
            plan_model: env::var("GEMINI_PLAN_MODEL")
                .unwrap_or_else(|_| DEFAULT_PLAN_MODEL.to_string()),
            attempt_timeout: Duration::from_secs(
                env::var("EXTRACTION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(30),
            ),
            host: env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("APP_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
        }
    }
}

fn model_list(var: &str, defaults: &[&str]) -> Vec<String> {
    match env::var(var) {
        Ok(raw) => {
            let models: Vec<String> = raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if models.is_empty() {
                defaults.iter().map(|m| m.to_string()).collect()
            } else {
                models
            }
        }
        Err(_) => defaults.iter().map(|m| m.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidate_lists() {
        assert_eq!(DEFAULT_IMAGE_MODELS.len(), 7);
        assert_eq!(DEFAULT_TEXT_MODELS.len(), 3);
        assert_eq!(DEFAULT_IMAGE_MODELS[0], "gemini-2.5-flash");
    }

    #[test]
    fn test_model_list_parses_env_override() {
        std::env::set_var("TEST_MODEL_LIST", "model-a, model-b, ,model-c");
        let models = model_list("TEST_MODEL_LIST", DEFAULT_TEXT_MODELS);
        assert_eq!(models, vec!["model-a", "model-b", "model-c"]);
        std::env::remove_var("TEST_MODEL_LIST");
    }

    #[test]
    fn test_model_list_falls_back_to_defaults() {
        let models = model_list("TEST_MODEL_LIST_UNSET", DEFAULT_TEXT_MODELS);
        assert_eq!(models.len(), 3);
    }
}
