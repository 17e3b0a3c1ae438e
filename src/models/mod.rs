use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work for the extraction pipeline: either a photographed
/// nutrition label or a free-text food query.
#[derive(Debug, Clone)]
pub enum ExtractionRequest {
    Image { data: Vec<u8>, mime_type: String },
    Text { query: String },
}

/// Diagnostic record of a single model attempt inside one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAttempt {
    pub model_name: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "error")]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

fn f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Models are told to emit bare numbers but occasionally send null
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// Per-100g nutrition values. Missing or null fields collapse to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NutritionFacts {
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub energy: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub fat: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub sugars: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub salt: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub protein: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub fiber: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub sodium: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
}

/// Normalized nutrition data as produced by the extraction pipeline.
///
/// `allergens` stays a raw JSON value on purpose: the pipeline validator
/// passes strings through untouched and only the presentation layer splits
/// comma-separated text (see `handlers::present::split_allergens`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
    #[serde(default)]
    pub nutrition: NutritionFacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    #[serde(default)]
    pub allergens: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutri_score: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eco_score: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaging: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Search hit from OpenFoodFacts, trimmed down for result lists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub image: String,
    pub nutri_score: Option<String>,
    pub eco_score: Option<String>,
}

/// Fully normalized OpenFoodFacts product (the `Cleaned` format).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub image: String,
    pub nutri_score: Option<String>,
    pub eco_score: Option<String>,
    pub additives: Vec<String>,
    pub nutrition: ProductNutrition,
    pub packaging: Vec<String>,
    pub carbon_footprint: Option<f64>,
    pub ingredients: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductNutrition {
    pub energy: f64,
    pub fat: f64,
    pub sugars: f64,
    pub salt: f64,
    pub protein: f64,
    pub saturated_fat: f64,
    pub fiber: f64,
    pub sodium: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub query: String,
    pub product_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DietLogEntry {
    pub id: i64,
    pub user_id: String,
    pub date: NaiveDate,
    pub product_name: String,
    pub brand: Option<String>,
    pub meal_type: MealType,
    pub portion: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub allergens: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl std::fmt::Display for MealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        };
        write!(f, "{}", s)
    }
}

impl MealType {
    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "breakfast" => Some(MealType::Breakfast),
            "lunch" => Some(MealType::Lunch),
            "dinner" => Some(MealType::Dinner),
            "snack" => Some(MealType::Snack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Scheduled,
    Due,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderStatus::Scheduled => "scheduled",
            ReminderStatus::Due => "due",
        };
        write!(f, "{}", s)
    }
}

impl ReminderStatus {
    pub fn from_string(s: &str) -> Self {
        match s {
            "due" => ReminderStatus::Due,
            _ => ReminderStatus::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyGoals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nutrition_facts_nulls_collapse_to_zero() {
        let json = r#"{"energy": 250, "fat": null, "protein": 8.5}"#;
        let facts: NutritionFacts = serde_json::from_str(json).unwrap();

        assert_eq!(facts.energy, 250.0);
        assert_eq!(facts.fat, 0.0);
        assert_eq!(facts.protein, 8.5);
        assert_eq!(facts.sodium, 0.0);
        assert!(facts.carbs.is_none());
    }

    #[test]
    fn test_nutrition_record_keeps_unknown_fields() {
        let json = r#"{
            "name": "Banana",
            "nutrition": {"energy": 89},
            "allergens": "none",
            "confidence": 0.9
        }"#;
        let record: NutritionRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.name.as_deref(), Some("Banana"));
        assert_eq!(record.allergens, serde_json::json!("none"));
        assert_eq!(
            record.extra.get("confidence"),
            Some(&serde_json::json!(0.9))
        );
    }

    #[test]
    fn test_meal_type_round_trip() {
        assert_eq!(MealType::from_string("Lunch"), Some(MealType::Lunch));
        assert_eq!(MealType::from_string("brunch"), None);
        assert_eq!(MealType::Dinner.to_string(), "dinner");
    }
}
