pub mod present;
pub mod reminder;

pub use reminder::ReminderSweeper;

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::models::{DailyGoals, ExtractionRequest, MealType, NutritionRecord};
use crate::services::{
    Database, ExtractionError, ExtractionPipeline, GenerativeBackend, OpenFoodFactsClient,
    ProductFormat, ProductView,
};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Option<Arc<ExtractionPipeline>>,
    pub gemini: Option<Arc<dyn GenerativeBackend>>,
    pub off: Arc<OpenFoodFactsClient>,
    pub db: Option<Arc<Database>>,
    pub plan_model: String,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/extract-nutrition", post(extract_nutrition))
        .route("/nutrition-text", post(nutrition_text))
        .route("/search", get(search))
        .route("/product/:id", get(product_details))
        .route("/history", get(history_list).post(history_save))
        .route("/generate-plan", post(generate_plan))
        .route("/diet-log", get(diet_log_list).post(diet_log_save))
        .route("/goals", get(goals_get).put(goals_put))
        .route("/reminders", get(reminders_list).post(reminders_save))
        .route("/reminders/:id", delete(reminders_delete));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiResponse = (StatusCode, Json<Value>);

fn bad_request(message: &str) -> ApiResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal(error: &str, message: String) -> ApiResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": error, "message": message })),
    )
}

/// Terminal pipeline failures carry two strings: `error` is the
/// classifier's user-facing form, `message` is the raw model error.
fn extraction_failure(err: ExtractionError) -> ApiResponse {
    let message = err.to_string();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": present::friendly_error_message(&message),
            "message": message,
        })),
    )
}

fn require_pipeline(
    state: &AppState,
) -> Result<&Arc<ExtractionPipeline>, ApiResponse> {
    state
        .pipeline
        .as_ref()
        .ok_or_else(|| extraction_failure(ExtractionError::MissingApiKey))
}

fn require_db(state: &AppState) -> Result<&Arc<Database>, ApiResponse> {
    state.db.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Database not configured" })),
    ))
}

async fn health() -> &'static str {
    "OK"
}

// --- extraction ---

async fn extract_nutrition(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResponse {
    let pipeline = match require_pipeline(&state) {
        Ok(p) => p.clone(),
        Err(resp) => return resp,
    };

    let mut image: Option<(Vec<u8>, String)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("image") {
            let mime_type = field
                .content_type()
                .map(|ct| ct.to_string())
                .unwrap_or_else(|| "image/jpeg".to_string());
            match field.bytes().await {
                Ok(bytes) => {
                    image = Some((bytes.to_vec(), mime_type));
                    break;
                }
                Err(e) => {
                    log::warn!("⚠️ Failed to read uploaded image: {}", e);
                    return bad_request("No image file provided");
                }
            }
        }
    }

    let Some((data, mime_type)) = image else {
        return bad_request("No image file provided");
    };

    log::info!("📸 Extracting nutrition from label ({} bytes, {})", data.len(), mime_type);

    match pipeline
        .extract(ExtractionRequest::Image { data, mime_type })
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(json!({ "data": outcome.data }))),
        Err(err) => extraction_failure(err),
    }
}

#[derive(Debug, Deserialize)]
struct TextQueryRequest {
    #[serde(default)]
    query: Option<String>,
}

async fn nutrition_text(
    State(state): State<AppState>,
    body: Option<Json<TextQueryRequest>>,
) -> ApiResponse {
    let pipeline = match require_pipeline(&state) {
        Ok(p) => p.clone(),
        Err(resp) => return resp,
    };

    // A malformed body is treated the same as a missing query
    let Some(query) = body
        .and_then(|Json(b)| b.query)
        .filter(|q| !q.trim().is_empty())
    else {
        return bad_request("Food name/query is required");
    };

    match pipeline.extract(ExtractionRequest::Text { query }).await {
        Ok(outcome) => (StatusCode::OK, Json(json!({ "data": outcome.data }))),
        Err(err) => extraction_failure(err),
    }
}

// --- product data ---

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResponse {
    let query = params.query.unwrap_or_default();
    if query.is_empty() || query.len() > 100 {
        return bad_request("Invalid query parameter");
    }

    match state.off.search(&query).await {
        Ok(products) => (StatusCode::OK, Json(json!({ "products": products }))),
        Err(e) => {
            log::error!("❌ Search failed for '{}': {}", query, e);
            internal("Failed to search products", e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProductParams {
    #[serde(default)]
    format: Option<String>,
}

async fn product_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ProductParams>,
) -> ApiResponse {
    if id.trim().is_empty() {
        return bad_request("Invalid product ID");
    }

    let format = ProductFormat::from_query(params.format.as_deref());

    match state.off.product(&id, format).await {
        Ok(Some(ProductView::Cleaned(product))) => {
            (StatusCode::OK, Json(json!({ "product": product })))
        }
        Ok(Some(ProductView::Raw(product))) => {
            (StatusCode::OK, Json(json!({ "product": product })))
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Product not found" })),
        ),
        Err(e) => {
            log::error!("❌ Product fetch failed for '{}': {}", id, e);
            internal("Failed to fetch product", e.to_string())
        }
    }
}

// --- search history ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListParams {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    10
}

async fn history_list(
    State(state): State<AppState>,
    Query(params): Query<HistoryListParams>,
) -> ApiResponse {
    let Ok(db) = require_db(&state) else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Database not configured", "history": [] })),
        );
    };

    match db.list_history(params.user_id.as_deref(), params.limit).await {
        Ok(history) => (StatusCode::OK, Json(json!({ "history": history }))),
        Err(e) => {
            log::error!("❌ History fetch failed: {}", e);
            internal("Failed to fetch history", e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Saving history never fails the caller: a broken store still answers
/// 201 with a null entry, matching the append-only, best-effort contract.
async fn history_save(
    State(state): State<AppState>,
    Json(body): Json<HistoryRequest>,
) -> ApiResponse {
    let Ok(db) = require_db(&state) else {
        return (StatusCode::CREATED, Json(json!({ "history": null })));
    };

    if body.query.trim().is_empty() {
        return bad_request("Invalid request data");
    }

    match db
        .insert_history(
            &body.query,
            body.product_id.as_deref(),
            body.user_id.as_deref(),
        )
        .await
    {
        Ok(entry) => (StatusCode::CREATED, Json(json!({ "history": entry }))),
        Err(e) => {
            log::warn!("⚠️ History save failed (swallowed): {}", e);
            (StatusCode::CREATED, Json(json!({ "history": null })))
        }
    }
}

// --- diet plan ---

#[derive(Debug, Default, Deserialize)]
struct PlanGoals {
    calories: Option<f64>,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlanLogEntry {
    #[serde(default)]
    calories: f64,
    #[serde(default)]
    protein: f64,
    #[serde(default)]
    carbs: f64,
    #[serde(default)]
    fat: f64,
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    goals: Option<PlanGoals>,
    #[serde(default)]
    logs: Vec<PlanLogEntry>,
}

fn sum_intake(logs: &[PlanLogEntry]) -> (f64, f64, f64, f64) {
    logs.iter().fold((0.0, 0.0, 0.0, 0.0), |acc, log| {
        (
            acc.0 + log.calories,
            acc.1 + log.protein,
            acc.2 + log.carbs,
            acc.3 + log.fat,
        )
    })
}

fn goal_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn plan_prompt(goals: &PlanGoals, totals: (f64, f64, f64, f64)) -> String {
    format!(
        "You are a certified nutritionist. Generate a personalized diet plan for the rest of the day based on the user's goals and current intake.\n\n\
         Goals (per day):\n\
         - Calories: {} kcal\n\
         - Protein: {} g\n\
         - Carbs: {} g\n\
         - Fat: {} g\n\n\
         Current intake today:\n\
         - Calories: {} kcal\n\
         - Protein: {} g\n\
         - Carbs: {} g\n\
         - Fat: {} g\n\n\
         Return a brief plan in this format:\n\
         - Summary of what's remaining\n\
         - Suggest 3 meals/snacks with approximate calories and macros\n\
         - One hydration reminder\n\
         - Motivational note\n\n\
         Keep it concise, friendly, and practical.",
        goal_value(goals.calories),
        goal_value(goals.protein),
        goal_value(goals.carbs),
        goal_value(goals.fat),
        totals.0.round(),
        totals.1.round(),
        totals.2.round(),
        totals.3.round(),
    )
}

async fn generate_plan(
    State(state): State<AppState>,
    Json(body): Json<PlanRequest>,
) -> ApiResponse {
    let Some(gemini) = state.gemini.as_ref() else {
        return extraction_failure(ExtractionError::MissingApiKey);
    };

    let Some(goals) = body.goals else {
        return bad_request("Goals are required to generate a plan");
    };

    let totals = sum_intake(&body.logs);
    let prompt = plan_prompt(&goals, totals);

    // Single-model call on purpose: plan text is free-form, there is no
    // JSON contract to fall back over.
    match gemini.generate(&state.plan_model, &prompt, None).await {
        Ok(plan) => (StatusCode::OK, Json(json!({ "plan": plan }))),
        Err(e) => {
            log::error!("❌ Plan generation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

// --- diet log ---

fn default_portion() -> String {
    "1 serving".to_string()
}

fn default_reminder_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DietLogRequest {
    user_id: String,
    #[serde(default)]
    date: Option<NaiveDate>,
    meal_type: MealType,
    #[serde(default = "default_portion")]
    portion: String,
    record: NutritionRecord,
    #[serde(default)]
    set_reminder: bool,
    #[serde(default = "default_reminder_minutes")]
    reminder_minutes: i64,
}

async fn diet_log_save(
    State(state): State<AppState>,
    Json(body): Json<DietLogRequest>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };

    let date = body.date.unwrap_or_else(|| Utc::now().date_naive());
    let record = &body.record;
    let product_name = record.name.clone().unwrap_or_else(|| "Unknown product".to_string());
    let allergens = present::split_allergens(&record.allergens);

    let entry = match db
        .insert_diet_log(
            &body.user_id,
            date,
            &product_name,
            record.brand.as_deref(),
            body.meal_type,
            &body.portion,
            record.nutrition.energy,
            record.nutrition.protein,
            record.nutrition.carbs.unwrap_or(0.0),
            record.nutrition.fat,
            &allergens,
        )
        .await
    {
        Ok(entry) => entry,
        Err(e) => {
            log::error!("❌ Diet log save failed: {}", e);
            return internal("Failed to save intake", e.to_string());
        }
    };

    if body.set_reminder {
        let remind_at = Utc::now() + ChronoDuration::minutes(body.reminder_minutes);
        let message = format!("Time to review your next meal after {}", body.meal_type);
        // Reminder scheduling is best-effort; the log entry already exists
        if let Err(e) = db.insert_reminder(&body.user_id, &message, remind_at).await {
            log::warn!("⚠️ Reminder scheduling failed (swallowed): {}", e);
        }
    }

    (StatusCode::CREATED, Json(json!({ "log": entry })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DietLogParams {
    user_id: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

async fn diet_log_list(
    State(state): State<AppState>,
    Query(params): Query<DietLogParams>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };

    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        return bad_request("userId is required");
    };
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());

    let logs = match db.list_diet_logs(&user_id, date).await {
        Ok(logs) => logs,
        Err(e) => return internal("Failed to fetch diet log", e.to_string()),
    };
    let totals = match db.daily_totals(&user_id, date).await {
        Ok(totals) => totals,
        Err(e) => return internal("Failed to fetch diet log", e.to_string()),
    };

    (StatusCode::OK, Json(json!({ "logs": logs, "totals": totals })))
}

// --- goals ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParams {
    user_id: Option<String>,
}

async fn goals_get(State(state): State<AppState>, Query(params): Query<UserParams>) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };
    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        return bad_request("userId is required");
    };

    match db.get_goals(&user_id).await {
        Ok(goals) => (StatusCode::OK, Json(json!({ "goals": goals }))),
        Err(e) => internal("Failed to fetch goals", e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalsRequest {
    user_id: String,
    #[serde(flatten)]
    goals: DailyGoals,
}

async fn goals_put(
    State(state): State<AppState>,
    Json(body): Json<GoalsRequest>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };

    match db.upsert_goals(&body.user_id, &body.goals).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "goals": body.goals }))),
        Err(e) => internal("Failed to update goals", e.to_string()),
    }
}

// --- reminders ---

async fn reminders_list(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };
    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        return bad_request("userId is required");
    };

    match db.list_reminders(&user_id).await {
        Ok(reminders) => (StatusCode::OK, Json(json!({ "reminders": reminders }))),
        Err(e) => internal("Failed to fetch reminders", e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReminderRequest {
    user_id: String,
    message: String,
    #[serde(default)]
    remind_at: Option<chrono::DateTime<Utc>>,
    #[serde(default = "default_reminder_minutes")]
    minutes: i64,
}

async fn reminders_save(
    State(state): State<AppState>,
    Json(body): Json<ReminderRequest>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };

    if body.message.trim().is_empty() {
        return bad_request("message is required");
    }

    let remind_at = body
        .remind_at
        .unwrap_or_else(|| Utc::now() + ChronoDuration::minutes(body.minutes));

    match db.insert_reminder(&body.user_id, &body.message, remind_at).await {
        Ok(reminder) => (StatusCode::CREATED, Json(json!({ "reminder": reminder }))),
        Err(e) => internal("Failed to schedule reminder", e.to_string()),
    }
}

async fn reminders_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<UserParams>,
) -> ApiResponse {
    let db = match require_db(&state) {
        Ok(db) => db,
        Err(resp) => return resp,
    };
    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        return bad_request("userId is required");
    };

    match db.delete_reminder(&user_id, id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "deleted": true }))),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Reminder not found" })),
        ),
        Err(e) => internal("Failed to delete reminder", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_intake() {
        let logs = vec![
            PlanLogEntry { calories: 320.0, protein: 12.0, carbs: 40.0, fat: 10.0 },
            PlanLogEntry { calories: 180.5, protein: 3.0, carbs: 22.0, fat: 7.5 },
        ];
        let (calories, protein, carbs, fat) = sum_intake(&logs);
        assert_eq!(calories, 500.5);
        assert_eq!(protein, 15.0);
        assert_eq!(carbs, 62.0);
        assert_eq!(fat, 17.5);
    }

    #[test]
    fn test_plan_prompt_handles_missing_goals() {
        let goals = PlanGoals {
            calories: Some(2000.0),
            ..Default::default()
        };
        let prompt = plan_prompt(&goals, (512.4, 20.0, 60.0, 15.0));

        assert!(prompt.contains("Calories: 2000 kcal"));
        assert!(prompt.contains("Protein: N/A g"));
        assert!(prompt.contains("Calories: 512 kcal"));
    }

    #[test]
    fn test_diet_log_request_defaults() {
        let json = r#"{
            "userId": "u1",
            "mealType": "lunch",
            "record": {"name": "Oat bar", "nutrition": {"energy": 180}, "allergens": "oats, nuts"}
        }"#;
        let request: DietLogRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.portion, "1 serving");
        assert_eq!(request.reminder_minutes, 60);
        assert!(!request.set_reminder);
        assert_eq!(
            present::split_allergens(&request.record.allergens),
            vec!["oats", "nuts"]
        );
    }
}
