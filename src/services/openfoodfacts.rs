use anyhow::Result;
use serde_json::Value;

use crate::models::{Product, ProductNutrition, ProductSummary};

const OFF_API_BASE: &str = "https://world.openfoodfacts.org";

/// How a product payload is returned to the caller: `Cleaned` applies the
/// normalization below, `Raw` passes the upstream payload through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFormat {
    Cleaned,
    Raw,
}

impl ProductFormat {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("raw") => ProductFormat::Raw,
            _ => ProductFormat::Cleaned,
        }
    }
}

#[derive(Debug)]
pub enum ProductView {
    Cleaned(Box<Product>),
    Raw(Value),
}

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenFoodFactsClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OFF_API_BASE.to_string(),
        }
    }

    /// Search products by free-text query. Rows without a name or barcode
    /// are dropped.
    pub async fn search(&self, query: &str) -> Result<Vec<ProductSummary>> {
        let url = format!("{}/cgi/search.pl", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("search_terms", query),
                ("search_simple", "1"),
                ("action", "process"),
                ("json", "1"),
                ("page_size", "20"),
                (
                    "fields",
                    "code,product_name,brands,image_url,ecoscore_grade,nutriscore_grade",
                ),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("OpenFoodFacts search failed: HTTP {}", response.status());
        }

        let body: Value = response.json().await?;
        let products = body
            .get("products")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        log::debug!("🔍 OpenFoodFacts returned {} raw search rows", products.len());

        Ok(products.iter().filter_map(summarize_product).collect())
    }

    /// Fetch one product by barcode. Returns `None` when the product does
    /// not exist upstream.
    pub async fn product(&self, id: &str, format: ProductFormat) -> Result<Option<ProductView>> {
        let url = format!("{}/api/v0/product/{}.json", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("OpenFoodFacts product fetch failed: HTTP {}", response.status());
        }

        let body: Value = response.json().await?;
        if body.get("status").and_then(Value::as_i64) == Some(0) {
            return Ok(None);
        }
        let Some(product) = body.get("product").filter(|p| p.is_object()) else {
            return Ok(None);
        };

        Ok(Some(match format {
            ProductFormat::Cleaned => ProductView::Cleaned(Box::new(normalize_product(product))),
            ProductFormat::Raw => ProductView::Raw(product.clone()),
        }))
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn grade(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).map(|g| g.to_uppercase())
}

fn numeric(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn tag_list(value: &Value, key: &str, strip_dashes: bool) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(|tag| {
                    let cleaned = tag.trim_start_matches("en:");
                    if strip_dashes {
                        cleaned.replace('-', " ")
                    } else {
                        cleaned.to_uppercase()
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Reduce a raw search row to the summary shape, dropping unusable rows.
pub fn summarize_product(product: &Value) -> Option<ProductSummary> {
    let code = str_field(product, "code")?;
    let name = str_field(product, "product_name")?;

    Some(ProductSummary {
        id: code.to_string(),
        name: name.to_string(),
        brand: str_field(product, "brands").unwrap_or("Unknown Brand").to_string(),
        image: str_field(product, "image_url")
            .unwrap_or("/placeholder.svg")
            .to_string(),
        nutri_score: grade(product, "nutriscore_grade"),
        eco_score: grade(product, "ecoscore_grade"),
    })
}

/// Normalize a full OpenFoodFacts product payload to the uniform schema.
pub fn normalize_product(product: &Value) -> Product {
    let empty = Value::Object(Default::default());
    let nutriments = product.get("nutriments").unwrap_or(&empty);

    let energy = {
        let kcal = numeric(nutriments, "energy-kcal_100g");
        if kcal > 0.0 {
            kcal
        } else {
            numeric(nutriments, "energy_100g")
        }
    };

    let carbon_footprint = product
        .get("ecoscore_data")
        .and_then(|d| d.get("agribalyse"))
        .and_then(|a| a.get("co2_total"))
        .and_then(Value::as_f64);

    Product {
        id: str_field(product, "code")
            .or_else(|| str_field(product, "_id"))
            .unwrap_or("")
            .to_string(),
        name: str_field(product, "product_name")
            .or_else(|| str_field(product, "abbreviated_product_name"))
            .unwrap_or("Unknown Product")
            .to_string(),
        brand: str_field(product, "brands").unwrap_or("Unknown Brand").to_string(),
        image: str_field(product, "image_url")
            .or_else(|| str_field(product, "image_front_url"))
            .unwrap_or("/placeholder.svg")
            .to_string(),
        nutri_score: grade(product, "nutriscore_grade"),
        eco_score: grade(product, "ecoscore_grade"),
        additives: tag_list(product, "additives_tags", false),
        nutrition: ProductNutrition {
            energy,
            fat: numeric(nutriments, "fat_100g"),
            sugars: numeric(nutriments, "sugars_100g"),
            salt: numeric(nutriments, "salt_100g"),
            protein: numeric(nutriments, "proteins_100g"),
            saturated_fat: numeric(nutriments, "saturated-fat_100g"),
            fiber: numeric(nutriments, "fiber_100g"),
            sodium: numeric(nutriments, "sodium_100g"),
        },
        packaging: tag_list(product, "packaging_tags", true),
        carbon_footprint,
        ingredients: str_field(product, "ingredients_text")
            .unwrap_or("No ingredients listed")
            .to_string(),
        categories: tag_list(product, "categories_tags", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_drops_rows_without_name_or_code() {
        assert!(summarize_product(&json!({"code": "123"})).is_none());
        assert!(summarize_product(&json!({"product_name": "Milk"})).is_none());

        let summary =
            summarize_product(&json!({"code": "123", "product_name": "Milk"})).unwrap();
        assert_eq!(summary.id, "123");
        assert_eq!(summary.brand, "Unknown Brand");
        assert_eq!(summary.image, "/placeholder.svg");
        assert!(summary.nutri_score.is_none());
    }

    #[test]
    fn test_normalize_product_full_payload() {
        let raw = json!({
            "code": "3017620422003",
            "product_name": "Hazelnut spread",
            "brands": "TestBrand",
            "image_url": "https://img.example/p.jpg",
            "nutriscore_grade": "e",
            "ecoscore_grade": "d",
            "additives_tags": ["en:e322", "en:e476"],
            "packaging_tags": ["en:glass-jar", "en:metal-lid"],
            "categories_tags": ["en:sweet-spreads"],
            "ingredients_text": "Sugar, palm oil, hazelnuts",
            "nutriments": {
                "energy-kcal_100g": 539.0,
                "fat_100g": 30.9,
                "sugars_100g": 56.3,
                "salt_100g": 0.107,
                "proteins_100g": 6.3,
                "saturated-fat_100g": 10.6,
                "fiber_100g": 0.0,
                "sodium_100g": 0.0428
            },
            "ecoscore_data": {"agribalyse": {"co2_total": 9.01}}
        });

        let product = normalize_product(&raw);
        assert_eq!(product.id, "3017620422003");
        assert_eq!(product.nutri_score.as_deref(), Some("E"));
        assert_eq!(product.additives, vec!["E322", "E476"]);
        assert_eq!(product.packaging, vec!["glass jar", "metal lid"]);
        assert_eq!(product.categories, vec!["sweet spreads"]);
        assert_eq!(product.nutrition.energy, 539.0);
        assert_eq!(product.nutrition.sodium, 0.0428);
        assert_eq!(product.carbon_footprint, Some(9.01));
    }

    #[test]
    fn test_normalize_product_sparse_payload_defaults() {
        let product = normalize_product(&json!({"_id": "42"}));
        assert_eq!(product.id, "42");
        assert_eq!(product.name, "Unknown Product");
        assert_eq!(product.ingredients, "No ingredients listed");
        assert_eq!(product.nutrition.energy, 0.0);
        assert!(product.additives.is_empty());
        assert!(product.carbon_footprint.is_none());
    }

    #[test]
    fn test_energy_falls_back_to_kj_field() {
        let product = normalize_product(&json!({
            "code": "1",
            "nutriments": {"energy_100g": 1200.0}
        }));
        assert_eq!(product.nutrition.energy, 1200.0);
    }

    #[test]
    fn test_product_format_from_query() {
        assert_eq!(ProductFormat::from_query(Some("raw")), ProductFormat::Raw);
        assert_eq!(ProductFormat::from_query(Some("cleaned")), ProductFormat::Cleaned);
        assert_eq!(ProductFormat::from_query(None), ProductFormat::Cleaned);
    }
}
