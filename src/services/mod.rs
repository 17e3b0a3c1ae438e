pub mod database;
pub mod extraction;
pub mod gemini; // Google Generative Language API client
pub mod openfoodfacts;

pub use database::Database;
pub use extraction::{ExtractionError, ExtractionOutcome, ExtractionPipeline};
pub use gemini::{GeminiClient, GenerativeBackend, InlineImage};
pub use openfoodfacts::{OpenFoodFactsClient, ProductFormat, ProductView};
