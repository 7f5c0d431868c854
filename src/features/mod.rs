//! Feature extraction: the frozen schema and the extractor that fills it.

pub mod extractor;
pub mod schema;

pub use extractor::extract;
pub use schema::{FeatureVector, FEATURE_COUNT, FEATURE_SCHEMA_VERSION, UNKNOWN_LABEL};
