//! Batch payload encoding.
//!
//! The warehouse's bulk-load endpoint ingests newline-delimited JSON: one
//! flat object per line, keyed by lowercase destination column name.
//! [`BatchEncoder`] owns a reusable spool buffer so a batch of tens of
//! thousands of rows is written once, without an intermediate `Vec` of
//! serialized records.

mod ndjson;

pub use ndjson::{BatchEncoder, encode_batch};

/// Encoding error.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Other(String),
}
