//! Error types.
//!
//! The registry itself never fails: missing data is reported with `Option`
//! or [`Entity::NULL`](crate::Entity::NULL). The only recoverable errors come
//! from turning content strings into typed values.

use thiserror::Error;

/// Invalid content, e.g. an unknown enum name in a level or prefab file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// A string did not name any variant of an enum-like field.
    #[error("invalid {kind}: {value:?}")]
    InvalidVariant {
        /// Name of the field's type.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}

/// Result type for content conversions.
pub type ContentResult<T> = Result<T, ContentError>;
