//! Validation errors for the entity model.

use thiserror::Error;

/// Input validation failure, raised before any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Name is empty, reserved, too long or contains a forbidden character.
    #[error("illegal file name: {0:?}")]
    IllegalFilename(String),

    /// Path is relative or not in cleaned form.
    #[error("illegal path: {0:?}")]
    IllegalPath(String),

    /// MIME type is not `type/subtype`.
    #[error("illegal mime type: {0:?}")]
    IllegalMime(String),

    /// Update timestamp precedes the creation timestamp.
    #[error("illegal time: updated_at {updated} is before created_at {created}")]
    IllegalTime { created: String, updated: String },
}

/// Result alias for model validation.
pub type ModelResult<T> = Result<T, ModelError>;
