//! Error types for profile compilation and rendering

use crate::error::AppError;

pub type ProfileResult<T> = std::result::Result<T, ProfileError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// Template is blank
    #[error("Profile template is empty")]
    EmptyTemplate,

    /// Template does not follow the grammar
    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// More than one of EXACT, FUZZY and WILDCARD on a field
    #[error("Field '{field}' combines mutually exclusive modifiers {first} and {second}")]
    ConflictingModifiers {
        field: String,
        first: String,
        second: String,
    },

    /// Same modifier given twice on a field
    #[error("Field '{field}' repeats modifier {modifier}")]
    DuplicateModifier { field: String, modifier: String },

    /// Template references a field the index does not have
    #[error("Unknown field '{0}' in profile template")]
    UnknownField(String),

    /// Required value absent under the `error` missing-data strategy
    #[error("Missing value for field '{field}' (placeholder '{placeholder}')")]
    MissingValue { field: String, placeholder: String },

    /// Payload value cannot be matched against its field
    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Payload is not `key:value||key:value`
    #[error("Invalid profile payload entry '{0}'")]
    InvalidPayload(String),
}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::MissingValue { .. }
            | ProfileError::InvalidValue { .. }
            | ProfileError::InvalidPayload(_) => {
                AppError::Validation(err.to_string())
            }
            _ => AppError::Configuration(err.to_string()),
        }
    }
}
