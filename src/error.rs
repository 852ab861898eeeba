//! Error types for the adaptive testing engine.
//!
//! Only conditions that must stop a session before (or instead of) serving an
//! item are errors. Non-convergence, bank exhaustion and numeric degeneracy are
//! reported as flags on the returned values.

use thiserror::Error;

use crate::item::{ItemId, ModelFamily};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CatError>;

#[derive(Debug, Error)]
pub enum CatError {
    /// Model name could not be parsed.
    #[error("invalid model name: {0}")]
    InvalidModel(String),

    /// Selection criterion could not be parsed.
    #[error("invalid selection criterion: {0}")]
    InvalidCriterion(String),

    /// Estimation method could not be parsed.
    #[error("invalid estimation method: {0}")]
    InvalidMethod(String),

    /// A parameter column required by the model is absent from the bank.
    #[error("item bank is missing column '{column}' required by the {model} model")]
    MissingColumn {
        model: ModelFamily,
        column: &'static str,
    },

    /// A single item carries an unusable parameter.
    #[error("item {item}: {reason}")]
    InvalidParameter { item: ItemId, reason: String },

    #[error("duplicate item id: {0}")]
    DuplicateItem(ItemId),

    #[error("item bank is empty")]
    EmptyBank,

    /// Bank was built for a different model than the configuration asks for.
    #[error("item bank uses the {bank} model but the configuration requests {config}")]
    ModelMismatch {
        bank: ModelFamily,
        config: ModelFamily,
    },

    #[error("min_items ({min_items}) exceeds max_items ({max_items})")]
    InvalidStoppingRule { min_items: usize, max_items: usize },

    /// Any other out-of-range configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse item bank JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("item {0} was already administered in this session")]
    AlreadyAdministered(ItemId),

    #[error("response {response} is out of range for item {item} ({categories} categories)")]
    InvalidResponse {
        item: ItemId,
        response: u32,
        categories: usize,
    },

    #[error("session is no longer active")]
    SessionFinished,
}

impl CatError {
    /// Returns `true` for errors that abort a session before any item is served.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CatError::InvalidModel(_)
                | CatError::InvalidCriterion(_)
                | CatError::InvalidMethod(_)
                | CatError::MissingColumn { .. }
                | CatError::InvalidParameter { .. }
                | CatError::DuplicateItem(_)
                | CatError::EmptyBank
                | CatError::ModelMismatch { .. }
                | CatError::InvalidStoppingRule { .. }
                | CatError::InvalidConfig(_)
                | CatError::Toml(_)
                | CatError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(CatError::EmptyBank.is_configuration());
        assert!(CatError::InvalidStoppingRule {
            min_items: 10,
            max_items: 5
        }
        .is_configuration());
        assert!(!CatError::SessionFinished.is_configuration());
        assert!(!CatError::UnknownItem(ItemId::Num(3)).is_configuration());
    }

    #[test]
    fn test_missing_column_message() {
        let err = CatError::MissingColumn {
            model: ModelFamily::ThreePl,
            column: "c",
        };
        assert_eq!(
            err.to_string(),
            "item bank is missing column 'c' required by the 3PL model"
        );
    }
}
