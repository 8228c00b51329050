//! # Authority Error Classification
//!
//! Maps authority failures to a retry category:
//!
//! | Failure                                   | Category  | Business |
//! |-------------------------------------------|-----------|----------|
//! | Technical error, timeout                  | Transient | no       |
//! | Rejection with a retryable code           | Transient | yes      |
//! | Any other rejection                       | Permanent | yes      |

use super::authority::AuthorityError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed on retry
    Transient,
    /// Will never succeed if retried
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    /// Whether the authority answered with a business rejection
    pub business: bool,
    pub code: Option<String>,
    pub message: String,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Transient
    }

    /// Label used in logs and events
    pub fn label(&self) -> &'static str {
        match (self.category, self.business) {
            (ErrorCategory::Transient, false) => "transient",
            (ErrorCategory::Transient, true) => "transient_business",
            (ErrorCategory::Permanent, _) => "permanent",
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &AuthorityError) -> ErrorClassification;

    /// Classify a failure already recorded in an error trail
    fn classify_recorded(&self, code: Option<&str>, message: &str) -> ErrorClassification;
}

/// Classifier driven by the configured retryable rejection codes
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    retryable_codes: HashSet<String>,
}

impl StandardErrorClassifier {
    pub fn new<I, S>(retryable_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            retryable_codes: retryable_codes.into_iter().map(Into::into).collect(),
        }
    }

    fn rejection(&self, code: &str, message: &str) -> ErrorClassification {
        let category = if self.retryable_codes.contains(code) {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        };
        ErrorClassification {
            category,
            business: true,
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &AuthorityError) -> ErrorClassification {
        match error {
            AuthorityError::BusinessRejection { code, message } => self.rejection(code, message),
            AuthorityError::Technical { .. } | AuthorityError::Timeout { .. } => {
                ErrorClassification {
                    category: ErrorCategory::Transient,
                    business: false,
                    code: error.code().map(str::to_string),
                    message: error.message(),
                }
            }
        }
    }

    fn classify_recorded(&self, code: Option<&str>, message: &str) -> ErrorClassification {
        match code {
            Some(code) if self.retryable_codes.contains(code) => self.rejection(code, message),
            _ => ErrorClassification {
                category: ErrorCategory::Transient,
                business: false,
                code: code.map(str::to_string),
                message: message.to_string(),
            },
        }
    }
}
