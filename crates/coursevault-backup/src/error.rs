//! Error types for the backup/restore engine

use coursevault_core::LockStatus;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias using the engine's error type
pub type Result<T> = std::result::Result<T, BackupError>;

/// User-facing validation failures keyed by field (setting) name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when empty, otherwise a `BackupError::Validation`
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Engine error types
#[derive(Error, Debug)]
pub enum BackupError {
    /// Programmer error: the engine was driven in a way that can never work
    #[error("Coding error: {message}")]
    Coding { message: String },

    /// One or more user-supplied values were rejected
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A required id mapping does not exist
    #[error("Missing id mapping for {itemtype} {old_id}")]
    MissingMapping { itemtype: String, old_id: i64 },

    /// A step failed; remaining steps were not executed
    #[error("Step '{step}' (position {position}) failed: {source}")]
    StepFailed {
        step: String,
        position: usize,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Unknown setting: {name}")]
    UnknownSetting { name: String },

    #[error("Setting '{name}' is {status}")]
    SettingLocked { name: String, status: LockStatus },

    /// A controller operation was attempted in the wrong status
    #[error("Invalid job state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("XML error: {message}")]
    Xml { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] coursevault_core::Error),
}

impl BackupError {
    /// Create a coding error
    pub fn coding(message: impl Into<String>) -> Self {
        Self::Coding {
            message: message.into(),
        }
    }

    /// Create a missing mapping error
    pub fn missing_mapping(itemtype: impl Into<String>, old_id: i64) -> Self {
        Self::MissingMapping {
            itemtype: itemtype.into(),
            old_id,
        }
    }

    /// Create an XML error
    pub fn xml(message: impl fmt::Display) -> Self {
        Self::Xml {
            message: message.to_string(),
        }
    }

    /// Create an archive error
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// True for programmer errors, as opposed to data or user errors
    pub fn is_coding(&self) -> bool {
        match self {
            Self::Coding { .. } => true,
            Self::StepFailed { source, .. } => source.is_coding(),
            _ => false,
        }
    }

    /// The innermost error, looking through `StepFailed` wrappers
    pub fn root(&self) -> &BackupError {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<quick_xml::Error> for BackupError {
    fn from(e: quick_xml::Error) -> Self {
        Self::xml(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let mut errors = ValidationErrors::new();
        errors.add("users", "expected a boolean");
        errors.add("logs", "setting is locked-by-hierarchy");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("users"), Some("expected a boolean"));

        let err = errors.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: logs: setting is locked-by-hierarchy; users: expected a boolean"
        );
    }

    #[test]
    fn test_step_failed_root_and_coding() {
        let err = BackupError::StepFailed {
            step: "users".to_string(),
            position: 2,
            source: Box::new(BackupError::coding("step executed twice")),
        };
        assert!(err.is_coding());
        assert!(matches!(err.root(), BackupError::Coding { .. }));
        assert!(err.to_string().starts_with("Step 'users' (position 2) failed"));
    }

    #[test]
    fn test_missing_mapping_is_not_coding() {
        let err = BackupError::missing_mapping("course_section", 12);
        assert!(!err.is_coding());
        assert_eq!(err.to_string(), "Missing id mapping for course_section 12");
    }
}
