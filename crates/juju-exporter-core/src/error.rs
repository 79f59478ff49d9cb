//! Error types for option loading and validation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A single problem with one option.
///
/// Only option names and failure categories are carried, never the offending
/// value of a secret option.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing required option '{0}'")]
    Missing(&'static str),

    #[error("invalid option '{option}': {reason}")]
    Invalid { option: &'static str, reason: String },
}

impl FieldError {
    pub fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        FieldError::Invalid {
            option,
            reason: reason.into(),
        }
    }

    /// Name of the option this error is about.
    pub fn option(&self) -> &'static str {
        match self {
            FieldError::Missing(option) => option,
            FieldError::Invalid { option, .. } => option,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldError::Missing(_))
    }
}

/// Every problem found in one validation pass, missing options first and then
/// invalid ones, each group in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub(crate) fn new(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of the options reported missing.
    pub fn missing(&self) -> Vec<&'static str> {
        self.0
            .iter()
            .filter(|e| e.is_missing())
            .map(FieldError::option)
            .collect()
    }

    /// Whether any error concerns the given option.
    pub fn mentions(&self, option: &str) -> bool {
        self.0.iter().any(|e| e.option() == option)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Failure to read an options file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML options: {0}")]
    Yaml(serde_yaml::Error),

    #[error("invalid TOML options: {0}")]
    Toml(toml::de::Error),
}
