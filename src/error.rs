use crate::config::ConfigError;

/// Canonical error type used across all modules.
///
/// The aggregator core never fails; these come from the layers around it
/// (configuration, file I/O, output serialization, CLI input).
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Broad error category, used for the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad invocation or configuration.
    Usage,
    /// Reading input or writing output failed.
    Io,
    /// The input could not be interpreted.
    Data,
}

impl CanonicalError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            CanonicalError::Config(_) | CanonicalError::UnsupportedDialect(_) => {
                ErrorCategory::Usage
            }
            CanonicalError::Io(_) => ErrorCategory::Io,
            CanonicalError::Json(_) | CanonicalError::InvalidInput(_) => ErrorCategory::Data,
        }
    }

    /// Exit status following the BSD `sysexits` convention.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Usage => 64,
            ErrorCategory::Data => 65,
            ErrorCategory::Io => 74,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            CanonicalError::UnsupportedDialect("x".into()).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            CanonicalError::Config(ConfigError::Validation("bad".into())).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            CanonicalError::Io(std::io::Error::other("disk")).category(),
            ErrorCategory::Io
        );
        assert_eq!(
            CanonicalError::InvalidInput("not json".into()).category(),
            ErrorCategory::Data
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CanonicalError::UnsupportedDialect("x".into()).exit_code(), 64);
        assert_eq!(CanonicalError::InvalidInput("x".into()).exit_code(), 65);
        assert_eq!(CanonicalError::Io(std::io::Error::other("x")).exit_code(), 74);
    }

    #[test]
    fn test_display_messages() {
        let err = CanonicalError::UnsupportedDialect("cohere".into());
        assert_eq!(err.to_string(), "Unsupported dialect: cohere");
        let err: CanonicalError = serde_json::from_str::<serde_json::Value>("{")
            .map_err(CanonicalError::from)
            .expect_err("invalid json");
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
