use thiserror::Error;

/// Top-level error type for the Vocaria system.
///
/// Subsystem crates define their own error types and implement
/// `From<VocariaError>` (or the reverse) so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VocariaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Voice channel error: {0}")]
    Voice(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for VocariaError {
    fn from(err: toml::de::Error) -> Self {
        VocariaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VocariaError {
    fn from(err: toml::ser::Error) -> Self {
        VocariaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VocariaError {
    fn from(err: serde_json::Error) -> Self {
        VocariaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Vocaria operations.
pub type Result<T> = std::result::Result<T, VocariaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VocariaError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(VocariaError, &str)> = vec![
            (
                VocariaError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                VocariaError::Voice("agent missing".to_string()),
                "Voice channel error: agent missing",
            ),
            (
                VocariaError::Persistence("timeout".to_string()),
                "Persistence error: timeout",
            ),
            (
                VocariaError::Session("already ended".to_string()),
                "Session error: already ended",
            ),
            (
                VocariaError::Api("not found".to_string()),
                "API error: not found",
            ),
            (
                VocariaError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
            (VocariaError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VocariaError = io_err.into();
        assert!(matches!(err, VocariaError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let bad_toml = "invalid = [[[";
        let err: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: VocariaError = err.unwrap_err().into();
        assert!(matches!(err, VocariaError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: VocariaError = err.unwrap_err().into();
        assert!(matches!(err, VocariaError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
