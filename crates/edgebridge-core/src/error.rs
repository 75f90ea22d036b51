//! Error type shared by the edgebridge crates.

/// Unified error type for configuration and core plumbing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors while reading configuration or mapping files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Build a [`Error::Config`] from a message or a format string.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_err_macro() {
        let err = config_err!("relay id {} is reserved", "OVERRIDE_ME");
        assert_eq!(
            err.to_string(),
            "Configuration error: relay id OVERRIDE_ME is reserved"
        );
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("relay_id = ");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)));
    }
}
