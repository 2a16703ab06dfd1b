//! Error type shared by every resource and task façade.

use thiserror::Error;

use crate::exec::{CommandOutput, ExecError};

/// Errors raised by resources, clients, and task façades.
///
/// [`ResourceError::NotFound`] and [`ResourceError::NotImplemented`] are
/// control-flow sentinels: callers branch on them rather than treating them as
/// fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResourceError {
    /// The cloud object does not exist.
    #[error("resource not found")]
    NotFound,
    /// The operation is intentionally unsupported on this backend.
    #[error("operation not implemented for this provider")]
    NotImplemented,
    /// The provider refused a create because the object already exists.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    /// A prerequisite resource was used before it was created or read.
    #[error("{0} has not been resolved yet")]
    Unresolved(&'static str),
    /// Credentials are missing or malformed.
    #[error("credentials error: {0}")]
    Credentials(String),
    /// The caller supplied an invalid value.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Name of the offending field.
        field: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// The provider client reported a failure.
    #[error("{program} failed ({code}): {message}")]
    Provider {
        /// Client program that failed.
        program: String,
        /// Provider error code, or the exit status when none was reported.
        code: String,
        /// Message returned by the provider.
        message: String,
    },
    /// Output from a provider client could not be decoded.
    #[error("failed to parse {resource}: {message}")]
    Parse {
        /// Resource whose output was being decoded.
        resource: String,
        /// Decoder error message.
        message: String,
    },
    /// An operation exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// Local file system access failed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Deterministic key derivation failed.
    #[error("key derivation failed: {0}")]
    Key(String),
    /// A client program could not be started.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ResourceError {
    /// Builds a [`ResourceError::Invalid`] value.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Builds a [`ResourceError::Parse`] value.
    pub fn parse(resource: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Builds a [`ResourceError::Provider`] from a failed invocation, using
    /// the exit status as the code.
    #[must_use]
    pub fn from_output(program: &str, output: &CommandOutput) -> Self {
        Self::Provider {
            program: program.to_owned(),
            code: output
                .code
                .map_or_else(|| String::from("signal"), |code| code.to_string()),
            message: output.stderr.trim().to_owned(),
        }
    }

    /// Returns `true` for the [`ResourceError::NotFound`] sentinel.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Maps `NotFound` to success so deletes tolerate already-absent objects.
///
/// # Errors
///
/// Returns every error other than [`ResourceError::NotFound`] unchanged.
pub fn ignore_not_found(result: Result<(), ResourceError>) -> Result<(), ResourceError> {
    match result {
        Err(ResourceError::NotFound) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_not_found_swallows_only_absence() {
        assert_eq!(ignore_not_found(Err(ResourceError::NotFound)), Ok(()));
        assert_eq!(
            ignore_not_found(Err(ResourceError::NotImplemented)),
            Err(ResourceError::NotImplemented)
        );
    }

    #[test]
    fn provider_error_renders_code() {
        let err = ResourceError::Provider {
            program: String::from("aws"),
            code: String::from("ValidationError"),
            message: String::from("bad input"),
        };
        assert_eq!(err.to_string(), "aws failed (ValidationError): bad input");
    }
}
