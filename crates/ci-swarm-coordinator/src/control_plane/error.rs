//! Control-plane error classification
//!
//! The CLI reports failures on stderr as
//! `An error occurred (<Code>) when calling the <Op> operation: <message>`.
//! The code is extracted and mapped onto a small set of error kinds.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the coordinator library
pub type Result<T, E = SwarmError> = std::result::Result<T, E>;

/// Error kinds surfaced by the coordinator library
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Malformed or missing input, detected before any remote call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The control plane rejected the credentials
    #[error("{operation}: not authenticated: {message}")]
    Unauthenticated { operation: String, message: String },

    /// The remote invocation failed (non-zero exit or transport error)
    #[error(
        "{operation} failed{}: {message}",
        code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
    )]
    Unavailable {
        operation: String,
        code: Option<String>,
        message: String,
    },

    /// The call succeeded but the response lacks an expected field
    #[error("{operation}: response has no '{field}'")]
    UnexpectedResponse { operation: String, field: String },

    /// A bounded wait or poll ran out of time
    #[error(
        "Timeout in {operation} for {resource} after {}s (last state: {last_state})",
        elapsed.as_secs()
    )]
    Timeout {
        operation: String,
        resource: String,
        elapsed: Duration,
        last_state: String,
    },

    /// Local artifact decode/write failure
    #[error("Failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation was aborted through its cancellation token
    #[error("{operation} for {resource} cancelled")]
    Cancelled { operation: String, resource: String },

    /// Caller-supplied work failed
    #[error("Workload failed")]
    Workload(#[source] anyhow::Error),
}

impl SwarmError {
    /// Shorthand for `InvalidArgument`
    pub fn invalid(message: impl Into<String>) -> Self {
        SwarmError::InvalidArgument(message.into())
    }

    /// The control-plane error code, if the CLI reported one
    pub fn code(&self) -> Option<&str> {
        match self {
            SwarmError::Unavailable { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
    }

    /// Check if this is a bounded-wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, SwarmError::Timeout { .. })
    }

    /// Check if this was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SwarmError::Cancelled { .. })
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            SwarmError::Unauthenticated { .. } => Some(
                "Check the credentials profile and that the session has not expired.".to_string(),
            ),
            SwarmError::Unavailable { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

/// Known error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "ResourceNotFoundException",
];

/// Error codes meaning the credentials were rejected
const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
];

/// Stderr fragments the CLI prints before any request is sent
const CREDENTIAL_MESSAGES: &[&str] = &[
    "Unable to locate credentials",
    "could not be found",
    "Error loading SSO Token",
    "The SSO session associated with this profile has expired",
];

/// Classify a failed CLI invocation from its stderr.
pub fn classify_cli_failure(operation: &str, stderr: &str) -> SwarmError {
    let code = extract_error_code(stderr);
    let message = extract_message(stderr);

    let is_auth = match code.as_deref() {
        Some(c) => AUTH_CODES.contains(&c) || c.starts_with("AccessDenied"),
        None => CREDENTIAL_MESSAGES.iter().any(|m| stderr.contains(m)),
    };

    if is_auth {
        SwarmError::Unauthenticated {
            operation: operation.to_string(),
            message,
        }
    } else {
        SwarmError::Unavailable {
            operation: operation.to_string(),
            code,
            message,
        }
    }
}

/// Extract `<Code>` from `An error occurred (<Code>) when calling ...`
fn extract_error_code(stderr: &str) -> Option<String> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let rest = &stderr[start..];
    let end = rest.find(')')?;
    let code = rest[..end].trim();
    (!code.is_empty()).then(|| code.to_string())
}

/// The human-readable part of the CLI error, without the preamble
fn extract_message(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "no error output".to_string();
    }
    match trimmed.find(" operation: ") {
        Some(idx) => trimmed[idx + " operation: ".len()..].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientInstanceCapacity",
        "Try a different availability zone or instance type.",
    ),
    (
        "InstanceLimitExceeded",
        "Request a service limit increase via the Service Quotas console.",
    ),
    (
        "VcpuLimitExceeded",
        "Request a service limit increase via the Service Quotas console.",
    ),
    (
        "InvalidKeyPair.NotFound",
        "The key pair does not exist in this region.",
    ),
    (
        "InvalidGroup.NotFound",
        "One of the security groups does not exist in this region.",
    ),
    (
        "InvalidAMIID.NotFound",
        "The image ID does not exist in this region.",
    ),
    (
        "Unsupported",
        "This instance type may not be available in this region/AZ.",
    ),
    (
        "Throttling",
        "API rate limit hit. Retry the command after a short delay.",
    ),
    (
        "RequestLimitExceeded",
        "API rate limit hit. Retry the command after a short delay.",
    ),
    (
        "TooManyRequestsException",
        "API rate limit hit. Retry the command after a short delay.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
