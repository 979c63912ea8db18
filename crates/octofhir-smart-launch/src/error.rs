//! SMART launch error types.
//!
//! This module defines all error types that can occur while driving an EHR
//! launch: issuer lookup, conformance discovery, launch session checks,
//! the authorization code exchange and identity token validation.

use std::fmt;

use crate::oauth::id_token::IdTokenError;
use crate::smart::conformance::DiscoveryError;

/// Text shown to end users for any failure that must not act as an oracle.
///
/// Wrong issuer, wrong state and replayed callbacks all collapse to this
/// message; the specific cause stays in the `Display` output for logs.
pub const GENERIC_LAUNCH_FAILURE: &str =
    "An error occurred. The launch could not be completed, please launch the application again.";

/// Errors that can occur during a SMART EHR launch.
#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    /// The launch request did not carry an `iss` parameter.
    #[error("No issuer specified")]
    MissingIssuer,

    /// No client is registered for the issuer.
    #[error("Unknown issuer: {issuer}")]
    UnknownIssuer {
        /// The issuer that was looked up.
        issuer: String,
    },

    /// The issuer's conformance document could not be fetched or understood.
    #[error("Conformance discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The callback `state` does not match the pending launch.
    #[error("An error occurred. Invalid state id")]
    InvalidState,

    /// The launch session is not waiting for a callback.
    #[error(
        "An error occurred. Invalid status ({}). This can occur if you inadvertently refreshed the page. Try to launch it again",
        .status.as_deref().unwrap_or("none")
    )]
    InvalidStatus {
        /// The status found in the session, if any.
        status: Option<String>,
    },

    /// The authorization server reported an OAuth error.
    #[error("An error occurred: {error} - {description}")]
    UpstreamAuth {
        /// The OAuth error code.
        error: String,
        /// The provider's error description.
        description: String,
    },

    /// The token endpoint could not be reached or answered unexpectedly.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Description of the failure.
        message: String,
    },

    /// The identity token could not be fetched against or verified.
    #[error("Identity token error: {0}")]
    IdToken(#[from] IdTokenError),

    /// The identity token was issued for another client.
    #[error("Audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        /// Our client id.
        expected: String,
        /// The audience found in the token.
        actual: String,
    },

    /// A required request parameter is missing or malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The session store failed or holds inconsistent launch data.
    #[error("Session error: {message}")]
    Session {
        /// Description of the session error.
        message: String,
    },

    /// The launch configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl SmartError {
    /// Creates a new `UnknownIssuer` error.
    #[must_use]
    pub fn unknown_issuer(issuer: impl Into<String>) -> Self {
        Self::UnknownIssuer {
            issuer: issuer.into(),
        }
    }

    /// Creates a new `InvalidStatus` error.
    #[must_use]
    pub fn invalid_status(status: Option<String>) -> Self {
        Self::InvalidStatus { status }
    }

    /// Creates a new `UpstreamAuth` error.
    #[must_use]
    pub fn upstream_auth(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::UpstreamAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    /// Creates a new `AudienceMismatch` error.
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::AudienceMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Session` error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the launch session rejected the callback.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::InvalidState | Self::InvalidStatus { .. })
    }

    /// Returns `true` if a remote party (EHR, authorization server) failed.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        match self {
            Self::Discovery(_) | Self::UpstreamAuth { .. } | Self::TokenExchange { .. } => true,
            Self::IdToken(err) => err.is_network_error(),
            _ => false,
        }
    }

    /// Returns `true` if a token or response failed validation.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        match self {
            Self::AudienceMismatch { .. } => true,
            Self::IdToken(err) => err.is_signature_error(),
            _ => false,
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingIssuer | Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::UnknownIssuer { .. } => ErrorCategory::Registration,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::InvalidState | Self::InvalidStatus { .. } => ErrorCategory::LaunchState,
            Self::UpstreamAuth { .. } | Self::TokenExchange { .. } => ErrorCategory::Authorization,
            Self::IdToken(_) | Self::AudienceMismatch { .. } => ErrorCategory::Identity,
            Self::Session { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the message to show the end user.
    ///
    /// Issuer and launch-state failures share one generic text so a forged
    /// callback cannot tell which check rejected it.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingIssuer
            | Self::UnknownIssuer { .. }
            | Self::InvalidState
            | Self::InvalidStatus { .. }
            | Self::Session { .. } => GENERIC_LAUNCH_FAILURE.to_string(),
            Self::UpstreamAuth { description, .. } => {
                format!("An error occurred: {description}")
            }
            Self::Discovery(_) | Self::TokenExchange { .. } => {
                "An error occurred. Could not get token.".to_string()
            }
            Self::IdToken(_) | Self::AudienceMismatch { .. } => {
                "An error occurred. Could not verify the user identity.".to_string()
            }
            Self::InvalidRequest { .. } | Self::Configuration { .. } => {
                "An error occurred.".to_string()
            }
        }
    }
}

/// Categories of launch errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed launch or callback requests.
    Validation,
    /// Issuer not registered with the client directory.
    Registration,
    /// Conformance discovery failures.
    Discovery,
    /// CSRF / replay protection rejected the callback.
    LaunchState,
    /// Authorization server errors.
    Authorization,
    /// Identity token verification errors.
    Identity,
    /// Session storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Registration => write!(f, "registration"),
            Self::Discovery => write!(f, "discovery"),
            Self::LaunchState => write!(f, "launch_state"),
            Self::Authorization => write!(f, "authorization"),
            Self::Identity => write!(f, "identity"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
