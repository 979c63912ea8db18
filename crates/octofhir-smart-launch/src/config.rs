//! SMART launch configuration.
//!
//! This module provides the configuration consumed by the launch service:
//! the callback URL, the default scope, HTTP limits and the identity token
//! trust policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::id_token::IdTokenPolicy;

/// Scope requested when a client does not carry its own override.
pub const DEFAULT_SCOPE: &str =
    "patient/Patient.read user/Practitioner.read launch openid profile online_scope fhirUser";

/// Root configuration for the SMART EHR launch client.
///
/// # Example (TOML)
///
/// ```toml
/// redirect_uri = "https://app.example.com/auth/smart/callback"
/// default_scope = "launch openid fhirUser patient/*.read"
/// request_timeout = "5s"
/// id_token_policy = "verify_signature"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmartLaunchConfig {
    /// Callback URL sent as `redirect_uri` in both the authorize redirect
    /// and the token request.
    pub redirect_uri: Url,

    /// Scope requested when the client has no scope override.
    pub default_scope: String,

    /// Timeout applied to every outbound HTTP call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Clock skew tolerance for identity token time claims.
    #[serde(with = "humantime_serde")]
    pub clock_skew_tolerance: Duration,

    /// Maximum accepted size of conformance and key set responses.
    pub max_response_size: usize,

    /// Whether to allow plain HTTP issuers and key set URLs.
    /// This should only be enabled for testing.
    pub allow_http: bool,

    /// How identity tokens from the token endpoint are trusted.
    pub id_token_policy: IdTokenPolicy,
}

impl Default for SmartLaunchConfig {
    fn default() -> Self {
        Self {
            redirect_uri: Url::parse("http://localhost:8080/auth/smart/callback")
                .unwrap_or_else(|_| unreachable!("static callback URL is valid")),
            default_scope: DEFAULT_SCOPE.to_string(),
            request_timeout: Duration::from_secs(5),
            clock_skew_tolerance: Duration::from_secs(60),
            max_response_size: 1024 * 1024, // 1 MB
            allow_http: false,
            id_token_policy: IdTokenPolicy::default(),
        }
    }
}

impl SmartLaunchConfig {
    /// Creates a configuration with the given callback URL and defaults
    /// for everything else.
    #[must_use]
    pub fn new(redirect_uri: Url) -> Self {
        Self {
            redirect_uri,
            ..Self::default()
        }
    }

    /// Sets the default scope.
    #[must_use]
    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the clock skew tolerance for token validation.
    #[must_use]
    pub fn with_clock_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_skew_tolerance = tolerance;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) issuer and key set URLs.
    ///
    /// # Warning
    ///
    /// This should only be used for testing.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Sets the identity token trust policy.
    #[must_use]
    pub fn with_id_token_policy(mut self, policy: IdTokenPolicy) -> Self {
        self.id_token_policy = policy;
        self
    }

    /// Builds the HTTP client shared by discovery, token exchange and key
    /// set fetches.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn build_http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| ConfigError::Build(format!("http client: {e}")))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_scope.trim().is_empty() {
            return Err(ConfigError::invalid("default_scope", "must not be empty"));
        }

        if !matches!(self.redirect_uri.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "redirect_uri",
                format!("unsupported scheme '{}'", self.redirect_uri.scheme()),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
        }

        if self.max_response_size == 0 {
            return Err(ConfigError::invalid("max_response_size", "must be non-zero"));
        }

        Ok(())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("config build error: {0}")]
    Build(String),

    /// The merged configuration has an invalid value.
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it is invalid.
        message: String,
    },
}

impl ConfigError {
    /// Creates an `Invalid` error.
    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::{ConfigError, SmartLaunchConfig};

    /// Default file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-smart.toml";

    /// Loads configuration from an optional TOML file, then applies
    /// environment overrides such as `OCTOFHIR_SMART__REQUEST_TIMEOUT=10s`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be merged or the result
    /// fails validation.
    pub fn load_config(path: Option<&str>) -> Result<SmartLaunchConfig, ConfigError> {
        let mut builder = Config::builder();

        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }

        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_SMART")
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: SmartLaunchConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Build(format!("deserialize: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}
