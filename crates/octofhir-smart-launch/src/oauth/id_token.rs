//! Identity token validation.
//!
//! Identity tokens arrive from the token endpoint next to the access token.
//! Two trust policies are supported:
//!
//! - [`IdTokenPolicy::VerifySignature`] fetches the provider's OpenID
//!   configuration, follows its `jwks_uri` and verifies the RS256 signature.
//! - [`IdTokenPolicy::TrustTokenEndpoint`] decodes the payload without
//!   checking the signature, relying on the direct TLS channel to the token
//!   endpoint that produced it.
//!
//! Neither policy checks the audience. The launch flow binds `aud` to the
//! client id right after decoding.

use std::collections::HashMap;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SmartLaunchConfig;

/// How identity tokens from the token endpoint are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdTokenPolicy {
    /// Verify the RS256 signature against the provider's key set.
    #[default]
    VerifySignature,
    /// Accept the token because it came straight from the token endpoint.
    TrustTokenEndpoint,
}

/// Errors that can occur while validating an identity token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdTokenError {
    /// A network error occurred while fetching the configuration or keys.
    #[error("Network error: {0}")]
    Network(String),

    /// A fetch returned a non-success status code.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// A fetched document could not be parsed.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The OpenID configuration has no `jwks_uri`.
    #[error("OpenID configuration has no jwks_uri")]
    MissingJwksUri,

    /// The token is not a well-formed JWT or lacks required claims.
    #[error("Malformed identity token: {0}")]
    Malformed(String),

    /// No key in the set matches the token's key id.
    #[error("Key not found in JWKS: {0}")]
    KeyNotFound(String),

    /// The signature or time claims did not verify.
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// A URL uses a scheme that is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

impl IdTokenError {
    /// Returns `true` if fetching the configuration or key set failed.
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Http(_)
                | Self::Parse(_)
                | Self::MissingJwksUri
                | Self::InvalidScheme(_)
                | Self::ResponseTooLarge { .. }
        )
    }

    /// Returns `true` if the token itself was rejected.
    #[must_use]
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::KeyNotFound(_) | Self::Signature(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for IdTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => Self::Malformed(err.to_string()),
            _ => Self::Signature(err.to_string()),
        }
    }
}

/// Identity token claims used by the launch flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject identifier.
    pub sub: String,

    /// Audience (string or array in the token).
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Issued at (Unix timestamp). Fractional values are truncated.
    #[serde(deserialize_with = "deserialize_numeric_date")]
    pub iat: i64,

    /// FHIR resource URL of the authenticated user.
    #[serde(rename = "fhirUser", default, skip_serializing_if = "Option::is_none")]
    pub fhir_user: Option<String>,

    /// Issuer identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time (Unix timestamp).
    #[serde(
        default,
        deserialize_with = "deserialize_optional_numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,

    /// Additional claims.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl IdentityClaims {
    /// Returns `true` if `client_id` is among the token's audiences.
    #[must_use]
    pub fn has_audience(&self, client_id: &str) -> bool {
        self.aud.iter().any(|aud| aud == client_id)
    }

    /// Returns the resource id from `fhirUser`, i.e. its last path segment.
    ///
    /// `https://ehr.example.com/r4/Practitioner/123` yields `123`.
    #[must_use]
    pub fn practitioner_id(&self) -> Option<&str> {
        self.fhir_user
            .as_deref()?
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

/// JWT NumericDate, which may carry a fractional part.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Integer(i64),
    Fractional(f64),
}

impl NumericDate {
    fn seconds(self) -> i64 {
        match self {
            Self::Integer(secs) => secs,
            Self::Fractional(secs) => secs.trunc() as i64,
        }
    }
}

fn deserialize_numeric_date<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    NumericDate::deserialize(deserializer).map(NumericDate::seconds)
}

fn deserialize_optional_numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<NumericDate>::deserialize(deserializer)?.map(NumericDate::seconds))
}

/// The part of the OpenID configuration needed here.
#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    jwks_uri: Option<String>,
}

/// Decodes the payload of `token` without verifying its signature.
///
/// Used by [`IdTokenPolicy::TrustTokenEndpoint`]. Unsigned (`alg: none`)
/// tokens are accepted as long as they have three segments.
///
/// # Errors
///
/// Returns `Malformed` if the token has no payload segment or the payload
/// lacks `sub`, `aud` or `iat`.
pub fn decode_untrusted(token: &str) -> Result<IdentityClaims, IdTokenError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
        _ => return Err(IdTokenError::Malformed("expected three segments".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| IdTokenError::Malformed(format!("payload: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| IdTokenError::Malformed(format!("claims: {e}")))
}

/// Verifies identity tokens against a provider key set.
///
/// No caching is done; every call fetches the configuration and keys.
#[derive(Debug, Clone)]
pub struct IdTokenValidator {
    http_client: reqwest::Client,
    max_response_size: usize,
    allow_http: bool,
    leeway: Duration,
}

impl IdTokenValidator {
    /// Creates a validator using `http_client` and the limits from `config`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: &SmartLaunchConfig) -> Self {
        Self {
            http_client,
            max_response_size: config.max_response_size,
            allow_http: config.allow_http,
            leeway: config.clock_skew_tolerance,
        }
    }

    /// Verifies `token` with the keys published by the provider behind
    /// `openid_configuration_url`.
    ///
    /// The key is chosen by the token's `kid`. A token without `kid` is tried
    /// against every signing key in the set.
    ///
    /// # Errors
    ///
    /// Returns an error if either fetch fails, the token is malformed, no key
    /// matches, or the signature or expiry does not verify.
    pub async fn verify(
        &self,
        token: &str,
        openid_configuration_url: &str,
    ) -> Result<IdentityClaims, IdTokenError> {
        // Reject garbage before any network traffic.
        let header = decode_header(token).map_err(IdTokenError::from)?;

        let config_url = self.parse_url(openid_configuration_url)?;
        let configuration: OpenIdConfiguration = self.fetch_json(&config_url).await?;
        let jwks_uri = configuration
            .jwks_uri
            .ok_or(IdTokenError::MissingJwksUri)?;
        let jwks_url = self.parse_url(&jwks_uri)?;

        let jwks: JwkSet = self.fetch_json(&jwks_url).await?;

        let candidates: Vec<&Jwk> = match &header.kid {
            Some(kid) => {
                let key = jwks
                    .find(kid)
                    .ok_or_else(|| IdTokenError::KeyNotFound(kid.clone()))?;
                vec![key]
            }
            None => jwks.keys.iter().filter(|k| is_signing_key(k)).collect(),
        };

        if candidates.is_empty() {
            return Err(IdTokenError::KeyNotFound("no signing keys".to_string()));
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = self.leeway.as_secs();

        let mut last_error = None;
        for jwk in candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    last_error = Some(IdTokenError::Signature(format!("unusable key: {e}")));
                    continue;
                }
            };

            match decode::<IdentityClaims>(token, &key, &validation) {
                Ok(data) => {
                    tracing::debug!(sub = %data.claims.sub, "Verified identity token");
                    return Ok(data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
                    last_error = Some(IdTokenError::from(e));
                }
                Err(e) => return Err(IdTokenError::from(e)),
            }
        }

        Err(last_error
            .unwrap_or_else(|| IdTokenError::Signature("no key verified the token".to_string())))
    }

    fn parse_url(&self, raw: &str) -> Result<Url, IdTokenError> {
        let url = Url::parse(raw).map_err(|e| IdTokenError::Parse(format!("{raw}: {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_http => Ok(url),
            other => Err(IdTokenError::InvalidScheme(other.to_string())),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, IdTokenError> {
        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch {}: {}", url, e);
                IdTokenError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(IdTokenError::Http(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(IdTokenError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IdTokenError::Network(e.to_string()))?;
        if body.len() > self.max_response_size {
            return Err(IdTokenError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        serde_json::from_slice(&body).map_err(|e| IdTokenError::Parse(e.to_string()))
    }
}

fn is_signing_key(jwk: &Jwk) -> bool {
    !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
}
