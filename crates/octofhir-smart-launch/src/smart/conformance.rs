//! SMART conformance discovery.
//!
//! Reads an EHR's FHIR metadata document and extracts the OAuth endpoints
//! advertised in the `oauth-uris` security extension.
//!
//! Two document shapes are in use. Current servers return a
//! `CapabilityStatement`/`Conformance` resource with a top-level `rest` array;
//! some older DSTU2 servers wrap the resource in a `Conformance` key with a
//! single `rest` object. Both are detected by probing for the `Conformance`
//! key.
//!
//! ```json
//! {
//!   "rest": [{
//!     "security": {
//!       "extension": [{
//!         "url": "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris",
//!         "extension": [
//!           { "url": "authorize", "valueUri": "https://ehr.example.com/authorize" },
//!           { "url": "token", "valueUri": "https://ehr.example.com/token" }
//!         ]
//!       }]
//!     }
//!   }]
//! }
//! ```

use serde_json::Value;
use url::Url;

use crate::config::SmartLaunchConfig;

/// URL of the SMART OAuth URIs extension.
pub const OAUTH_URIS_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

/// Path appended to the issuer to fetch the metadata document.
pub const METADATA_PATH: &str = "metadata";

/// Errors that can occur during conformance discovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the metadata document.
    #[error("Network error: {0}")]
    Network(String),

    /// The metadata request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// The response body is not valid JSON.
    #[error("Failed to parse conformance document: {0}")]
    Parse(String),

    /// The response body is JSON but not an object.
    #[error("Expecting a JSON object for the conformance document")]
    NotAnObject,

    /// No `oauth-uris` security extension was found.
    #[error("Unknown security extension")]
    UnknownSecurityExtension,

    /// The extension has no `authorize` entry.
    #[error("No authorization uri")]
    MissingAuthorizeUrl,

    /// The extension has no `token` entry.
    #[error("No token uri")]
    MissingTokenUrl,

    /// The issuer URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The issuer or an advertised endpoint is not a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// OAuth endpoints discovered for an issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceInfo {
    /// Authorization endpoint.
    pub authorize_url: Url,
    /// Token endpoint.
    pub token_url: Url,
}

/// Extracts the OAuth endpoints from a metadata document.
///
/// # Errors
///
/// Returns an error if the document is not an object, carries no
/// `oauth-uris` extension, or lacks either endpoint.
pub fn parse_conformance(document: &Value) -> Result<ConformanceInfo, DiscoveryError> {
    let object = document.as_object().ok_or(DiscoveryError::NotAnObject)?;

    let rest = match object.get("Conformance") {
        Some(conformance) => conformance.get("rest"),
        None => object.get("rest").and_then(|rest| rest.get(0)),
    };

    let extension = rest
        .and_then(|rest| rest.get("security"))
        .and_then(|security| security.get("extension"))
        .and_then(find_oauth_uris)
        .ok_or(DiscoveryError::UnknownSecurityExtension)?;

    let mut authorize_url = None;
    let mut token_url = None;

    for entry in extension
        .get("extension")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let value = entry.get("valueUri").and_then(Value::as_str);
        match entry.get("url").and_then(Value::as_str) {
            Some("authorize") => authorize_url = value,
            Some("token") => token_url = value,
            _ => {}
        }
    }

    let authorize_url = authorize_url
        .filter(|u| !u.is_empty())
        .ok_or(DiscoveryError::MissingAuthorizeUrl)?;
    let token_url = token_url
        .filter(|u| !u.is_empty())
        .ok_or(DiscoveryError::MissingTokenUrl)?;

    Ok(ConformanceInfo {
        authorize_url: parse_endpoint(authorize_url)?,
        token_url: parse_endpoint(token_url)?,
    })
}

/// The security extension is a single object in the wrapped shape and an
/// array of extensions otherwise.
fn find_oauth_uris(extension: &Value) -> Option<&Value> {
    let is_oauth_uris =
        |ext: &&Value| ext.get("url").and_then(Value::as_str) == Some(OAUTH_URIS_EXTENSION);

    match extension {
        Value::Array(items) => items.iter().find(is_oauth_uris),
        Value::Object(_) => Some(extension).filter(is_oauth_uris),
        _ => None,
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, DiscoveryError> {
    Url::parse(raw).map_err(|e| DiscoveryError::InvalidUrl(format!("{raw}: {e}")))
}

/// Builds `{issuer}/metadata`.
///
/// # Errors
///
/// Returns an error if the issuer is not an absolute URL.
pub fn metadata_url(issuer: &str) -> Result<Url, DiscoveryError> {
    let url = format!("{}/{METADATA_PATH}", issuer.trim_end_matches('/'));
    Url::parse(&url).map_err(|e| DiscoveryError::InvalidUrl(format!("{issuer}: {e}")))
}

/// Fetches and parses issuer metadata documents.
#[derive(Debug, Clone)]
pub struct ConformanceResolver {
    http_client: reqwest::Client,
    max_response_size: usize,
    allow_http: bool,
}

impl ConformanceResolver {
    /// Creates a resolver using `http_client` and the limits from `config`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: &SmartLaunchConfig) -> Self {
        Self {
            http_client,
            max_response_size: config.max_response_size,
            allow_http: config.allow_http,
        }
    }

    /// Discovers the OAuth endpoints of `issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The issuer is not an HTTPS URL (unless `allow_http` is set)
    /// - The metadata document cannot be fetched or is too large
    /// - The document does not advertise both endpoints
    pub async fn resolve(&self, issuer: &str) -> Result<ConformanceInfo, DiscoveryError> {
        let url = metadata_url(issuer)?;
        self.validate_scheme(&url)?;

        tracing::debug!(issuer = %issuer, url = %url, "Fetching conformance statement");

        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch conformance from {}: {}", issuer, e);
                DiscoveryError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Http(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        if body.len() > self.max_response_size {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let document: Value = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!("Failed to parse conformance from {}: {}", issuer, e);
            DiscoveryError::Parse(e.to_string())
        })?;

        let info = parse_conformance(&document)?;

        tracing::debug!(
            issuer = %issuer,
            authorize_url = %info.authorize_url,
            token_url = %info.token_url,
            "Discovered SMART endpoints"
        );

        Ok(info)
    }

    fn validate_scheme(&self, url: &Url) -> Result<(), DiscoveryError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}
