//! Registered relying-party client.
//!
//! A [`Client`] holds the credentials this application uses against one EHR
//! issuer. Records are owned by the [`ClientDirectory`](crate::storage::ClientDirectory)
//! and are never mutated by the launch flow.

use serde::{Deserialize, Serialize};

/// Client registration for a single EHR issuer.
///
/// PKCE and the confidential-client secret are optional capabilities of the
/// same record; a client without a secret is public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Issuer base URL, the lookup key in the directory.
    pub issuer: String,

    /// Client identifier registered with the EHR.
    pub client_id: String,

    /// Client secret; its presence makes the client confidential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Tenant the client belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Scope override. Falls back to the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OpenID configuration document used to find the signing keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_id_configuration_url: Option<String>,

    /// Whether to send a PKCE challenge with the authorize request.
    #[serde(default)]
    pub use_pkce: bool,
}

impl Client {
    /// Creates a public client with no optional settings.
    #[must_use]
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: None,
            org_id: None,
            scope: None,
            open_id_configuration_url: None,
            use_pkce: false,
        }
    }

    /// Sets the client secret, making the client confidential.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Sets the scope override.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the OpenID configuration URL.
    #[must_use]
    pub fn with_open_id_configuration_url(mut self, url: impl Into<String>) -> Self {
        self.open_id_configuration_url = Some(url.into());
        self
    }

    /// Enables or disables PKCE.
    #[must_use]
    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Returns `true` if the client has no secret.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_secret.is_none()
    }

    /// Returns `true` if the client authenticates with a secret.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Returns the scope to request: the override, else `default_scope`.
    #[must_use]
    pub fn effective_scope<'a>(&'a self, default_scope: &'a str) -> &'a str {
        self.scope.as_deref().unwrap_or(default_scope)
    }

    /// Returns the OpenID configuration URL, defaulting to the issuer's
    /// well-known document.
    #[must_use]
    pub fn openid_configuration_url(&self) -> String {
        match &self.open_id_configuration_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/openid-configuration",
                self.issuer.trim_end_matches('/')
            ),
        }
    }
}
