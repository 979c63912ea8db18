//! Authorization code exchange.
//!
//! Trades the code returned on the callback for tokens at the EHR token
//! endpoint. Public clients identify themselves with `client_id` in the form
//! body; confidential clients authenticate with HTTP Basic instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SmartResult;
use crate::error::SmartError;
use crate::types::Client;

/// Inputs of one authorization code redemption.
#[derive(Clone)]
pub struct AuthorizationCodeGrant {
    /// Code received on the callback.
    pub code: String,
    /// Callback URL, identical to the one sent with the authorize request.
    pub redirect_uri: String,
    /// Token endpoint discovered at launch start.
    pub token_url: Url,
    /// PKCE verifier, when the launch used PKCE.
    pub code_verifier: Option<String>,
}

impl AuthorizationCodeGrant {
    /// Builds the form body.
    ///
    /// `client_id` is only included for public clients.
    #[must_use]
    pub fn form_params<'a>(&'a self, client: &'a Client) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", self.code.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        if client.is_public() {
            params.push(("client_id", client.client_id.as_str()));
        }

        if let Some(verifier) = &self.code_verifier {
            params.push(("code_verifier", verifier.as_str()));
        }

        params
    }
}

/// Token endpoint response.
///
/// Every field is optional; the launch flow decides which ones it requires.
/// SMART launch context parameters beyond the named ones are kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// The token type (usually "Bearer").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Token lifetime in seconds. Numeric strings are accepted; anything
    /// unreadable is treated as absent.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,

    /// Granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Patient in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    /// EHR style sheet for the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_style_url: Option<String>,

    /// Identity token (JWT).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OAuth error code, when the endpoint reports an error with a 200.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// OAuth error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// EHR domain (some vendors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// EHR domain (other vendors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ehr_domain: Option<String>,

    /// Remaining launch context parameters.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn deserialize_lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

impl TokenResponse {
    /// Returns the EHR domain from `domain`, else `ehr_domain`. Empty
    /// strings count as absent.
    #[must_use]
    pub fn ehr_domain(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .or_else(|| self.ehr_domain.as_deref().filter(|d| !d.is_empty()))
    }

    /// Returns `true` if a scope was granted and it differs from `requested`.
    ///
    /// Scopes are compared as sets.
    #[must_use]
    pub fn scope_differs(&self, requested: &str) -> bool {
        match &self.scope {
            Some(granted) => {
                let mut granted: Vec<&str> = granted.split_whitespace().collect();
                let mut requested: Vec<&str> = requested.split_whitespace().collect();
                granted.sort_unstable();
                granted.dedup();
                requested.sort_unstable();
                requested.dedup();
                granted != requested
            }
            None => false,
        }
    }
}

/// OAuth error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Client for the EHR token endpoint.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    http_client: reqwest::Client,
}

impl TokenExchange {
    /// Creates a token exchange using `http_client`.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Redeems an authorization code.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `TokenExchange` if the endpoint cannot be reached, answers with a
    ///   failure status and no OAuth error body, or returns invalid JSON
    /// - `UpstreamAuth` if the response carries an OAuth `error`
    pub async fn exchange(
        &self,
        client: &Client,
        grant: &AuthorizationCodeGrant,
    ) -> SmartResult<TokenResponse> {
        let params = grant.form_params(client);

        tracing::debug!(
            token_url = %grant.token_url,
            client_id = %client.client_id,
            confidential = client.is_confidential(),
            pkce = grant.code_verifier.is_some(),
            "Exchanging authorization code"
        );

        let mut request = self
            .http_client
            .post(grant.token_url.as_str())
            .header("Accept", "application/json")
            .form(&params);

        if let Some(secret) = &client.client_secret {
            request = request.basic_auth(&client.client_id, Some(secret));
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("Failed to reach token endpoint {}: {}", grant.token_url, e);
            SmartError::token_exchange(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SmartError::token_exchange(e.to_string()))?;

        if !status.is_success() {
            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(SmartError::upstream_auth(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }

            return Err(SmartError::token_exchange(format!("HTTP {status}")));
        }

        let tokens: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            SmartError::token_exchange(format!("Failed to parse token response: {e}"))
        })?;

        if let Some(error) = &tokens.error {
            return Err(SmartError::upstream_auth(
                error.clone(),
                tokens.error_description.clone().unwrap_or_default(),
            ));
        }

        Ok(tokens)
    }
}
