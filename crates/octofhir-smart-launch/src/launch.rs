//! SMART EHR launch orchestration.
//!
//! [`SmartLaunchService`] drives the two phases of an EHR launch:
//!
//! 1. **Start** ([`SmartLaunchService::start_launch`]): the EHR opens the
//!    application with `iss` and `launch`. The issuer is resolved to a
//!    registered client, its endpoints are discovered, the launch session is
//!    reset, and the browser is sent to the authorize endpoint.
//! 2. **Completion** ([`SmartLaunchService::complete_launch`]): the
//!    authorization server calls back with `code` and `state`. The session is
//!    checked and consumed, the code is exchanged, the identity token is
//!    validated and bound to the client, and a [`LaunchResult`] is returned.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_smart_launch::prelude::*;
//!
//! let directory = Arc::new(InMemoryClientDirectory::new(vec![
//!     Client::new("https://ehr.example.com/fhir", "my-app").with_pkce(true),
//! ]));
//! let service = SmartLaunchService::new(SmartLaunchConfig::default(), directory)?;
//!
//! // GET /auth/smart?iss=...&launch=...
//! let redirect = service
//!     .start_launch(&session, &LaunchRequest::from_query(query))
//!     .await?;
//!
//! // GET /auth/smart/callback?code=...&state=...
//! let result = service
//!     .complete_launch(&session, &CallbackParams::from_query(query))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SmartResult;
use crate::config::SmartLaunchConfig;
use crate::error::SmartError;
use crate::oauth::id_token::{self, IdTokenError, IdTokenPolicy, IdTokenValidator, IdentityClaims};
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::token::{AuthorizationCodeGrant, TokenExchange, TokenResponse};
use crate::smart::conformance::ConformanceResolver;
use crate::smart::session::LaunchSession;
use crate::storage::{ClientDirectory, SessionStore};
use crate::types::Client;

/// Parameters of the start-launch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Issuer (`iss`), the EHR FHIR base URL.
    pub issuer: Option<String>,
    /// Opaque launch context id (`launch`).
    pub launch: Option<String>,
    /// Every other query parameter, passed to the client directory.
    pub params: HashMap<String, String>,
}

impl LaunchRequest {
    /// Creates a request for `issuer` with a launch context id.
    #[must_use]
    pub fn new(issuer: impl Into<String>, launch: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            launch: Some(launch.into()),
            params: HashMap::new(),
        }
    }

    /// Adds a directory parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Splits decoded query pairs into `iss`, `launch` and the rest.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match key.as_str() {
                "iss" => request.issuer = Some(value),
                "launch" => request.launch = Some(value),
                _ => {
                    request.params.insert(key, value);
                }
            }
        }
        request
    }
}

/// Parameters of the authorization callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// State id echoed back by the authorization server.
    pub state: Option<String>,
    /// OAuth error code reported by the authorization server.
    pub error: Option<String>,
    /// OAuth error description.
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Creates a successful callback.
    #[must_use]
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Reads the callback fields from decoded query pairs.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_ref() {
                "code" => params.code = Some(value.into()),
                "state" => params.state = Some(value.into()),
                "error" => params.error = Some(value.into()),
                "error_description" => params.error_description = Some(value.into()),
                _ => {}
            }
        }
        params
    }
}

/// Where to send the browser after a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRedirect {
    /// Authorize endpoint with all request parameters.
    pub authorization_url: Url,
    /// State id of the new launch session.
    pub state: String,
}

/// Outcome of a completed launch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    /// Authenticated user (`sub`).
    pub subject: String,
    /// Access token for the FHIR server.
    pub access_token: String,
    /// Raw identity token.
    pub id_token: String,
    /// Identity token `iat`.
    pub expires_at: i64,
    /// Token type, usually `Bearer`.
    pub token_type: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Tenant of the client.
    pub org_id: Option<String>,
    /// Patient in context.
    pub patient_id: Option<String>,
    /// Last path segment of `fhirUser`.
    pub practitioner_id: Option<String>,
    /// Raw `fhirUser` claim.
    pub fhir_user_uri: Option<String>,
    /// FHIR base URL (the client issuer).
    pub fhir_uri: String,
    /// EHR style sheet.
    pub style_url: Option<String>,
    /// Scope actually granted.
    pub scope_granted: Option<String>,
    /// Refresh token, if offline or online access was granted.
    pub refresh_token: Option<String>,
    /// EHR domain reported by some vendors.
    pub ehr_domain: Option<String>,
}

impl fmt::Debug for LaunchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchResult")
            .field("subject", &self.subject)
            .field("access_token", &"[redacted]")
            .field("id_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("org_id", &self.org_id)
            .field("patient_id", &self.patient_id)
            .field("practitioner_id", &self.practitioner_id)
            .field("fhir_user_uri", &self.fhir_user_uri)
            .field("fhir_uri", &self.fhir_uri)
            .field("style_url", &self.style_url)
            .field("scope_granted", &self.scope_granted)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("ehr_domain", &self.ehr_domain)
            .finish()
    }
}

/// SMART EHR launch service.
pub struct SmartLaunchService {
    config: SmartLaunchConfig,
    directory: Arc<dyn ClientDirectory>,
    resolver: ConformanceResolver,
    token_exchange: TokenExchange,
    id_token_validator: IdTokenValidator,
}

impl SmartLaunchService {
    /// Creates a launch service.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: SmartLaunchConfig, directory: Arc<dyn ClientDirectory>) -> SmartResult<Self> {
        config
            .validate()
            .map_err(|e| SmartError::configuration(e.to_string()))?;
        let http_client = config
            .build_http_client()
            .map_err(|e| SmartError::configuration(e.to_string()))?;

        Ok(Self {
            resolver: ConformanceResolver::new(http_client.clone(), &config),
            token_exchange: TokenExchange::new(http_client.clone()),
            id_token_validator: IdTokenValidator::new(http_client, &config),
            config,
            directory,
        })
    }

    /// Returns the service configuration.
    #[must_use]
    pub fn config(&self) -> &SmartLaunchConfig {
        &self.config
    }

    /// Starts a launch and returns the authorize redirect.
    ///
    /// No session state is written unless discovery succeeds.
    ///
    /// # Errors
    ///
    /// - `MissingIssuer` if the request has no `iss`
    /// - `UnknownIssuer` if no client is registered for it
    /// - `Discovery` if the endpoints cannot be discovered
    /// - `Session` if the session store fails
    pub async fn start_launch(
        &self,
        store: &dyn SessionStore,
        request: &LaunchRequest,
    ) -> SmartResult<LaunchRedirect> {
        let issuer = request
            .issuer
            .as_deref()
            .filter(|iss| !iss.is_empty())
            .ok_or_else(|| {
                tracing::error!("Launch request without issuer");
                SmartError::MissingIssuer
            })?;

        let client = self.find_client(issuer, &request.params).await?;

        let conformance = self.resolver.resolve(&client.issuer).await.map_err(|e| {
            tracing::error!(issuer = %client.issuer, error = %e, "Conformance discovery failed");
            SmartError::from(e)
        })?;

        let scope = client.effective_scope(&self.config.default_scope);

        let session = LaunchSession::new(store);
        let state = session.launching(&client, &conformance, scope).await?;

        if !request.params.is_empty() {
            session.set_directory_params(&request.params).await?;
        }

        let challenge = if client.use_pkce {
            let verifier = PkceVerifier::generate();
            session.set_pkce_code_verifier(verifier.as_str()).await?;
            Some(PkceChallenge::from_verifier(&verifier))
        } else {
            None
        };

        let mut authorization_url = conformance.authorize_url;
        {
            let mut query = authorization_url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("scope", scope)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("aud", &client.issuer);
            query
                .append_pair("launch", request.launch.as_deref().unwrap_or_default())
                .append_pair("state", &state);
            if let Some(challenge) = &challenge {
                query
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", challenge.method().as_str());
            }
        }

        tracing::debug!(
            issuer = %client.issuer,
            client_id = %client.client_id,
            pkce = challenge.is_some(),
            "Redirecting to authorization endpoint"
        );

        Ok(LaunchRedirect {
            authorization_url,
            state,
        })
    }

    /// Completes a launch from the authorization callback.
    ///
    /// The session is marked as launched before the token endpoint is
    /// contacted, so a duplicated callback fails with `InvalidStatus`. The
    /// token request uses the fields of the launch the callback's state
    /// belongs to.
    ///
    /// # Errors
    ///
    /// - `UpstreamAuth` if the callback or token response carries an error
    /// - `InvalidState` / `InvalidStatus` if the session rejects the callback
    /// - `InvalidRequest` if the callback has no code
    /// - `UnknownIssuer` if the session's issuer is no longer registered
    /// - `TokenExchange` if the token endpoint fails
    /// - `IdToken` / `AudienceMismatch` if the identity token is rejected
    pub async fn complete_launch(
        &self,
        store: &dyn SessionStore,
        callback: &CallbackParams,
    ) -> SmartResult<LaunchResult> {
        if let Some(error) = &callback.error {
            let description = callback.error_description.clone().unwrap_or_default();
            tracing::error!(error = %error, description = %description, "Authorization server returned an error");
            return Err(SmartError::upstream_auth(error.clone(), description));
        }

        let session = LaunchSession::new(store);
        session
            .is_launching(callback.state.as_deref())
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected launch callback"))?;

        let code = callback
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SmartError::invalid_request("callback has no authorization code"))?;

        let state_id = callback.state.as_deref().unwrap_or_default();
        let pending = session.launched(state_id).await?;

        let issuer = pending.issuer;
        let client = self.find_client(&issuer, &pending.directory_params).await?;

        let token_url = Url::parse(&pending.token_url).map_err(|e| {
            SmartError::session(format!("invalid token url '{}': {e}", pending.token_url))
        })?;

        let code_verifier = match pending.pkce_code_verifier {
            Some(raw) => Some(
                PkceVerifier::new(raw)
                    .map_err(|e| SmartError::session(format!("invalid PKCE verifier: {e}")))?
                    .into_inner(),
            ),
            None => None,
        };

        let grant = AuthorizationCodeGrant {
            code: code.to_string(),
            redirect_uri: self.config.redirect_uri.to_string(),
            token_url,
            code_verifier,
        };

        let tokens = self
            .token_exchange
            .exchange(&client, &grant)
            .await
            .inspect_err(|e| tracing::error!(issuer = %issuer, error = %e, "Token exchange failed"))?;

        let scope_requested = pending.scope_requested;
        if tokens.scope_differs(&scope_requested) {
            tracing::warn!(
                requested = %scope_requested,
                granted = tokens.scope.as_deref().unwrap_or_default(),
                "Granted scope differs from requested scope"
            );
        }

        let claims = self.identity_claims(&client, &tokens).await?;

        if !claims.has_audience(&client.client_id) {
            tracing::error!(client_id = %client.client_id, aud = ?claims.aud, "Identity token audience mismatch");
            return Err(SmartError::audience_mismatch(
                client.client_id.clone(),
                claims.aud.join(" "),
            ));
        }

        let result = assemble_result(&client, tokens, claims)?;

        tracing::info!(
            issuer = %issuer,
            subject = %result.subject,
            patient = result.patient_id.as_deref().unwrap_or_default(),
            "SMART launch completed"
        );

        Ok(result)
    }

    async fn find_client(
        &self,
        issuer: &str,
        params: &HashMap<String, String>,
    ) -> SmartResult<Client> {
        self.directory
            .find_by_issuer(issuer, params)
            .await?
            .ok_or_else(|| {
                tracing::error!(issuer = %issuer, "Unknown issuer");
                SmartError::unknown_issuer(issuer)
            })
    }

    async fn identity_claims(
        &self,
        client: &Client,
        tokens: &TokenResponse,
    ) -> SmartResult<IdentityClaims> {
        let token = tokens.id_token.as_deref().ok_or_else(|| {
            IdTokenError::Malformed("token response has no id_token".to_string())
        })?;

        let claims = match self.config.id_token_policy {
            IdTokenPolicy::VerifySignature => {
                self.id_token_validator
                    .verify(token, &client.openid_configuration_url())
                    .await?
            }
            IdTokenPolicy::TrustTokenEndpoint => id_token::decode_untrusted(token)?,
        };

        Ok(claims)
    }
}

fn assemble_result(
    client: &Client,
    tokens: TokenResponse,
    claims: IdentityClaims,
) -> SmartResult<LaunchResult> {
    let ehr_domain = tokens.ehr_domain().map(str::to_string);
    if ehr_domain.is_none() {
        tracing::debug!("Token response has no ehr_domain");
    }

    let access_token = tokens
        .access_token
        .ok_or_else(|| SmartError::token_exchange("token response has no access_token"))?;

    Ok(LaunchResult {
        practitioner_id: claims.practitioner_id().map(str::to_string),
        subject: claims.sub,
        access_token,
        id_token: tokens.id_token.unwrap_or_default(),
        expires_at: claims.iat,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
        org_id: client.org_id.clone(),
        patient_id: tokens.patient,
        fhir_user_uri: claims.fhir_user,
        fhir_uri: client.issuer.clone(),
        style_url: tokens.smart_style_url,
        scope_granted: tokens.scope,
        refresh_token: tokens.refresh_token,
        ehr_domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryClientDirectory, MemorySessionStore};

    fn service(clients: Vec<Client>) -> SmartLaunchService {
        SmartLaunchService::new(
            SmartLaunchConfig::default().with_allow_http(true),
            Arc::new(InMemoryClientDirectory::new(clients)),
        )
        .unwrap()
    }

    #[test]
    fn test_launch_request_from_query() {
        let request = LaunchRequest::from_query([
            ("iss", "https://ehr.example.com/fhir"),
            ("launch", "xyz"),
            ("tenant", "north"),
        ]);

        assert_eq!(request.issuer.as_deref(), Some("https://ehr.example.com/fhir"));
        assert_eq!(request.launch.as_deref(), Some("xyz"));
        assert_eq!(request.params.len(), 1);
        assert_eq!(request.params.get("tenant").map(String::as_str), Some("north"));
    }

    #[test]
    fn test_callback_params_from_query() {
        let params = CallbackParams::from_query([
            ("code", "1234"),
            ("state", "s"),
            ("session_state", "ignored"),
        ]);
        assert_eq!(params, CallbackParams::new("1234", "s"));

        let params = CallbackParams::from_query([
            ("error", "access_denied"),
            ("error_description", "User cancelled"),
        ]);
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert!(params.code.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = SmartLaunchService::new(
            SmartLaunchConfig::default().with_default_scope(""),
            Arc::new(InMemoryClientDirectory::default()),
        );
        assert!(matches!(result, Err(SmartError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_start_without_issuer() {
        let store = MemorySessionStore::new();
        let err = service(vec![])
            .start_launch(&store, &LaunchRequest::from_query([("launch", "xyz")]))
            .await
            .unwrap_err();

        assert!(matches!(err, SmartError::MissingIssuer));
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_with_unknown_issuer_leaves_session_untouched() {
        let store = MemorySessionStore::new();
        let err = service(vec![Client::new("https://a.example.com/fhir", "app")])
            .start_launch(&store, &LaunchRequest::new("notme", "xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, SmartError::UnknownIssuer { ref issuer } if issuer == "notme"));
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_callback_error_short_circuits() {
        let store = MemorySessionStore::new();
        let callback = CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("User cancelled".to_string()),
            ..CallbackParams::new("1234", "state")
        };

        let err = service(vec![])
            .complete_launch(&store, &callback)
            .await
            .unwrap_err();

        assert!(matches!(err, SmartError::UpstreamAuth { .. }));
        assert_eq!(err.user_message(), "An error occurred: User cancelled");
    }

    #[tokio::test]
    async fn test_callback_without_session() {
        let store = MemorySessionStore::new();
        let err = service(vec![])
            .complete_launch(&store, &CallbackParams::new("1234", "state"))
            .await
            .unwrap_err();

        assert!(matches!(err, SmartError::InvalidState));
    }

    #[test]
    fn test_assemble_result() {
        let client = Client::new("https://ehr.example.com/fhir", "app").with_org_id("ORG_ID");
        let tokens: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "ACCESS TOKEN",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "launch openid",
            "patient": "PATIENT ID",
            "smart_style_url": "https://ehr.example.com/style.css",
            "id_token": "a.b.c",
            "refresh_token": "refresh token",
            "domain": "example.com"
        }))
        .unwrap();
        let claims: IdentityClaims = serde_json::from_value(serde_json::json!({
            "sub": "SUBJECT",
            "aud": "app",
            "iat": 1_700_000_000,
            "fhirUser": "https://ehr.example.com/r4/Practitioner/PRACTITIONER_ID"
        }))
        .unwrap();

        let result = assemble_result(&client, tokens, claims).unwrap();

        assert_eq!(result.subject, "SUBJECT");
        assert_eq!(result.access_token, "ACCESS TOKEN");
        assert_eq!(result.id_token, "a.b.c");
        assert_eq!(result.expires_at, 1_700_000_000);
        assert_eq!(result.org_id.as_deref(), Some("ORG_ID"));
        assert_eq!(result.patient_id.as_deref(), Some("PATIENT ID"));
        assert_eq!(result.practitioner_id.as_deref(), Some("PRACTITIONER_ID"));
        assert_eq!(result.fhir_uri, "https://ehr.example.com/fhir");
        assert_eq!(result.ehr_domain.as_deref(), Some("example.com"));
        assert_eq!(result.refresh_token.as_deref(), Some("refresh token"));

        let debug = format!("{result:?}");
        assert!(!debug.contains("ACCESS TOKEN"));
        assert!(!debug.contains("refresh token"));
    }

    #[test]
    fn test_assemble_result_requires_access_token() {
        let client = Client::new("https://ehr.example.com/fhir", "app");
        let claims: IdentityClaims = serde_json::from_value(serde_json::json!({
            "sub": "S", "aud": "app", "iat": 1
        }))
        .unwrap();

        let err = assemble_result(&client, TokenResponse::default(), claims).unwrap_err();
        assert!(matches!(err, SmartError::TokenExchange { .. }));
    }
}
