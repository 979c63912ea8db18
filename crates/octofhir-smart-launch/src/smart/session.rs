//! Launch session state machine.
//!
//! Tracks the single in-flight authorization request of one browser session
//! across the authorize redirect.
//!
//! ```text
//!   (absent) ──launching()──► LAUNCHING ──launched()──► LAUNCHED
//!                  ▲                                       │
//!                  └──────────────launching()──────────────┘
//! ```
//!
//! The generated state id doubles as the OAuth `state` parameter. A callback
//! is accepted only while the status is `LAUNCHING` and only with the exact
//! state id.
//!
//! The stored status is bound to its launch as `<status>:<state id>`.
//! `launched()` swaps `launching:<id>` for `launched:<id>` in one
//! compare-and-set, so a duplicated callback cannot redeem the same code
//! twice and a stale callback cannot consume a launch started after it was
//! validated.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::SmartResult;
use crate::error::SmartError;
use crate::smart::conformance::ConformanceInfo;
use crate::storage::SessionStore;
use crate::types::Client;

/// Session keys owned by the launch session.
pub mod keys {
    /// Issuer the launch was started for.
    pub const ISSUER: &str = "smart_issuer";
    /// CSRF state id.
    pub const STATE_ID: &str = "smart_state_id";
    /// `launching:<state id>` or `launched:<state id>`.
    pub const STATUS: &str = "smart_status";
    /// Discovered authorization endpoint.
    pub const AUTHORIZE_URL: &str = "smart_authorize_url";
    /// Discovered token endpoint.
    pub const TOKEN_URL: &str = "smart_token_url";
    /// Scope sent with the authorize request.
    pub const SCOPE_REQUESTED: &str = "smart_scope_requested";
    /// PKCE code verifier.
    pub const PKCE_CODE_VERIFIER: &str = "smart_pkce_code_verifier";
    /// JSON object of directory lookup parameters.
    pub const SETUP_PARAMS: &str = "smart_setup_params";
}

/// Status of the launch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchStatus {
    /// Waiting for the authorization callback.
    Launching,
    /// The callback has been accepted.
    Launched,
}

impl LaunchStatus {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Launched => "launched",
        }
    }

    /// Parses the stored string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "launching" => Some(Self::Launching),
            "launched" => Some(Self::Launched),
            _ => None,
        }
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn bound_status(status: LaunchStatus, state_id: &str) -> String {
    format!("{status}:{state_id}")
}

/// Splits a stored status into its status and state id parts.
fn split_status(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once(':') {
        Some((status, state_id)) => (status, Some(state_id)),
        None => (raw, None),
    }
}

/// `InvalidStatus` carrying the status part only.
fn status_error(raw: Option<String>) -> SmartError {
    SmartError::invalid_status(raw.map(|raw| split_status(&raw).0.to_string()))
}

/// Session fields of a launch, captured before it was marked launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLaunch {
    /// Issuer the launch was started for.
    pub issuer: String,
    /// Discovered token endpoint.
    pub token_url: String,
    /// Scope sent with the authorize request.
    pub scope_requested: String,
    /// PKCE verifier, if PKCE was used.
    pub pkce_code_verifier: Option<String>,
    /// Directory lookup parameters.
    pub directory_params: HashMap<String, String>,
}

/// View of the launch state stored in a [`SessionStore`].
pub struct LaunchSession<'a> {
    store: &'a dyn SessionStore,
}

impl<'a> LaunchSession<'a> {
    /// Wraps a session store.
    #[must_use]
    pub fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// Starts a new launch, replacing any previous one.
    ///
    /// Returns the freshly generated state id. Optional keys from an earlier
    /// launch are removed; callers store the PKCE verifier and directory
    /// parameters afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn launching(
        &self,
        client: &Client,
        conformance: &ConformanceInfo,
        scope_requested: &str,
    ) -> SmartResult<String> {
        let state_id = Uuid::new_v4().to_string();

        // Invalidate the old launch before rewriting its fields.
        self.store.remove(keys::STATUS).await?;
        self.store.remove(keys::PKCE_CODE_VERIFIER).await?;
        self.store.remove(keys::SETUP_PARAMS).await?;

        self.store.set(keys::ISSUER, client.issuer.clone()).await?;
        self.store.set(keys::STATE_ID, state_id.clone()).await?;
        self.store
            .set(keys::AUTHORIZE_URL, conformance.authorize_url.to_string())
            .await?;
        self.store
            .set(keys::TOKEN_URL, conformance.token_url.to_string())
            .await?;
        self.store
            .set(keys::SCOPE_REQUESTED, scope_requested.to_string())
            .await?;
        self.store
            .set(keys::STATUS, bound_status(LaunchStatus::Launching, &state_id))
            .await?;

        Ok(state_id)
    }

    /// Stores the PKCE verifier for the pending launch.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn set_pkce_code_verifier(&self, verifier: &str) -> SmartResult<()> {
        self.store
            .set(keys::PKCE_CODE_VERIFIER, verifier.to_string())
            .await
    }

    /// Stores the directory lookup parameters for the pending launch.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized or the
    /// session store fails.
    pub async fn set_directory_params(&self, params: &HashMap<String, String>) -> SmartResult<()> {
        let encoded = serde_json::to_string(params)
            .map_err(|e| SmartError::session(format!("cannot encode setup params: {e}")))?;
        self.store.set(keys::SETUP_PARAMS, encoded).await
    }

    /// Checks that a callback carrying `state_id` may proceed.
    ///
    /// Does not modify the session.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if `state_id` is absent or differs from the stored id
    /// - `InvalidStatus` if the session is not waiting for that callback
    pub async fn is_launching(&self, state_id: Option<&str>) -> SmartResult<()> {
        let stored = self.store.get(keys::STATE_ID).await?;
        let state_id = match (state_id, stored.as_deref()) {
            (Some(candidate), Some(expected)) if candidate == expected => candidate,
            _ => return Err(SmartError::InvalidState),
        };

        let raw = self.store.get(keys::STATUS).await?;
        let expected = bound_status(LaunchStatus::Launching, state_id);
        if raw.as_deref() != Some(expected.as_str()) {
            return Err(status_error(raw));
        }

        Ok(())
    }

    /// Marks the launch identified by `state_id` as consumed.
    ///
    /// The launch's fields are read first and returned only if the swap from
    /// `launching:<state_id>` succeeds, so they always belong to that launch
    /// even when another launch was started in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` if another request advanced or replaced the
    /// launch first.
    pub async fn launched(&self, state_id: &str) -> SmartResult<PendingLaunch> {
        let pending = PendingLaunch {
            issuer: self.issuer().await?,
            token_url: self.token_url().await?,
            scope_requested: self.scope_requested().await?,
            pkce_code_verifier: self.pkce_code_verifier().await?,
            directory_params: self.directory_params().await?,
        };

        let swapped = self
            .store
            .compare_and_set(
                keys::STATUS,
                &bound_status(LaunchStatus::Launching, state_id),
                bound_status(LaunchStatus::Launched, state_id),
            )
            .await?;

        if swapped {
            Ok(pending)
        } else {
            let raw = self.store.get(keys::STATUS).await?;
            Err(status_error(raw))
        }
    }

    /// Returns the current status, if a launch was ever started.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn status(&self) -> SmartResult<Option<LaunchStatus>> {
        Ok(self
            .store
            .get(keys::STATUS)
            .await?
            .as_deref()
            .and_then(|raw| LaunchStatus::parse(split_status(raw).0)))
    }

    /// Returns the issuer of the pending launch.
    ///
    /// # Errors
    ///
    /// Returns a `Session` error if no issuer is stored.
    pub async fn issuer(&self) -> SmartResult<String> {
        self.required(keys::ISSUER).await
    }

    /// Returns the discovered authorization endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `Session` error if no endpoint is stored.
    pub async fn authorize_url(&self) -> SmartResult<String> {
        self.required(keys::AUTHORIZE_URL).await
    }

    /// Returns the discovered token endpoint.
    ///
    /// # Errors
    ///
    /// Returns a `Session` error if no endpoint is stored.
    pub async fn token_url(&self) -> SmartResult<String> {
        self.required(keys::TOKEN_URL).await
    }

    /// Returns the scope sent with the authorize request.
    ///
    /// # Errors
    ///
    /// Returns a `Session` error if no scope is stored.
    pub async fn scope_requested(&self) -> SmartResult<String> {
        self.required(keys::SCOPE_REQUESTED).await
    }

    /// Returns the PKCE verifier, if PKCE was used.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn pkce_code_verifier(&self) -> SmartResult<Option<String>> {
        self.store.get(keys::PKCE_CODE_VERIFIER).await
    }

    /// Returns the directory lookup parameters, empty if none were stored.
    ///
    /// # Errors
    ///
    /// Returns a `Session` error if the stored value is not a JSON object
    /// of strings.
    pub async fn directory_params(&self) -> SmartResult<HashMap<String, String>> {
        match self.store.get(keys::SETUP_PARAMS).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| SmartError::session(format!("corrupt setup params: {e}"))),
            None => Ok(HashMap::new()),
        }
    }

    async fn required(&self, key: &str) -> SmartResult<String> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| SmartError::session(format!("missing session value '{key}'")))
    }
}
