//! # octofhir-smart-launch
//!
//! SMART on FHIR "EHR launch" client for OctoFHIR applications.
//!
//! This crate provides:
//! - Issuer-to-client lookup through a pluggable client directory
//! - SMART conformance discovery (authorize and token endpoints)
//! - CSRF-protected launch sessions with single-use callbacks
//! - PKCE (S256) and confidential client authentication
//! - Identity token verification against the provider's JWKS
//!
//! ## Overview
//!
//! An EHR opens the application with `iss` and `launch` parameters. The
//! [`launch::SmartLaunchService`] resolves the issuer to a registered client,
//! discovers the EHR's OAuth endpoints and returns the authorization redirect.
//! When the EHR calls back with a code, the service checks the launch session,
//! exchanges the code for tokens and assembles a [`launch::LaunchResult`].
//!
//! ## Modules
//!
//! - [`config`] - Launch configuration and loader
//! - [`error`] - Error taxonomy
//! - [`types`] - Registered client records
//! - [`storage`] - Client directory and session store traits
//! - [`smart`] - Conformance discovery and launch session state
//! - [`oauth`] - PKCE, token exchange and identity token validation
//! - [`launch`] - Launch orchestration
//! - [`observability`] - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod launch;
pub mod oauth;
pub mod observability;
pub mod smart;
pub mod storage;
pub mod types;

pub use config::{ConfigError, SmartLaunchConfig};
pub use error::{ErrorCategory, SmartError};
pub use launch::{CallbackParams, LaunchRedirect, LaunchRequest, LaunchResult, SmartLaunchService};
pub use oauth::{
    AuthorizationCodeGrant, IdTokenError, IdTokenPolicy, IdTokenValidator, IdentityClaims,
    PkceChallenge, PkceVerifier, TokenExchange, TokenResponse,
};
pub use smart::{
    ConformanceInfo, ConformanceResolver, DiscoveryError, LaunchSession, LaunchStatus,
    PendingLaunch,
};
pub use storage::{ClientDirectory, InMemoryClientDirectory, MemorySessionStore, SessionStore};
pub use types::Client;

/// Type alias for launch results.
pub type SmartResult<T> = Result<T, SmartError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_smart_launch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::SmartResult;
    pub use crate::config::{ConfigError, SmartLaunchConfig};
    pub use crate::error::{ErrorCategory, SmartError};
    pub use crate::launch::{
        CallbackParams, LaunchRedirect, LaunchRequest, LaunchResult, SmartLaunchService,
    };
    pub use crate::oauth::{IdTokenPolicy, IdentityClaims, TokenResponse};
    pub use crate::storage::{
        ClientDirectory, InMemoryClientDirectory, MemorySessionStore, SessionStore,
    };
    pub use crate::types::Client;
}
