//! OAuth 2.0 client side of the launch.
//!
//! This module provides:
//!
//! - [`pkce`] - PKCE verifier and S256 challenge
//! - [`token`] - Authorization code exchange against the EHR token endpoint
//! - [`id_token`] - Identity token verification against the provider JWKS
//!
//! # Example
//!
//! ```ignore
//! use octofhir_smart_launch::oauth::{AuthorizationCodeGrant, PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! // ... send `challenge` with the authorize redirect ...
//!
//! let grant = AuthorizationCodeGrant {
//!     code: code.to_string(),
//!     redirect_uri: redirect_uri.to_string(),
//!     token_url: token_url.clone(),
//!     code_verifier: Some(verifier.into_inner()),
//! };
//! let tokens = exchange.exchange(&client, &grant).await?;
//! ```

pub mod id_token;
pub mod pkce;
pub mod token;

pub use id_token::{IdTokenError, IdTokenPolicy, IdTokenValidator, IdentityClaims};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use token::{AuthorizationCodeGrant, TokenExchange, TokenResponse};
