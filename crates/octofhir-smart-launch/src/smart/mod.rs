//! SMART on FHIR launch support.
//!
//! This module provides the EHR-facing parts of the launch:
//!
//! - Conformance discovery of the authorize and token endpoints
//! - The launch session state machine guarding the callback

pub mod conformance;
pub mod session;

pub use conformance::{
    ConformanceInfo, ConformanceResolver, DiscoveryError, OAUTH_URIS_EXTENSION, parse_conformance,
};
pub use session::{LaunchSession, LaunchStatus, PendingLaunch};
