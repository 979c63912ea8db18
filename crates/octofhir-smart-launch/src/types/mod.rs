//! Common types shared by the launch modules.
//!
//! ## Domain Types
//!
//! - [`Client`] - Relying-party registration for one EHR issuer

pub mod client;

pub use client::Client;
