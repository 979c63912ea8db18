//! Storage traits consumed by the launch flow.
//!
//! This module defines the two collaborators the host application provides:
//!
//! - [`ClientDirectory`] - issuer to client registration lookup
//! - [`SessionStore`] - per-browser key/value session backing
//!
//! In-memory implementations are included for tests and small deployments.

pub mod directory;
pub mod session;

pub use directory::{ClientDirectory, InMemoryClientDirectory};
pub use session::{MemorySessionStore, SessionStore};
