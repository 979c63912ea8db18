//! Client directory trait.
//!
//! Resolves an EHR issuer to the client registration this application uses
//! against it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::SmartResult;
use crate::types::Client;

/// Lookup of registered clients by issuer.
///
/// The `params` map carries the launch request's extra query parameters
/// (everything except `iss` and `launch`). Directories may use them to pick
/// between several registrations for one issuer, for instance per tenant.
/// The same parameters are replayed on the callback, so a lookup must be
/// deterministic for a given issuer and parameter set.
///
/// # Example
///
/// ```ignore
/// use octofhir_smart_launch::storage::ClientDirectory;
///
/// async fn example(directory: &impl ClientDirectory) {
///     let params = HashMap::new();
///     if let Some(client) = directory.find_by_issuer("https://ehr.example.com/fhir", &params).await? {
///         println!("Using client {}", client.client_id);
///     }
/// }
/// ```
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// Find the client registered for `issuer`.
    ///
    /// Returns `None` if no client is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory backend fails.
    async fn find_by_issuer(
        &self,
        issuer: &str,
        params: &HashMap<String, String>,
    ) -> SmartResult<Option<Client>>;
}

/// Directory backed by a fixed list of clients.
///
/// The first client whose issuer matches exactly wins; `params` are ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientDirectory {
    clients: Vec<Client>,
}

impl InMemoryClientDirectory {
    /// Creates a directory from a list of clients.
    #[must_use]
    pub fn new(clients: Vec<Client>) -> Self {
        Self { clients }
    }

    /// Adds a client to the end of the list.
    pub fn register(&mut self, client: Client) {
        self.clients.push(client);
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find_by_issuer(
        &self,
        issuer: &str,
        _params: &HashMap<String, String>,
    ) -> SmartResult<Option<Client>> {
        Ok(self.clients.iter().find(|c| c.issuer == issuer).cloned())
    }
}
