//! Scopes the gateway granted to this connection.

use std::collections::HashSet;

/// Capability scopes granted by the most recent successful handshake.
///
/// Replaced wholesale on every handshake, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedScopes {
    ordered: Vec<String>,
    lookup: HashSet<String>,
}

impl GrantedScopes {
    pub fn new(scopes: impl IntoIterator<Item = String>) -> Self {
        let mut granted = Self::default();
        for scope in scopes {
            if granted.lookup.insert(scope.clone()) {
                granted.ordered.push(scope);
            }
        }
        granted
    }

    /// Exact-match lookup. No implication between scopes is applied here;
    /// the gateway decides what `operator.admin` covers.
    pub fn contains(&self, scope: &str) -> bool {
        self.lookup.contains(scope)
    }

    /// Scopes in the order the gateway reported them.
    pub fn as_slice(&self) -> &[String] {
        &self.ordered
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
