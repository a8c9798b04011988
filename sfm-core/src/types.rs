//! Common identifier types shared across the forwarding core

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifier a conference endpoint is known by at the signalling layer.
///
/// The core treats the value as an opaque, case-sensitive token. Every
/// allocation cycle copies endpoint ids into the forwarded and entering
/// sets, so clones share the backing storage instead of re-allocating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable 64-bit digest of this id, emitted in the per-cycle `qot`
    /// trace record in place of the raw token.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.0.as_ref().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_compare_by_content() {
        let id = EndpointId::from("alice");
        let copy = id.clone();
        assert_eq!(id, copy);
        assert_eq!(copy.as_str(), "alice");
        assert_ne!(id, EndpointId::from("Alice"));
    }

    #[test]
    fn test_digest_is_stable_per_id() {
        let id = EndpointId::from("alice");
        assert_eq!(id.stable_hash(), EndpointId::new("alice").stable_hash());
        assert_ne!(id.stable_hash(), EndpointId::from("bob").stable_hash());
    }
}
