//! Role permission maps and their TTL cache.

pub mod cache;

pub use cache::{CacheStats, PermissionCache, PermissionCacheEntry};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Matches every action of a resource, or every resource.
pub const WILDCARD: &str = "*";

/// Resource → allowed actions for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissions {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl RolePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, resource: impl Into<String>, action: impl Into<String>) {
        self.grants
            .entry(resource.into())
            .or_default()
            .insert(action.into());
    }

    /// Builder form of [`grant`](Self::grant).
    pub fn with(mut self, resource: impl Into<String>, action: impl Into<String>) -> Self {
        self.grant(resource, action);
        self
    }

    pub fn allows(&self, resource: &str, action: &str) -> bool {
        [resource, WILDCARD].iter().any(|r| {
            self.grants
                .get(*r)
                .is_some_and(|actions| actions.contains(action) || actions.contains(WILDCARD))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// `(resource, action)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.grants.iter().flat_map(|(resource, actions)| {
            actions
                .iter()
                .map(move |action| (resource.as_str(), action.as_str()))
        })
    }
}

impl<R: Into<String>, A: Into<String>> FromIterator<(R, A)> for RolePermissions {
    fn from_iter<T: IntoIterator<Item = (R, A)>>(iter: T) -> Self {
        let mut perms = Self::new();
        for (resource, action) in iter {
            perms.grant(resource, action);
        }
        perms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_grants() {
        let perms = RolePermissions::new()
            .with("contracts", "read")
            .with("contracts", "write");
        assert!(perms.allows("contracts", "read"));
        assert!(perms.allows("contracts", "write"));
        assert!(!perms.allows("contracts", "delete"));
        assert!(!perms.allows("documents", "read"));
    }

    #[test]
    fn wildcard_action_and_resource() {
        let perms: RolePermissions = [("documents", "*"), ("*", "read")].into_iter().collect();
        assert!(perms.allows("documents", "delete"));
        assert!(perms.allows("contracts", "read"));
        assert!(!perms.allows("contracts", "write"));
    }

    #[test]
    fn iter_is_sorted() {
        let perms: RolePermissions = [("b", "x"), ("a", "z"), ("a", "y")].into_iter().collect();
        let pairs: Vec<_> = perms.iter().collect();
        assert_eq!(pairs, vec![("a", "y"), ("a", "z"), ("b", "x")]);
    }
}
