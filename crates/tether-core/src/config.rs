//! Strictness configuration.
//!
//! Strictness is passed explicitly to the components that enforce it
//! (row mapping, the lazy-access guard, attribute access). There is no
//! process-wide toggle.

use serde::{Deserialize, Serialize};

/// How access to an unloaded relationship is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyLoading {
    /// Load the relationship transparently with a single-parent query.
    #[default]
    Permissive,
    /// Fail with a lazy access violation; no query is issued.
    Strict,
}

/// Strictness flags applied to entity hydration and relationship access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Strictness {
    /// Lazy loading of relationships not named in an eager-load request.
    pub lazy_loading: LazyLoading,
    /// Reject rows carrying columns the entity schema does not declare.
    pub prevent_discarding_attributes: bool,
    /// Reject reads of attributes the entity does not carry.
    pub prevent_missing_attributes: bool,
}

impl Strictness {
    /// Everything permissive.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Every flag on.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            lazy_loading: LazyLoading::Strict,
            prevent_discarding_attributes: true,
            prevent_missing_attributes: true,
        }
    }

    /// Set the lazy loading mode.
    #[must_use]
    pub fn lazy_loading(mut self, mode: LazyLoading) -> Self {
        self.lazy_loading = mode;
        self
    }

    /// Enable/disable rejection of undeclared row columns.
    #[must_use]
    pub fn prevent_discarding_attributes(mut self, value: bool) -> Self {
        self.prevent_discarding_attributes = value;
        self
    }

    /// Enable/disable rejection of missing attribute reads.
    #[must_use]
    pub fn prevent_missing_attributes(mut self, value: bool) -> Self {
        self.prevent_missing_attributes = value;
        self
    }

    /// Whether lazy loading is forbidden.
    pub const fn is_lazy_loading_prevented(&self) -> bool {
        matches!(self.lazy_loading, LazyLoading::Strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_permissive() {
        let s = Strictness::default();
        assert_eq!(s.lazy_loading, LazyLoading::Permissive);
        assert!(!s.is_lazy_loading_prevented());
        assert!(!s.prevent_discarding_attributes);
    }

    #[test]
    fn test_strict_turns_everything_on() {
        let s = Strictness::strict();
        assert!(s.is_lazy_loading_prevented());
        assert!(s.prevent_discarding_attributes);
        assert!(s.prevent_missing_attributes);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let s: Strictness = serde_json::from_str(r#"{"lazy_loading":"strict"}"#).unwrap();
        assert!(s.is_lazy_loading_prevented());
        assert!(!s.prevent_missing_attributes);
    }
}
