//! Space-delimited OAuth scope sets (RFC 6749 §3.3).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OAuthError;

/// The OIDC scope that turns an authorization into an authentication.
pub const OPENID: &str = "openid";

/// An ordered set of scope tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `scope` parameter value.
    ///
    /// Tokens are separated by spaces; runs of spaces are tolerated. Each
    /// token must consist of `%x21 / %x23-5B / %x5D-7E` characters.
    pub fn parse(value: &str) -> Result<Self, OAuthError> {
        let mut set = BTreeSet::new();
        for token in value.split(' ').filter(|t| !t.is_empty()) {
            if !is_scope_token(token) {
                return Err(OAuthError::invalid_scope("scope contains invalid characters"));
            }
            set.insert(token.to_owned());
        }
        Ok(Self(set))
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Scopes in `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn without(&self, scope: &str) -> Self {
        Self(self.0.iter().filter(|s| *s != scope).cloned().collect())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

fn is_scope_token(token: &str) -> bool {
    token.bytes().all(|b| matches!(b, 0x21 | 0x23..=0x5B | 0x5D..=0x7E))
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|e| serde::de::Error::custom(e.description().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let scopes = ScopeSet::parse("message.write openid  message.read").unwrap();
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes.to_string(), "message.read message.write openid");
    }

    #[test]
    fn test_parse_empty() {
        assert!(ScopeSet::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_quote_and_backslash() {
        assert!(ScopeSet::parse("read \"write\"").is_err());
        assert!(ScopeSet::parse("a\\b").is_err());
    }

    #[test]
    fn test_subset() {
        let allowed = ScopeSet::parse("read write").unwrap();
        assert!(ScopeSet::parse("read").unwrap().is_subset(&allowed));
        assert!(!ScopeSet::parse("read admin").unwrap().is_subset(&allowed));
    }

    #[test]
    fn test_serde_as_string() {
        let scopes = ScopeSet::parse("b a").unwrap();
        assert_eq!(serde_json::to_value(&scopes).unwrap(), serde_json::json!("a b"));
        let back: ScopeSet = serde_json::from_str("\"a b\"").unwrap();
        assert_eq!(back, scopes);
    }
}
