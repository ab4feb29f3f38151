//! Raw OAuth request parameters.
//!
//! RFC 6749 §3.1 forbids repeating a parameter; serde's map extractors would
//! silently keep one of the values, so requests are kept as ordered pairs.

use crate::error::{OAuthError, OAuthResult};

/// Decoded `application/x-www-form-urlencoded` pairs in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Decode a query string or form body.
    #[must_use]
    pub fn parse(encoded: &str) -> Self {
        Self(url::form_urlencoded::parse(encoded.as_bytes()).into_owned().collect())
    }

    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// The single value of `name`.
    ///
    /// An empty value counts as absent; a repeated parameter is `invalid_request`.
    pub fn get(&self, name: &str) -> OAuthResult<Option<&str>> {
        let mut values = self.0.iter().filter(|(k, _)| k == name).map(|(_, v)| v.as_str());
        let first = values.next();
        if values.next().is_some() {
            return Err(OAuthError::invalid_request(format!("{name} must not be repeated")));
        }
        Ok(first.filter(|v| !v.is_empty()))
    }

    /// The single value of a required parameter.
    pub fn require(&self, name: &str) -> OAuthResult<&str> {
        self.get(name)?
            .ok_or_else(|| OAuthError::invalid_request(format!("missing {name}")))
    }

    /// Whether the parameter occurs at all.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decodes() {
        let params = Params::parse("redirect_uri=https%3A%2F%2Fapp%2Fcb&scope=read+write");
        assert_eq!(params.get("redirect_uri").unwrap(), Some("https://app/cb"));
        assert_eq!(params.get("scope").unwrap(), Some("read write"));
        assert_eq!(params.get("state").unwrap(), None);
    }

    #[test]
    fn test_repeated_parameter_rejected() {
        let params = Params::parse("scope=a&scope=b");
        assert_eq!(params.get("scope").unwrap_err().code(), "invalid_request");
    }

    #[test]
    fn test_empty_value_is_absent() {
        let params = Params::parse("state=&client_id=c1");
        assert_eq!(params.get("state").unwrap(), None);
        assert!(params.contains("state"));
        assert_eq!(params.require("client_id").unwrap(), "c1");
        assert!(params.require("state").is_err());
    }
}
