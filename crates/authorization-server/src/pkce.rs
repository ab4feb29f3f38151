//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements `plain` and `S256` code challenge verification per RFC 7636.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Verifiers and challenges: 43-128 unreserved characters (RFC 7636 §4.1).
static PKCE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\-._~]{43,128}$").expect("static PKCE pattern is valid")
});

/// How the challenge was derived from the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl CodeChallengeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            _ => Err(()),
        }
    }
}

/// Check the syntax of a `code_challenge` or `code_verifier`.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    PKCE_VALUE.is_match(value)
}

/// Compute `BASE64URL(SHA256(code_verifier))`.
#[must_use]
pub fn s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored challenge.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    constant_time_eq(&s256_challenge(code_verifier), code_challenge)
}

/// Verify a verifier against a stored challenge under the declared method.
#[must_use]
pub fn verify(method: CodeChallengeMethod, code_verifier: &str, code_challenge: &str) -> bool {
    if !is_well_formed(code_verifier) {
        return false;
    }
    match method {
        CodeChallengeMethod::Plain => constant_time_eq(code_verifier, code_challenge),
        CodeChallengeMethod::S256 => verify_s256(code_verifier, code_challenge),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
