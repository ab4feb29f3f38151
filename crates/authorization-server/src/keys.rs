//! Signing key management and the public JWK set.
//!
//! Readers take an [`Arc<KeySet>`] snapshot and never wait on rotation: a
//! rotation builds a new set off to the side and swaps the pointer. Private
//! key material only lives inside [`EncodingKey`]s.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Signing algorithm for every token this server mints.
pub const ALGORITHM: Algorithm = Algorithm::RS256;

/// Public half of a signing key (RFC 7517).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub alg: String,
    /// RSA modulus, base64url.
    pub n: String,
    /// RSA exponent, base64url.
    pub e: String,
}

/// `{"keys": [...]}` as served from the JWKS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// One RSA key pair with a stable key id.
pub struct SigningKey {
    kid: String,
    created_at: DateTime<Utc>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: JsonWebKey,
    /// Latest `exp` of any token this key signed, unix seconds.
    signed_through: AtomicI64,
}

impl SigningKey {
    /// Generate a fresh RSA key pair.
    ///
    /// CPU-bound; call from a blocking context on a running server.
    pub fn generate(kid: impl Into<String>, bits: usize) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Self::from_private_key(kid.into(), &private)
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(kid: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| KeyError::Encoding(format!("invalid PKCS#8 private key: {e}")))?;
        Self::from_private_key(kid.into(), &private)
    }

    fn from_private_key(kid: String, private: &RsaPrivateKey) -> Result<Self, KeyError> {
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())?;

        let n = URL_SAFE_NO_PAD.encode(private.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(private.e().to_bytes_be());
        let decoding = DecodingKey::from_rsa_components(&n, &e)?;

        let jwk = JsonWebKey {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            kid: kid.clone(),
            alg: "RS256".to_owned(),
            n,
            e,
        };

        Ok(Self {
            kid,
            created_at: Utc::now(),
            encoding,
            decoding,
            jwk,
            signed_through: AtomicI64::new(i64::MIN),
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// A JWT header naming this key.
    #[must_use]
    pub fn header(&self) -> Header {
        let mut header = Header::new(ALGORITHM);
        header.kid = Some(self.kid.clone());
        header
    }

    /// Sign a claim set expiring at `expires_at` (unix seconds) into a
    /// compact JWT. The key stays published until that moment has passed.
    pub fn sign<T: Serialize>(&self, claims: &T, expires_at: i64) -> Result<String, KeyError> {
        self.signed_through.fetch_max(expires_at, Ordering::AcqRel);
        Ok(jsonwebtoken::encode(&self.header(), claims, &self.encoding)?)
    }

    /// When the last token signed with this key expires, if it signed any.
    #[must_use]
    pub fn signed_through(&self) -> Option<DateTime<Utc>> {
        match self.signed_through.load(Ordering::Acquire) {
            i64::MIN => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A key kept for verification after it stopped signing.
#[derive(Debug, Clone)]
struct RetiredKey {
    key: Arc<SigningKey>,
    retired_at: DateTime<Utc>,
}

/// Immutable view of the keys at one point in time.
#[derive(Debug, Clone)]
pub struct KeySet {
    active: Arc<SigningKey>,
    retired: Vec<RetiredKey>,
}

impl KeySet {
    fn new(active: SigningKey) -> Self {
        Self {
            active: Arc::new(active),
            retired: Vec::new(),
        }
    }

    /// The key that signs new tokens.
    #[must_use]
    pub fn active(&self) -> &SigningKey {
        &self.active
    }

    /// Any key, active or retired, by key id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        if self.active.kid == kid {
            return Some(&self.active);
        }
        self.retired
            .iter()
            .find(|r| r.key.kid == kid)
            .map(|r| r.key.as_ref())
    }

    /// Number of keys, active included.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.retired.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Public keys, active first.
    #[must_use]
    pub fn jwks(&self) -> JsonWebKeySet {
        let keys = std::iter::once(&self.active)
            .chain(self.retired.iter().map(|r| &r.key))
            .map(|k| k.jwk.clone())
            .collect();
        JsonWebKeySet { keys }
    }
}

/// Owner of the signing key set.
pub struct KeyManager {
    current: RwLock<Arc<KeySet>>,
    key_bits: usize,
}

impl KeyManager {
    /// Start with a freshly generated active key.
    pub fn generate(key_bits: usize) -> Result<Self, KeyError> {
        let key = SigningKey::generate(new_kid(), key_bits)?;
        tracing::info!(kid = %key.kid, bits = key_bits, "Generated signing key");
        Ok(Self::from_key(key, key_bits))
    }

    /// Start with a caller-supplied active key.
    #[must_use]
    pub fn from_key(key: SigningKey, key_bits: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(KeySet::new(key))),
            key_bits,
        }
    }

    /// The current key set. Never blocks on a rotation in progress.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn jwks(&self) -> JsonWebKeySet {
        self.snapshot().jwks()
    }

    #[must_use]
    pub fn active_kid(&self) -> String {
        self.snapshot().active.kid.clone()
    }

    /// Generate a new key, make it the signer and retire the previous one.
    ///
    /// Returns the new key id.
    pub fn rotate(&self) -> Result<String, KeyError> {
        let key = SigningKey::generate(new_kid(), self.key_bits)?;
        let kid = key.kid.clone();
        self.install(key);
        Ok(kid)
    }

    /// Make `key` the signer and retire the previous one.
    pub fn install(&self, key: SigningKey) {
        let now = Utc::now();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let mut retired = current.retired.clone();
        retired.push(RetiredKey {
            key: Arc::clone(&current.active),
            retired_at: now,
        });
        tracing::info!(kid = %key.kid, retired = %current.active.kid, "Rotated signing key");

        *current = Arc::new(KeySet {
            active: Arc::new(key),
            retired,
        });
    }

    /// Drop a retired key. Tokens it signed stop verifying.
    pub fn remove(&self, kid: &str) -> Result<(), KeyError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.active.kid == kid {
            return Err(KeyError::ActiveKey(kid.to_owned()));
        }
        if !current.retired.iter().any(|r| r.key.kid == kid) {
            return Err(KeyError::UnknownKey(kid.to_owned()));
        }

        let retired = current.retired.iter().filter(|r| r.key.kid != kid).cloned().collect();
        *current = Arc::new(KeySet {
            active: Arc::clone(&current.active),
            retired,
        });
        tracing::info!(kid = %kid, "Removed signing key");
        Ok(())
    }

    /// Drop keys retired longer ago than `retention` whose last signed token
    /// also expired longer ago than that. Returns how many went.
    pub fn prune_retired(&self, retention: Duration) -> usize {
        let cutoff = TimeDelta::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let keep = |r: &RetiredKey| {
            r.retired_at > cutoff || r.key.signed_through().is_some_and(|exp| exp > cutoff)
        };

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let before = current.retired.len();
        let retired: Vec<_> = current.retired.iter().filter(|r| keep(r)).cloned().collect();
        let removed = before - retired.len();
        if removed > 0 {
            *current = Arc::new(KeySet {
                active: Arc::clone(&current.active),
                retired,
            });
            tracing::debug!(count = removed, "Pruned retired signing keys");
        }
        removed
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("KeyManager")
            .field("active", &snapshot.active.kid)
            .field("keys", &snapshot.len())
            .finish()
    }
}

/// A fresh key id.
#[must_use]
pub fn new_kid() -> String {
    uuid::Uuid::new_v4().to_string()
}
