//! Helpers shared by the credential stores.

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Random credential length in bytes (32 bytes = 256 bits).
const TOKEN_BYTES: usize = 32;

/// Run a store call with an upper bound on its latency.
///
/// A timeout is reported once and never retried. The call keeps its own
/// error type; an elapsed bound is converted from [`StoreError::Timeout`].
pub async fn bounded<T, E, F>(limit: Duration, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    tokio::time::timeout(limit, operation).await.unwrap_or_else(|_| {
        tracing::warn!(timeout = ?limit, "Store call exceeded its time bound");
        Err(StoreError::Timeout(limit).into())
    })
}

/// Generate an opaque credential: 256 bits of OS randomness, base64url.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The storage key for an opaque credential.
#[must_use]
pub fn digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// `now + ttl`, saturating at the far future.
#[must_use]
pub fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether something expiring at `expires_at` is expired at `now`.
#[must_use]
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OAuthError, OAuthResult, StoreResult};

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: StoreResult<()> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result: StoreResult<i32> = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_bounded_keeps_protocol_errors() {
        let rejected: OAuthResult<()> =
            bounded(Duration::from_secs(1), async { Err(OAuthError::invalid_client()) }).await;
        assert_eq!(rejected.unwrap_err().code(), "invalid_client");

        let slow: OAuthResult<()> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(slow, Err(OAuthError::ServerError));
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        assert_eq!(a.len(), 43);
        assert!(a.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_ne!(a, generate_token());
    }

    #[test]
    fn test_zero_ttl_is_expired_immediately() {
        let now = Utc::now();
        assert!(is_expired(expiry_from(now, Duration::ZERO), now));
        assert!(!is_expired(expiry_from(now, Duration::from_secs(1)), now));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest("abc"), digest("abc"));
        assert_ne!(digest("abc"), digest("abd"));
    }
}
