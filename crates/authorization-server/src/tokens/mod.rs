//! Token minting, refresh token storage and validation.

pub mod claims;
pub mod issuer;
pub mod refresh;
pub mod validator;

use std::time::Duration;

use crate::clients::TokenSettings;
use crate::config::Config;

pub use claims::{AccessTokenClaims, IdTokenClaims};
pub use issuer::{TokenIssuer, TokenRequest, TokenResponse};
pub use refresh::{InMemoryRefreshTokenStore, RefreshTokenRecord, RefreshTokenStore};
pub use validator::{IntrospectionResponse, TokenRejection, TokenValidator};

/// How long a revoked family must be remembered: until no token of it can
/// still be valid under the owning client's lifetimes.
fn family_retention(config: &Config, owner: TokenSettings) -> Duration {
    let access = owner.access_token_ttl.unwrap_or(config.access_token_ttl);
    let refresh = owner.refresh_token_ttl.unwrap_or(config.refresh_token_ttl);
    access.max(refresh)
}

/// Whole seconds as a JWT `NumericDate` offset.
fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
