//! OAuth 2.1 / OpenID Connect Authorization Server
//!
//! The core of an authorization server: it registers clients, validates
//! authorization requests, issues single-use authorization codes, mints
//! RS256-signed access and ID tokens plus opaque refresh tokens, and
//! validates, introspects and revokes what it issued.
//!
//! # Features
//!
//! - **Grants**: authorization code with PKCE, client credentials, refresh
//!   token with rotation; password and implicit only when opted in
//! - **Keys**: rotating RSA signing keys published as a JWK set
//! - **Grant families**: replaying a code or rotated refresh token revokes
//!   everything issued from the same authorization
//! - **Bounded stores**: every store call is capped by a timeout
//!
//! # Example
//!
//! ```no_run
//! use authorization_server::{
//!     config::Config, keys::KeyManager, server::AuthorizationServer, server::transport::HttpState,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let keys = KeyManager::generate(config.key_bits)?;
//!     let state = HttpState::in_memory(config, keys, Vec::new());
//!
//!     AuthorizationServer::new(state).run_http(8033).await
//! }
//! ```

pub mod authorize;
pub mod clients;
pub mod codes;
pub mod config;
pub mod consent;
pub mod error;
pub mod keys;
pub mod params;
pub mod pkce;
pub mod scope;
pub mod server;
pub mod store;
pub mod subject;
pub mod tokens;

pub use config::Config;
pub use error::{OAuthError, OAuthResult};
pub use server::AuthorizationServer;
