//! Fuzzing library for the authorization server.
//!
//! This crate provides fuzzing targets for the parsers that see untrusted
//! input first: query strings and form bodies, scope values and the
//! authorization request validator.
//!
//! # Usage
//!
//! ```bash
//! cd crates/authz-fuzz
//! cargo +nightly fuzz run fuzz_authorize_params -- -max_total_time=60
//! ```

pub use authorization_server::{params, scope};
