#![no_main]

use authorization_server::params::Params;
use authorization_server::tokens::TokenRequest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any form body must parse into a request or an OAuth error, never panic
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let params = Params::parse(body);
    if let Err(err) = TokenRequest::from_params(&params) {
        assert!(!err.code().is_empty());
    }
});
