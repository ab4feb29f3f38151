#![no_main]

use std::sync::LazyLock;

use authorization_server::authorize::AuthorizationRequestValidator;
use authorization_server::clients::{GrantType, InMemoryClientRepository, RegisteredClient};
use authorization_server::config::Config;
use authorization_server::params::Params;
use libfuzzer_sys::fuzz_target;

struct Target {
    runtime: tokio::runtime::Runtime,
    clients: InMemoryClientRepository,
    validator: AuthorizationRequestValidator,
}

static TARGET: LazyLock<Target> = LazyLock::new(|| {
    let client = RegisteredClient::builder("c1")
        .grant_type(GrantType::AuthorizationCode)
        .redirect_uri("https://app/cb")
        .scope("read")
        .build()
        .expect("fuzz client is valid");
    Target {
        runtime: tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime starts"),
        clients: InMemoryClientRepository::with_clients([client]),
        validator: AuthorizationRequestValidator::new(&Config::for_testing()),
    }
});

fuzz_target!(|data: &[u8]| {
    let Ok(query) = std::str::from_utf8(data) else {
        return;
    };
    let params = Params::parse(query);
    let result = TARGET
        .runtime
        .block_on(TARGET.validator.validate(&TARGET.clients, &params));

    // Nothing is sent back to an unregistered redirect URI
    if let Err(err) = result {
        if let Some(redirect) = &err.redirect {
            assert_eq!(redirect.redirect_uri, "https://app/cb");
        }
    }
});
