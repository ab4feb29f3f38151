#![no_main]

use authorization_server::scope::ScopeSet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    // A parsed set must survive its own rendering unchanged
    if let Ok(scopes) = ScopeSet::parse(raw) {
        let rendered = scopes.to_string();
        assert_eq!(ScopeSet::parse(&rendered).ok(), Some(scopes));
    }
});
