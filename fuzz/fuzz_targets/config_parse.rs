//! Fuzz target for registry configuration parsing
//!
//! Malformed YAML configuration must surface as `InvalidConfig`, never as a
//! panic in the parser or the validator.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Errors are fine; panics are the bug
        let _ = faultgate::RegistryConfig::from_yaml(s);
    }
});
