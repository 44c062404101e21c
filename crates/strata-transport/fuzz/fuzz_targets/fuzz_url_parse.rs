#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_transport::url;

/// `url::parse` must never panic on arbitrary `udp://`/`udplite://` input,
/// valid UTF-8 or not.
fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    let _ = url::parse(&s);
});
