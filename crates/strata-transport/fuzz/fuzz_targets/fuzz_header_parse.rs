#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_transport::header;

/// `header::parse`/`parse_checked` must never panic for any byte or bound.
fuzz_target!(|data: &[u8]| {
    if let Some(&b) = data.first() {
        let _ = header::parse(b);
        let bound = data.get(1).copied().unwrap_or(128);
        let _ = header::parse_checked(b, bound);
    }
});
