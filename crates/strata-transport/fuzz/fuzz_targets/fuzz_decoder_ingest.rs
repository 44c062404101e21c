#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_transport::decoder::Decoder;

/// `Decoder::ingest` must never panic on arbitrary datagram bytes, no matter
/// how the header or block payload is malformed.
fuzz_target!(|data: &[u8]| {
    let mut dec = Decoder::new(1472, 10, 4);
    let _ = dec.ingest(data);
});
