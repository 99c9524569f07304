#![no_main]

use libfuzzer_sys::fuzz_target;
use poet_primitives::{decode, encode};

fuzz_target!(|data: &[u8]| {
    // Anything the strict decoder accepts must re-encode to the same bytes
    if let Ok(v) = decode(data) {
        assert_eq!(encode(&v), data);
    }
});
