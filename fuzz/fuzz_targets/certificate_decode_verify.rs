#![no_main]

use libfuzzer_sys::fuzz_target;
use poet_engine::{decode_wait_certificate, Signer};

fuzz_target!(|data: &[u8]| {
    let Ok(cert) = decode_wait_certificate(data) else { return };
    // A random record never verifies under an unrelated key, and the
    // tie-break path must not panic on arbitrary signatures
    let pk = Signer::from_bytes(&[9u8; 32]).verifying_key();
    assert!(!cert.verify(&pk));
    let _ = cert.identifier();
    let _ = poet_engine::compare_better(&cert, &cert);
});
