// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use quorumcast::networking::codec::Frame;

fuzz_target!(|data: &[u8]| {
    // Decode must never panic; anything accepted must re-encode and
    // decode back to the same frame.
    if let Ok(frame) = Frame::decode(data) {
        let reencoded = frame.encode();
        let again = Frame::decode(&reencoded).expect("re-decode");
        assert_eq!(again, frame);
    }
});
