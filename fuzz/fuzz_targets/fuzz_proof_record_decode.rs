// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use quorumcast::core::merkle::pipeline::{read_record, read_stream_key};

fuzz_target!(|data: &[u8]| {
    let mut cur = data;
    if read_stream_key(&mut cur).is_err() {
        return;
    }
    // Walk records until an error or end of input; no panics allowed.
    while let Ok(Some(_)) = read_record(&mut cur) {}
});
