// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Verify a signed proof stream: every record's path must fold back to
//! its root and the root signature must check under the stream key.
//! Records are self-contained, so any ordering verifies.
//!
//! Usage: `proof_verifier [in_file]` (default `tx_data/signed_proof.tx`).

use std::fs;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use quorumcast::core::merkle::pipeline::{read_record, read_stream_key, verify_record};

fn main() -> Result<()> {
    let in_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "tx_data/signed_proof.tx".to_string()),
    );

    let file =
        fs::File::open(&in_path).with_context(|| format!("opening {}", in_path.display()))?;
    let mut reader = BufReader::new(file);

    let key = read_stream_key(&mut reader).context("reading stream key")?;

    let mut index = 0usize;
    while let Some(record) = read_record(&mut reader).context("reading record")? {
        if !verify_record(&key, &record) {
            bail!("record {index}: verification failed");
        }
        index += 1;
    }

    println!("all correct ({index} records)");
    Ok(())
}
