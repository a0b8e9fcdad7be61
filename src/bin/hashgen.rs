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

//! Produce a synthetic leaf file for the proof pipeline: `count`
//! concatenated SHA-256 hashes.
//!
//! Usage: `hashgen <count> [out_file]` (default `tx_data/tx_out.tx`).

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ring::digest;

fn main() -> Result<()> {
    let count: usize = std::env::args()
        .nth(1)
        .context("usage: hashgen <count> [out_file]")?
        .parse()
        .context("count must be an integer")?;
    let out_path = PathBuf::from(
        std::env::args()
            .nth(2)
            .unwrap_or_else(|| "tx_data/tx_out.tx".to_string()),
    );

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create(&out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;

    for i in 0..count {
        let tx = format!("hello world{i}");
        let d = digest::digest(&digest::SHA256, tx.as_bytes());
        out.write_all(d.as_ref())?;
    }
    out.flush()?;

    println!("{count} leaves written to {}", out_path.display());
    Ok(())
}
