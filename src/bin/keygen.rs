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

//! Generate `priv-NN.pem` / `pub-NN.pem` Ed25519 keypairs for a cluster.
//!
//! Usage: `keygen <node_count> [out_dir]` (default `pem`).

use anyhow::{Context, Result};
use std::path::PathBuf;

use quorumcast::core::security::keyring::Keyring;
use quorumcast::core::types::NodeId;

fn main() -> Result<()> {
    let node_count: usize = std::env::args()
        .nth(1)
        .context("usage: keygen <node_count> [out_dir]")?
        .parse()
        .context("node_count must be an integer")?;
    let out_dir = PathBuf::from(std::env::args().nth(2).unwrap_or_else(|| "pem".to_string()));

    for i in 0..node_count {
        let id = NodeId::from(i as u32);
        let pk = Keyring::generate_to(&out_dir, id)
            .with_context(|| format!("generating keypair for node {id}"))?;
        println!("{id}: {}", hex::encode(pk));
    }

    Ok(())
}
