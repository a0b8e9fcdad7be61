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
#![warn(missing_docs)]

//! Ed25519 key material for a cluster node.
//!
//! A node's keyring holds its own keypair plus the public key of every
//! node, loaded from a directory of PEM files (`priv-NN.pem` /
//! `pub-NN.pem`). Private keys are PKCS#8; public keys are the 44-byte
//! SubjectPublicKeyInfo encoding OpenSSL emits for Ed25519.

use std::fs;
use std::path::Path;

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroize;

use crate::core::types::{NodeId, Signature64};

/// DER prefix of an Ed25519 SubjectPublicKeyInfo; the raw 32-byte key follows.
pub const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Total SubjectPublicKeyInfo length for Ed25519.
pub const ED25519_SPKI_LEN: usize = ED25519_SPKI_PREFIX.len() + 32;

const PRIVATE_TAG: &str = "PRIVATE KEY";
const PUBLIC_TAG: &str = "PUBLIC KEY";

/// Keyring errors.
#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("io")]
    Io,
    #[error("bad pem container")]
    Pem,
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("crypto")]
    Crypto,
}

/// Wrap raw Ed25519 public key bytes in SubjectPublicKeyInfo DER.
pub fn spki_from_raw(pk: &[u8; 32]) -> [u8; ED25519_SPKI_LEN] {
    let mut out = [0u8; ED25519_SPKI_LEN];
    out[..ED25519_SPKI_PREFIX.len()].copy_from_slice(&ED25519_SPKI_PREFIX);
    out[ED25519_SPKI_PREFIX.len()..].copy_from_slice(pk);
    out
}

/// Extract the raw 32-byte key from SubjectPublicKeyInfo DER.
pub fn raw_from_spki(der: &[u8]) -> Option<[u8; 32]> {
    if der.len() != ED25519_SPKI_LEN || der[..ED25519_SPKI_PREFIX.len()] != ED25519_SPKI_PREFIX {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&der[ED25519_SPKI_PREFIX.len()..]);
    Some(out)
}

fn read_private_pem(path: &Path) -> Result<Ed25519KeyPair, KeyringError> {
    let text = fs::read_to_string(path).map_err(|_| KeyringError::Io)?;
    let block = pem::parse(&text).map_err(|_| KeyringError::Pem)?;
    if block.tag() != PRIVATE_TAG {
        return Err(KeyringError::Pem);
    }
    let mut der = block.into_contents();
    // OpenSSL writes PKCS#8 v1 (no embedded public key); ring's own keygen
    // writes v2. Accept both.
    let kp = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&der)
        .map_err(|_| KeyringError::InvalidKey);
    der.zeroize();
    kp
}

fn read_public_pem(path: &Path) -> Result<[u8; 32], KeyringError> {
    let text = fs::read_to_string(path).map_err(|_| KeyringError::Io)?;
    let block = pem::parse(&text).map_err(|_| KeyringError::Pem)?;
    if block.tag() != PUBLIC_TAG {
        return Err(KeyringError::Pem);
    }
    raw_from_spki(block.contents()).ok_or(KeyringError::InvalidKey)
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Local secret plus the full vector of peer public keys.
pub struct Keyring {
    me: NodeId,
    keypair: Ed25519KeyPair,
    peer_keys: Vec<[u8; 32]>,
}

impl Keyring {
    /// Load `priv-NN.pem` for `me` and `pub-NN.pem` for every node index.
    pub fn load(dir: &Path, me: NodeId, node_count: usize) -> Result<Self, KeyringError> {
        if usize::from(me) >= node_count {
            return Err(KeyringError::InvalidKey);
        }
        let keypair = read_private_pem(&dir.join(format!("priv-{me}.pem")))?;

        let mut peer_keys = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let id = NodeId::from(i as u32);
            peer_keys.push(read_public_pem(&dir.join(format!("pub-{id}.pem")))?);
        }

        // The on-disk public key for `me` must match the loaded secret.
        if peer_keys[usize::from(me)].as_slice() != keypair.public_key().as_ref() {
            return Err(KeyringError::InvalidKey);
        }

        Ok(Self {
            me,
            keypair,
            peer_keys,
        })
    }

    /// Generate a fresh keypair for node `index` and write both PEM files.
    /// Returns the raw public key bytes.
    pub fn generate_to(dir: &Path, index: NodeId) -> Result<[u8; 32], KeyringError> {
        fs::create_dir_all(dir).map_err(|_| KeyringError::Io)?;

        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyringError::Crypto)?;
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| KeyringError::InvalidKey)?;
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());

        let priv_path = dir.join(format!("priv-{index}.pem"));
        let priv_pem = pem::Pem::new(PRIVATE_TAG, pkcs8.as_ref().to_vec());
        fs::write(&priv_path, pem::encode(&priv_pem)).map_err(|_| KeyringError::Io)?;
        set_private_perms_best_effort(&priv_path);

        let pub_pem = pem::Pem::new(PUBLIC_TAG, spki_from_raw(&pk).to_vec());
        fs::write(dir.join(format!("pub-{index}.pem")), pem::encode(&pub_pem))
            .map_err(|_| KeyringError::Io)?;

        Ok(pk)
    }

    /// Local node id.
    pub fn node_id(&self) -> NodeId {
        self.me
    }

    /// Sign a message with the local secret key.
    pub fn sign(&self, msg: &[u8]) -> Signature64 {
        let sig = self.keypair.sign(msg);
        let mut out = [0u8; Signature64::LENGTH];
        out.copy_from_slice(sig.as_ref());
        Signature64(out)
    }

    /// Verify `sig` over `msg` against the stated signer's public key.
    /// Unknown node ids verify as false.
    pub fn verify(&self, signer: NodeId, msg: &[u8], sig: &Signature64) -> bool {
        let Some(pk) = self.peer_keys.get(usize::from(signer)) else {
            warn!(%signer, "signature from unknown node id");
            return false;
        };
        UnparsedPublicKey::new(&ED25519, pk)
            .verify(msg, sig.as_bytes())
            .is_ok()
    }

    /// Raw local public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.peer_keys[usize::from(self.me)]
    }
}

/// Standalone signing key for the proof pipeline (not tied to a cluster).
pub struct EphemeralSigner {
    keypair: Ed25519KeyPair,
}

impl EphemeralSigner {
    /// Generate a fresh in-memory keypair.
    pub fn generate() -> Result<Self, KeyringError> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeyringError::Crypto)?;
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| KeyringError::InvalidKey)?;
        Ok(Self { keypair })
    }

    /// Sign a message.
    pub fn sign(&self, msg: &[u8]) -> Signature64 {
        let sig = self.keypair.sign(msg);
        let mut out = [0u8; Signature64::LENGTH];
        out.copy_from_slice(sig.as_ref());
        Signature64(out)
    }

    /// SubjectPublicKeyInfo encoding of the public key.
    pub fn public_key_spki(&self) -> [u8; ED25519_SPKI_LEN] {
        let mut pk = [0u8; 32];
        pk.copy_from_slice(self.keypair.public_key().as_ref());
        spki_from_raw(&pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_load_sign_verify() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..4u32 {
            Keyring::generate_to(dir.path(), NodeId::from(i)).expect("generate");
        }

        let k0 = Keyring::load(dir.path(), NodeId::from(0), 4).expect("load 0");
        let k1 = Keyring::load(dir.path(), NodeId::from(1), 4).expect("load 1");

        let msg = b"round 7 payload";
        let sig = k0.sign(msg);
        assert!(k1.verify(NodeId::from(0), msg, &sig));
        assert!(!k1.verify(NodeId::from(1), msg, &sig));

        let mut bad = sig;
        bad.0[0] ^= 1;
        assert!(!k1.verify(NodeId::from(0), msg, &bad));

        // Unknown signer id.
        assert!(!k1.verify(NodeId::from(9), msg, &sig));
    }

    #[test]
    fn corrupt_pem_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        Keyring::generate_to(dir.path(), NodeId::from(0)).expect("generate");
        std::fs::write(dir.path().join("priv-00.pem"), "not a pem").expect("write");
        assert!(Keyring::load(dir.path(), NodeId::from(0), 1).is_err());
    }

    #[test]
    fn spki_round_trip() {
        let signer = EphemeralSigner::generate().expect("generate");
        let spki = signer.public_key_spki();
        assert_eq!(spki.len(), ED25519_SPKI_LEN);
        let raw = raw_from_spki(&spki).expect("raw");
        assert_eq!(spki_from_raw(&raw), spki);
    }
}
