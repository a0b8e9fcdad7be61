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

//! Core protocol types shared by the broadcast engine, wire codec and tools.

use std::fmt;

/// Index of a node in the cluster, dense in `[0, node_count)`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Raw index value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> u32 {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Broadcast round number. Wire representation is a little-endian `i32`;
/// negative values are rejected at decode time.
pub type Round = u32;

/// 32-byte SHA-256 digest.
pub type Hash32 = [u8; 32];

/// Raw Ed25519 signature bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature64(pub [u8; 64]);

impl Signature64 {
    /// Signature length in bytes.
    pub const LENGTH: usize = 64;

    /// Construct from a slice; `None` unless exactly 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; Self::LENGTH] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Signature bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Signature64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature64({}..)", hex::encode(&self.0[..8]))
    }
}

/// A `(node, signature)` pair collected for a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigEntry {
    /// Node that produced the signature.
    pub node: NodeId,
    /// Ed25519 signature over the round payload.
    pub signature: Signature64,
}

/// Payload sizes cycled through when dynamic message sizing is enabled.
pub const DYNAMIC_MSG_SIZES: [usize; 6] =
    [1_000_000, 3_000_000, 5_000_000, 7_000_000, 10_000_000, 13_000_000];

/// Rounds spent at each entry of [`DYNAMIC_MSG_SIZES`] before advancing.
pub const DYNAMIC_SIZE_STEP_ROUNDS: u32 = 60;
