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

//! Wire format for the five broadcast opcodes.
//!
//! These encodings ARE the protocol; every field and size below is part
//! of the wire format. The transport frames each message with a
//! little-endian `u32` length; inside a frame the layout is a common
//! preamble `{opcode: u8, sender_idx: i32, round_number: i32}` followed
//! by the per-opcode body. All multi-byte integers are little-endian.
//! The payload, where present, is the remainder of the frame.
//!
//! | opcode | body |
//! |--------|------|
//! | `ACK (0x00)`  | *(preamble only; `round_number = 0`)* |
//! | `SEND (0x01)` | `ip_len: u32, ip, payload` |
//! | `ECHO (0x02)` | `ip_len: u32, ip, signature[64], payload` |
//! | `FIN (0x03)`  | `ip_len: u32, ip, sig_count: i32, (node: i32, sig[64])*, payload` |
//! | `SUP (0x04)`  | `ip_len: u32, ip, original_sender: i32, sig_count: i32, (node: i32, sig[64])*, payload` |

use thiserror::Error;

use crate::core::types::{NodeId, Round, SigEntry, Signature64};

/// Largest frame the transport will accept (including the codec bytes,
/// excluding the length prefix itself).
pub const MAX_FRAME_LEN: usize = 40 * 1024 * 1024;

/// Decode failures. A malformed frame is dropped; the connection stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame ended before a fixed-size field.
    #[error("truncated frame")]
    Truncated,
    /// First byte is not a known opcode.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// A signed wire integer was negative where an index/count is expected.
    #[error("negative field")]
    NegativeField,
    /// A length field overruns the frame.
    #[error("length overruns frame")]
    LengthOverrun,
    /// Bytes left over after a fixed-layout message.
    #[error("trailing bytes")]
    TrailingBytes,
    /// ip bytes are not valid UTF-8.
    #[error("bad address encoding")]
    BadAddress,
}

/// Message opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Connection handshake carrying the sender's node id.
    Ack = 0x00,
    /// Round payload from its originator.
    Send = 0x01,
    /// Signed acknowledgement of a SEND, returned to the originator.
    Echo = 0x02,
    /// Echo-quorum announcement carrying the collected signature set.
    Fin = 0x03,
    /// Per-origin amplification of a signature set.
    Sup = 0x04,
}

impl Opcode {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Opcode::Ack),
            0x01 => Some(Opcode::Send),
            0x02 => Some(Opcode::Echo),
            0x03 => Some(Opcode::Fin),
            0x04 => Some(Opcode::Sup),
            _ => None,
        }
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Handshake.
    Ack {
        /// Announcing node.
        sender: NodeId,
    },
    /// Round payload broadcast.
    Send {
        /// Originating node.
        sender: NodeId,
        /// Originator's round number.
        round: Round,
        /// Originator's `host:port` string.
        ip: String,
        /// Round payload.
        payload: Vec<u8>,
    },
    /// Signed acknowledgement. The payload field is empty on the wire;
    /// verification uses the payload recorded from the originating SEND.
    Echo {
        /// Echoing node.
        sender: NodeId,
        /// Round being acknowledged.
        round: Round,
        /// Echoing node's `host:port` string.
        ip: String,
        /// Signature over the original SEND payload.
        signature: Signature64,
        /// Empty on the wire.
        payload: Vec<u8>,
    },
    /// Echo-quorum announcement.
    Fin {
        /// Announcing node.
        sender: NodeId,
        /// Round the quorum was reached for.
        round: Round,
        /// Announcing node's `host:port` string.
        ip: String,
        /// Collected `(node, signature)` pairs.
        signatures: Vec<SigEntry>,
        /// Empty on the wire.
        payload: Vec<u8>,
    },
    /// Amplification message driving delivery.
    Sup {
        /// Forwarding node.
        sender: NodeId,
        /// Round of the original broadcast.
        round: Round,
        /// Forwarding node's `host:port` string.
        ip: String,
        /// Node whose broadcast the signatures certify.
        original_sender: NodeId,
        /// Forwarded `(node, signature)` pairs.
        signatures: Vec<SigEntry>,
        /// Empty on the wire.
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Opcode of this message.
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Ack { .. } => Opcode::Ack,
            Frame::Send { .. } => Opcode::Send,
            Frame::Echo { .. } => Opcode::Echo,
            Frame::Fin { .. } => Opcode::Fin,
            Frame::Sup { .. } => Opcode::Sup,
        }
    }

    /// Encode into a frame body (the transport adds the length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match self {
            Frame::Ack { sender } => {
                put_preamble(&mut out, Opcode::Ack, *sender, 0);
            }
            Frame::Send {
                sender,
                round,
                ip,
                payload,
            } => {
                out.reserve(ip.len() + payload.len() + 16);
                put_preamble(&mut out, Opcode::Send, *sender, *round);
                put_ip(&mut out, ip);
                out.extend_from_slice(payload);
            }
            Frame::Echo {
                sender,
                round,
                ip,
                signature,
                payload,
            } => {
                out.reserve(ip.len() + payload.len() + Signature64::LENGTH + 16);
                put_preamble(&mut out, Opcode::Echo, *sender, *round);
                put_ip(&mut out, ip);
                out.extend_from_slice(signature.as_bytes());
                out.extend_from_slice(payload);
            }
            Frame::Fin {
                sender,
                round,
                ip,
                signatures,
                payload,
            } => {
                put_preamble(&mut out, Opcode::Fin, *sender, *round);
                put_ip(&mut out, ip);
                put_sig_list(&mut out, signatures);
                out.extend_from_slice(payload);
            }
            Frame::Sup {
                sender,
                round,
                ip,
                original_sender,
                signatures,
                payload,
            } => {
                put_preamble(&mut out, Opcode::Sup, *sender, *round);
                put_ip(&mut out, ip);
                out.extend_from_slice(&(u32::from(*original_sender) as i32).to_le_bytes());
                put_sig_list(&mut out, signatures);
                out.extend_from_slice(payload);
            }
        }
        out
    }

    /// Decode a frame body.
    pub fn decode(buf: &[u8]) -> Result<Frame, CodecError> {
        let mut cur = Cursor { buf, pos: 0 };
        let op = cur.take_u8()?;
        let op = Opcode::from_u8(op).ok_or(CodecError::UnknownOpcode(op))?;
        let sender = NodeId::from(cur.take_index()?);
        let round: Round = cur.take_index()?;

        match op {
            Opcode::Ack => {
                if cur.remaining() != 0 {
                    return Err(CodecError::TrailingBytes);
                }
                Ok(Frame::Ack { sender })
            }
            Opcode::Send => {
                let ip = cur.take_ip()?;
                let payload = cur.take_rest();
                Ok(Frame::Send {
                    sender,
                    round,
                    ip,
                    payload,
                })
            }
            Opcode::Echo => {
                let ip = cur.take_ip()?;
                let signature = cur.take_signature()?;
                let payload = cur.take_rest();
                Ok(Frame::Echo {
                    sender,
                    round,
                    ip,
                    signature,
                    payload,
                })
            }
            Opcode::Fin => {
                let ip = cur.take_ip()?;
                let signatures = cur.take_sig_list()?;
                let payload = cur.take_rest();
                Ok(Frame::Fin {
                    sender,
                    round,
                    ip,
                    signatures,
                    payload,
                })
            }
            Opcode::Sup => {
                let ip = cur.take_ip()?;
                let original_sender = NodeId::from(cur.take_index()?);
                let signatures = cur.take_sig_list()?;
                let payload = cur.take_rest();
                Ok(Frame::Sup {
                    sender,
                    round,
                    ip,
                    original_sender,
                    signatures,
                    payload,
                })
            }
        }
    }
}

fn put_preamble(out: &mut Vec<u8>, op: Opcode, sender: NodeId, round: Round) {
    out.push(op as u8);
    out.extend_from_slice(&(u32::from(sender) as i32).to_le_bytes());
    out.extend_from_slice(&(round as i32).to_le_bytes());
}

fn put_ip(out: &mut Vec<u8>, ip: &str) {
    out.extend_from_slice(&(ip.len() as u32).to_le_bytes());
    out.extend_from_slice(ip.as_bytes());
}

fn put_sig_list(out: &mut Vec<u8>, sigs: &[SigEntry]) {
    out.extend_from_slice(&(sigs.len() as i32).to_le_bytes());
    for e in sigs {
        out.extend_from_slice(&(u32::from(e.node) as i32).to_le_bytes());
        out.extend_from_slice(e.signature.as_bytes());
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn take_i32(&mut self) -> Result<i32, CodecError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| CodecError::Truncated)?;
        Ok(i32::from_le_bytes(b))
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| CodecError::Truncated)?;
        Ok(u32::from_le_bytes(b))
    }

    /// A wire `i32` holding an index or count; negative is malformed.
    fn take_index(&mut self) -> Result<u32, CodecError> {
        let v = self.take_i32()?;
        if v < 0 {
            return Err(CodecError::NegativeField);
        }
        Ok(v as u32)
    }

    fn take_ip(&mut self) -> Result<String, CodecError> {
        let len = self.take_u32()? as usize;
        if len > self.remaining() {
            return Err(CodecError::LengthOverrun);
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadAddress)
    }

    fn take_signature(&mut self) -> Result<Signature64, CodecError> {
        let bytes = self.take(Signature64::LENGTH)?;
        Signature64::from_slice(bytes).ok_or(CodecError::Truncated)
    }

    fn take_sig_list(&mut self) -> Result<Vec<SigEntry>, CodecError> {
        let count = self.take_index()? as usize;
        let entry_len = 4 + Signature64::LENGTH;
        if count.checked_mul(entry_len).map_or(true, |n| n > self.remaining()) {
            return Err(CodecError::LengthOverrun);
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let node = NodeId::from(self.take_index()?);
            let signature = self.take_signature()?;
            out.push(SigEntry { node, signature });
        }
        Ok(out)
    }

    fn take_rest(&mut self) -> Vec<u8> {
        let rest = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        rest
    }
}
