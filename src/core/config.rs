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

//! Cluster configuration loaded from `ip.config`.
//!
//! Line 1 holds four whitespace-separated integers:
//! `node_count round_interval_seconds payload_size_bytes dynamic_msg_size_flag`.
//! Lines `2..node_count+1` hold one `host:port` endpoint per node index.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::NodeId;

/// Configuration errors. Any of these aborts node boot with a non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read the config file.
    #[error("read config")]
    Read,
    /// Config file is empty.
    #[error("missing header line")]
    MissingHeader,
    /// First line does not hold four integers.
    #[error("malformed header line")]
    BadHeader,
    /// Fewer address lines than `node_count`.
    #[error("missing address for node {0}")]
    MissingAddress(usize),
    /// Address line does not resolve to a socket address.
    #[error("bad address {0:?}")]
    BadAddress(String),
    /// CLI node index is outside `[0, node_count)`.
    #[error("node index {index} out of range (node_count {node_count})")]
    BadNodeIndex {
        /// Requested index.
        index: usize,
        /// Configured cluster size.
        node_count: usize,
    },
}

/// One node's endpoint: the raw config string (carried verbatim in wire
/// messages) plus the resolved socket address.
#[derive(Clone, Debug)]
pub struct PeerAddress {
    /// `host:port` exactly as written in the config file.
    pub raw: String,
    /// Resolved address used for listen/connect.
    pub socket: SocketAddr,
}

/// Parsed cluster configuration.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Total number of nodes `n`.
    pub node_count: usize,
    /// Interval between locally originated rounds.
    pub round_interval: Duration,
    /// Fixed payload size in bytes (ignored when `dynamic_msg_size`).
    pub payload_size: usize,
    /// Cycle through the dynamic payload size table instead of `payload_size`.
    pub dynamic_msg_size: bool,
    /// Endpoints indexed by node id.
    pub addrs: Vec<PeerAddress>,
}

impl ClusterConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
        Self::parse(&text)
    }

    /// Parse config text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text.lines();
        let header = lines.next().ok_or(ConfigError::MissingHeader)?;
        let fields: Vec<&str> = header.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(ConfigError::BadHeader);
        }
        let node_count: usize = fields[0].parse().map_err(|_| ConfigError::BadHeader)?;
        if node_count == 0 {
            return Err(ConfigError::BadHeader);
        }
        let interval_secs: u64 = fields[1].parse().map_err(|_| ConfigError::BadHeader)?;
        if interval_secs == 0 {
            return Err(ConfigError::BadHeader);
        }
        let payload_size: usize = fields[2].parse().map_err(|_| ConfigError::BadHeader)?;
        let dynamic_flag: i64 = fields[3].parse().map_err(|_| ConfigError::BadHeader)?;

        let mut addrs = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let line = lines.next().ok_or(ConfigError::MissingAddress(i))?.trim();
            if line.is_empty() {
                return Err(ConfigError::MissingAddress(i));
            }
            let socket = line
                .to_socket_addrs()
                .ok()
                .and_then(|mut it| it.next())
                .ok_or_else(|| ConfigError::BadAddress(line.to_string()))?;
            addrs.push(PeerAddress {
                raw: line.to_string(),
                socket,
            });
        }

        Ok(Self {
            node_count,
            round_interval: Duration::from_secs(interval_secs),
            payload_size,
            dynamic_msg_size: dynamic_flag == 1,
            addrs,
        })
    }

    /// Fault allowance `f = (n - 1) / 3`.
    pub fn faulty_allowance(&self) -> usize {
        (self.node_count - 1) / 3
    }

    /// Endpoint of the local node, validating the CLI index.
    pub fn local(&self, index: usize) -> Result<&PeerAddress, ConfigError> {
        self.addrs.get(index).ok_or(ConfigError::BadNodeIndex {
            index,
            node_count: self.node_count,
        })
    }

    /// Remote peers (every node except `index`) with their ids.
    pub fn peers_of(&self, index: usize) -> Vec<(NodeId, PeerAddress)> {
        self.addrs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(i, a)| (NodeId::from(i as u32), a.clone()))
            .collect()
    }
}
