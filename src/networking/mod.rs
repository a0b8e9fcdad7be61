#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: wire codec and TCP transport.

pub mod codec;
pub mod transport;
