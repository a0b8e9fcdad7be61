#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Key material handling.

pub mod keyring;
