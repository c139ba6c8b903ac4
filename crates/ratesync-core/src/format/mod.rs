//! Device format resolution
//!
//! - Nearest-rate / nearest-bit-depth matching against advertised formats ([`catalog`])

pub mod catalog;
