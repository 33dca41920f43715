//! Infrastructure layer for exthost
//!
//! Wire-level code with no knowledge of providers or environments.

pub mod rpc;
