//! Directory synchronization suite.
//!
//! Three tools share this library: `syncserver` advertises a directory over
//! a framed TCP protocol and streams files on demand, `syncclient`
//! reconciles a local tree against that advertisement, and `synclocal`
//! mirrors one local directory into another through a persistent
//! fingerprint index.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod connection;
pub mod index;
pub mod inventory;
pub mod local_sync;
pub mod logger;
pub mod lz4_stream;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod update_hook;
