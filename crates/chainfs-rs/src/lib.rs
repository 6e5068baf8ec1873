//! Metadata engine and pipeline codec for a chained-replication distributed file system.
#![allow(clippy::cargo_common_metadata)]

pub mod blocks;
pub mod constants;
pub mod daemons;
pub mod editlog;
pub mod error;
pub mod image;
pub mod namespace;
pub mod namesystem;
pub mod packet;
pub mod protocol;
