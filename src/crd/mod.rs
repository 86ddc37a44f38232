//! Custom Resource Definitions read by the diskmaker
//!
//! - LocalVolume: owner of the node's disk configuration and its events

pub mod local_volume;

pub use local_volume::*;
