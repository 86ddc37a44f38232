//! Matching Module
//!
//! Turns the selection policy and device inventory into per-class
//! assignments, and publishes those assignments as symlinks.

pub mod matcher;
pub mod materializer;

pub use matcher::*;
pub use materializer::*;
