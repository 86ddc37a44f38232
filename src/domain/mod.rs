//! Domain layer - Core types and port definitions
//!
//! This module defines the types flowing through a reconciliation cycle and
//! the traits (ports) that host and cluster adapters implement.

pub mod ports;

pub use ports::*;
