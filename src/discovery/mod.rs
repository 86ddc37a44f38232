//! Device Discovery Module
//!
//! Enumerates unmounted block devices and the stable identifier links the
//! OS maintains for them, and resolves between the two.

pub mod enumerator;
pub mod resolver;

pub use enumerator::*;
pub use resolver::*;
