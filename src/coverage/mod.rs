//! Instrumentation-facing state: the sensor, its compressed memories, and
//! the C-ABI trampolines.

pub mod sancov;
pub mod sensor;
pub mod torc;
pub mod value_map;

pub use sancov::*;
pub use sensor::*;
pub use torc::*;
pub use value_map::*;
