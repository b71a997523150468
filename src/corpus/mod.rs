//! Corpus storage and the persistence seam.

pub mod pool;
pub mod world;

pub use pool::*;
pub use world::*;
