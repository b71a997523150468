//! Gonzo core library: coverage-guided, in-process fuzzing.
//!
//! The engine collects instrumentation feedback through [`TracePc`], keeps
//! the accepted inputs that reach new behavior at the lowest complexity in
//! a [`UnitPool`], and drives the mutate-run-observe-accept loop with a
//! reproducible [`GonzoRng`]. Persistence goes through the [`World`] seam
//! only.

mod config;
mod corpus;
mod coverage;
mod error;
mod feature;
mod fuzzer;
mod generator;
mod rng;

pub use config::*;
pub use corpus::*;
pub use coverage::*;
pub use error::*;
pub use feature::*;
pub use fuzzer::*;
pub use generator::*;
pub use rng::*;
