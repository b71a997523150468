//! Input-generator seam.
//!
//! The engine is generic over the values it feeds the target; concrete
//! generators live with the embedding. The engine only needs to make a
//! fresh input, mutate an existing one, and price an input's complexity.

use crate::rng::GonzoRng;

pub trait InputGenerator {
    type Input: Clone;

    /// Produce an input from nothing. Used to bootstrap an empty pool.
    fn new_input(&mut self, rand: &mut GonzoRng) -> Self::Input;

    /// Mutate `input` in place. Must consult only `rand` for choices so a
    /// replayed run makes the same mutations.
    fn mutate(&mut self, input: &mut Self::Input, rand: &mut GonzoRng);

    /// How "large" an input is. Must be strictly positive; the pool prefers
    /// smaller carriers of the same feature.
    fn complexity(&self, input: &Self::Input) -> f64;
}
