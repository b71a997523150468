//! Persistence adapter seam.
//!
//! The pool never touches I/O. Pool operations that imply persistence
//! return callback values; the driver applies them to a `World` between
//! executions. Tests run against [`InMemoryWorld`].

use crate::error::GonzoResult;

pub trait World<U> {
    fn add_to_output_corpus(&mut self, unit: &U) -> GonzoResult<()>;
    fn remove_from_output_corpus(&mut self, unit: &U) -> GonzoResult<()>;
}

/// Pending "persist this accepted unit" effect. Borrows the unit from the
/// pool; apply it before the next pool mutation.
#[must_use]
#[derive(Debug)]
pub struct AddToOutputCorpus<'a, U> {
    unit: &'a U,
}

impl<'a, U> AddToOutputCorpus<'a, U> {
    pub(crate) fn new(unit: &'a U) -> Self {
        Self { unit }
    }

    pub fn apply<W: World<U>>(self, world: &mut W) -> GonzoResult<()> {
        world.add_to_output_corpus(self.unit)
    }
}

/// Pending "drop this evicted unit" effect. Owns the unit; the pool has
/// already released it, and it is freed once the callback is dropped.
#[must_use]
#[derive(Debug)]
pub struct RemoveFromOutputCorpus<U> {
    unit: U,
}

impl<U> RemoveFromOutputCorpus<U> {
    pub(crate) fn new(unit: U) -> Self {
        Self { unit }
    }

    pub fn apply<W: World<U>>(&self, world: &mut W) -> GonzoResult<()> {
        world.remove_from_output_corpus(&self.unit)
    }

    pub fn into_unit(self) -> U {
        self.unit
    }
}

/// World double that keeps the output corpus in a plain vector.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorld<U> {
    pub units: Vec<U>,
}

impl<U> InMemoryWorld<U> {
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }
}

impl<U: Clone + PartialEq> World<U> for InMemoryWorld<U> {
    fn add_to_output_corpus(&mut self, unit: &U) -> GonzoResult<()> {
        self.units.push(unit.clone());
        Ok(())
    }

    fn remove_from_output_corpus(&mut self, unit: &U) -> GonzoResult<()> {
        if let Some(pos) = self.units.iter().position(|u| u == unit) {
            self.units.remove(pos);
        }
        Ok(())
    }
}
