//! Accepted-input storage, rescoring, and weighted selection.
//!
//! Each feature contributes a fixed total budget to the pool, split among
//! the units that carry it in proportion to their complexity fitness. A
//! unit stays alive only while it is a simplest carrier of at least one of
//! its features; everything else is evicted at the next rescore.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use crate::config::Config;
use crate::corpus::world::{AddToOutputCorpus, RemoveFromOutputCorpus};
use crate::feature::{Feature, FeatureScores, ReducedFeature};
use crate::rng::GonzoRng;

/// One accepted input and its acceptance-time observations.
#[derive(Debug, Clone)]
pub struct UnitInfo<U> {
    pub unit: U,
    /// Supplied by the input generator; strictly positive, smaller is
    /// simpler.
    pub complexity: f64,
    /// Features in the sensor's emission order.
    pub features: Vec<Feature>,
    /// Recomputed each rescore.
    pub coverage_score: f64,
    pub flagged_for_deletion: bool,
}

impl<U> UnitInfo<U> {
    pub fn new(unit: U, complexity: f64, features: Vec<Feature>) -> Self {
        assert!(complexity > 0.0, "unit complexity must be positive");
        Self {
            unit,
            complexity,
            features,
            coverage_score: 0.0,
            flagged_for_deletion: false,
        }
    }
}

/// Address of a unit in the pool. The favored slot is read-only and
/// undeletable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolIndex {
    Normal(usize),
    Favored,
}

#[derive(Debug)]
pub struct UnitPool<U> {
    units: Vec<UnitInfo<U>>,
    cumulative_weights: Vec<f64>,
    coverage_score: f64,
    /// Smallest complexity of any unit ever seen carrying the feature, not
    /// just units currently in the pool.
    smallest_complexity_for_feature: BTreeMap<ReducedFeature, f64>,
    /// Externally pinned unit with selection weight independent of scoring.
    /// Never enters feature accounting.
    favored_unit: Option<UnitInfo<U>>,
    scores: FeatureScores,
    favored_selection_odds: u64,
}

impl<U> UnitPool<U> {
    pub fn new(config: &Config) -> Self {
        Self {
            units: Vec::new(),
            cumulative_weights: Vec::new(),
            coverage_score: 0.0,
            smallest_complexity_for_feature: BTreeMap::new(),
            favored_unit: None,
            scores: config.feature_scores,
            favored_selection_odds: config.favored_selection_odds,
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[UnitInfo<U>] {
        &self.units
    }

    pub fn coverage_score(&self) -> f64 {
        self.coverage_score
    }

    pub fn cumulative_weights(&self) -> &[f64] {
        &self.cumulative_weights
    }

    pub fn smallest_complexity_for(&self, reduced: ReducedFeature) -> Option<f64> {
        self.smallest_complexity_for_feature.get(&reduced).copied()
    }

    pub fn has_favored(&self) -> bool {
        self.favored_unit.is_some()
    }

    pub fn set_favored_unit(&mut self, info: UnitInfo<U>) {
        self.favored_unit = Some(info);
    }

    /// Record a new accepted unit. Updates the simplest-complexity map for
    /// each of its features and returns the persistence callback for the
    /// driver to apply.
    pub fn append(&mut self, info: UnitInfo<U>) -> AddToOutputCorpus<'_, U> {
        for feature in &info.features {
            let entry = self
                .smallest_complexity_for_feature
                .entry(feature.reduced())
                .or_insert(f64::INFINITY);
            if info.complexity < *entry {
                *entry = info.complexity;
            }
        }
        self.units.push(info);
        let last = self.units.len() - 1;
        AddToOutputCorpus::new(&self.units[last].unit)
    }

    /// The rescoring pass. Returns the eviction callbacks for the driver to
    /// batch-apply.
    ///
    /// For a unit `u` and feature `f`, the complexity ratio is
    /// `r = (smallest_complexity(f) / complexity(u))^2`, so `0 < r <= 1`
    /// with equality exactly for simplest carriers. Every feature hands a
    /// budget of `score(f)` to the pool, split across surviving carriers in
    /// proportion to `r`.
    pub fn update_scores_and_weights(&mut self) -> Vec<RemoveFromOutputCorpus<U>> {
        // Pass 1: flag everything, then clear units that simplest-carry at
        // least one feature. Equality against the tracked minimum is exact:
        // both sides are untouched generator outputs.
        for unit in &mut self.units {
            unit.flagged_for_deletion = true;
            for feature in &unit.features {
                let smallest = self.smallest_complexity_for_feature[&feature.reduced()];
                if unit.complexity == smallest {
                    unit.flagged_for_deletion = false;
                    break;
                }
            }
        }

        // Pass 2: aggregate ratios per reduced feature over survivors.
        let mut sum_ratios: BTreeMap<ReducedFeature, f64> = BTreeMap::new();
        for unit in self.units.iter().filter(|u| !u.flagged_for_deletion) {
            for feature in &unit.features {
                let smallest = self.smallest_complexity_for_feature[&feature.reduced()];
                *sum_ratios.entry(feature.reduced()).or_insert(0.0) +=
                    complexity_ratio(smallest, unit.complexity);
            }
        }

        // Pass 3: distribute each feature's budget.
        self.coverage_score = 0.0;
        for unit in &mut self.units {
            if unit.flagged_for_deletion {
                continue;
            }
            let mut score = 0.0;
            for feature in &unit.features {
                let smallest = self.smallest_complexity_for_feature[&feature.reduced()];
                let base = self.scores.score_of(feature) / sum_ratios[&feature.reduced()];
                score += base * complexity_ratio(smallest, unit.complexity);
            }
            unit.coverage_score = score;
            self.coverage_score += score;
        }

        // Pass 4: compact and rebuild the prefix sums.
        let mut removals = Vec::new();
        let mut kept = Vec::with_capacity(self.units.len());
        for unit in self.units.drain(..) {
            if unit.flagged_for_deletion {
                tracing::debug!(complexity = unit.complexity, "evicting dominated unit");
                removals.push(RemoveFromOutputCorpus::new(unit.unit));
            } else {
                kept.push(unit);
            }
        }
        self.units = kept;
        self.rebuild_cumulative_weights();
        removals
    }

    /// Pick the next unit to mutate. With a favored unit set, it wins a
    /// 1-in-`favored_selection_odds` draw (and always wins when the pool is
    /// empty); otherwise the pick is weighted by coverage score. Calling
    /// this on an empty pool with no favored unit is a programmer error.
    pub fn choose_unit_idx_to_mutate(&self, rand: &mut GonzoRng) -> PoolIndex {
        if self.favored_unit.is_some()
            && (self.units.is_empty() || rand.int_in_range(0..self.favored_selection_odds) == 0)
        {
            return PoolIndex::Favored;
        }
        assert!(
            !self.units.is_empty(),
            "choose_unit_idx_to_mutate on an empty pool with no favored unit"
        );
        PoolIndex::Normal(rand.weighted_pick(&self.cumulative_weights))
    }

    /// Remove a unit and hand back its eviction callback. The favored unit
    /// may not be deleted.
    pub fn delete_unit(&mut self, idx: PoolIndex) -> RemoveFromOutputCorpus<U> {
        match idx {
            PoolIndex::Favored => panic!("the favored unit may not be deleted"),
            PoolIndex::Normal(i) => {
                let info = self.units.remove(i);
                self.rebuild_cumulative_weights();
                RemoveFromOutputCorpus::new(info.unit)
            }
        }
    }

    fn rebuild_cumulative_weights(&mut self) {
        self.cumulative_weights.clear();
        let mut total = 0.0;
        for unit in &self.units {
            total += unit.coverage_score;
            self.cumulative_weights.push(total);
        }
        self.coverage_score = total;
    }
}

fn complexity_ratio(smallest: f64, complexity: f64) -> f64 {
    let ratio = smallest / complexity;
    ratio * ratio
}

impl<U> Index<PoolIndex> for UnitPool<U> {
    type Output = UnitInfo<U>;

    fn index(&self, idx: PoolIndex) -> &UnitInfo<U> {
        match idx {
            PoolIndex::Normal(i) => &self.units[i],
            PoolIndex::Favored => match &self.favored_unit {
                Some(unit) => unit,
                None => panic!("no favored unit set"),
            },
        }
    }
}

impl<U> IndexMut<PoolIndex> for UnitPool<U> {
    fn index_mut(&mut self, idx: PoolIndex) -> &mut UnitInfo<U> {
        match idx {
            PoolIndex::Normal(i) => &mut self.units[i],
            PoolIndex::Favored => panic!("the favored unit may not be mutated"),
        }
    }
}
