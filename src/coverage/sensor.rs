//! In-process coverage sensor.
//!
//! `TracePc` owns the guard table and the per-execution event lists fed by
//! the instrumentation callbacks, and turns one execution's worth of events
//! into an ordered feature stream. Callbacks are write-cheap: the indirect
//! and comparison lists grow without deduplication while the target runs,
//! and dedup happens once at collection, after sorting.

use crate::config::Config;
use crate::coverage::torc::TableOfRecentCompares;
use crate::coverage::value_map::ValueBitMap;
use crate::feature::{hit_count_bucket, Feature, Pc, ReducedFeature};

#[derive(Debug)]
pub struct TracePc {
    max_num_guards: usize,
    num_guards: usize,
    overflow_warned: bool,
    /// One saturating 8-bit hit counter per guard, index 0 unused. Zeroed
    /// between executions.
    counters: Vec<u8>,
    /// Cumulative edge-seen bits, never reset for the life of the process.
    /// Updated only when the driver accepts a unit.
    edge_seen: Vec<bool>,
    indirects: Vec<Feature>,
    comparisons: Vec<Feature>,
    torc4: TableOfRecentCompares<u32>,
    torc8: TableOfRecentCompares<u64>,
    value_map: ValueBitMap,
}

impl TracePc {
    pub fn new(config: &Config) -> Self {
        Self {
            max_num_guards: config.max_num_guards,
            num_guards: 0,
            overflow_warned: false,
            counters: Vec::new(),
            edge_seen: Vec::new(),
            indirects: Vec::new(),
            comparisons: Vec::new(),
            torc4: TableOfRecentCompares::new(),
            torc8: TableOfRecentCompares::new(),
            value_map: ValueBitMap::new(),
        }
    }

    /// Number of guards assigned so far, capped at the configured bound.
    pub fn num_guards(&self) -> usize {
        self.num_guards.min(self.max_num_guards)
    }

    /// Assign fresh increasing guard ids (starting from 1) to a module's
    /// guard slots and grow the counter buffers to match. Ignored when the
    /// range is empty or already initialized (first slot nonzero).
    pub fn handle_pc_guard_init(&mut self, slots: &mut [u32]) {
        if slots.is_empty() || slots[0] != 0 {
            return;
        }
        for slot in slots.iter_mut() {
            self.num_guards += 1;
            *slot = self.guard_id_for(self.num_guards);
        }
        let len = self.num_guards() + 1;
        if self.counters.len() < len {
            self.counters.resize(len, 0);
            self.edge_seen.resize(len, false);
        }
    }

    fn guard_id_for(&mut self, nth: usize) -> u32 {
        if nth <= self.max_num_guards {
            return nth as u32;
        }
        if !self.overflow_warned {
            tracing::warn!(
                max_num_guards = self.max_num_guards,
                "instrumented edges exceed the guard bound; folding ids"
            );
            self.overflow_warned = true;
        }
        ((nth - 1) % self.max_num_guards + 1) as u32
    }

    /// Edge entry. The counter saturates at 255 so the top bucket is stable
    /// under long loops.
    pub fn handle_pc_guard(&mut self, guard: u32) {
        let idx = guard as usize;
        assert!(
            idx != 0 && idx < self.counters.len(),
            "pc_guard for guard {guard} before pc_guard_init"
        );
        self.counters[idx] = self.counters[idx].saturating_add(1);
    }

    pub fn handle_pc_indir(&mut self, caller: Pc, callee: Pc) {
        let feature = Feature::Indirect { caller, callee };
        self.value_map.add_value_mod_prime(feature.reduced().key());
        self.indirects.push(feature);
    }

    pub fn handle_trace_cmp1(&mut self, pc: Pc, arg1: u8, arg2: u8) {
        self.record_cmp(pc, u64::from(arg1), u64::from(arg2));
    }

    pub fn handle_trace_cmp2(&mut self, pc: Pc, arg1: u16, arg2: u16) {
        self.record_cmp(pc, u64::from(arg1), u64::from(arg2));
    }

    pub fn handle_trace_cmp4(&mut self, pc: Pc, arg1: u32, arg2: u32) {
        self.torc4
            .insert(u64::from((arg1 ^ arg2).count_ones() + 1), arg1, arg2);
        self.record_cmp(pc, u64::from(arg1), u64::from(arg2));
    }

    pub fn handle_trace_cmp8(&mut self, pc: Pc, arg1: u64, arg2: u64) {
        self.torc8
            .insert(u64::from((arg1 ^ arg2).count_ones() + 1), arg1, arg2);
        self.record_cmp(pc, arg1, arg2);
    }

    fn record_cmp(&mut self, pc: Pc, arg1: u64, arg2: u64) {
        let feature = Feature::Comparison { pc, arg1, arg2 };
        self.value_map.add_value(feature.reduced().key());
        self.comparisons.push(feature);
    }

    /// Emit one execution's features in deterministic order: nonzero edge
    /// counters in guard order, then indirects sorted with consecutive
    /// reduced-key duplicates skipped, then comparisons likewise. The order
    /// is independent of callback arrival order.
    pub fn collect_features(&mut self, mut handle: impl FnMut(Feature)) {
        for (guard, &counter) in self.counters.iter().enumerate().skip(1) {
            if counter != 0 {
                handle(Feature::Edge {
                    guard: guard as u32,
                    counter_bucket: hit_count_bucket(counter),
                });
            }
        }

        self.indirects.sort_unstable();
        emit_deduped(&self.indirects, &mut handle);

        self.comparisons.sort_unstable();
        emit_deduped(&self.comparisons, &mut handle);
    }

    /// Clear the per-execution tables, keeping their allocations. The
    /// cumulative edge-seen bits, TORC tables, and value map survive.
    pub fn reset_collected_features(&mut self) {
        self.counters.fill(0);
        self.indirects.clear();
        self.comparisons.clear();
    }

    /// Mark an edge as exercised by an accepted unit.
    pub fn record_edge_observed(&mut self, guard: u32) {
        self.edge_seen[guard as usize] = true;
    }

    /// Edges ever exercised by an accepted unit.
    pub fn observed_edge_count(&self) -> usize {
        self.edge_seen.iter().filter(|&&seen| seen).count()
    }

    pub fn torc4(&self) -> &TableOfRecentCompares<u32> {
        &self.torc4
    }

    pub fn torc8(&self) -> &TableOfRecentCompares<u64> {
        &self.torc8
    }

    pub fn value_map(&self) -> &ValueBitMap {
        &self.value_map
    }
}

fn emit_deduped(features: &[Feature], handle: &mut impl FnMut(Feature)) {
    let mut last: Option<ReducedFeature> = None;
    for &feature in features {
        let reduced = feature.reduced();
        if last == Some(reduced) {
            continue;
        }
        last = Some(reduced);
        handle(feature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor() -> TracePc {
        TracePc::new(&Config::default())
    }

    fn collected(sensor: &mut TracePc) -> Vec<Feature> {
        let mut out = Vec::new();
        sensor.collect_features(|f| out.push(f));
        out
    }

    #[test]
    fn guard_init_assigns_increasing_ids_across_modules() {
        let mut sensor = sensor();
        let mut module_a = [0u32; 5];
        let mut module_b = [0u32; 3];
        sensor.handle_pc_guard_init(&mut module_a);
        sensor.handle_pc_guard_init(&mut module_b);
        assert_eq!(module_a, [1, 2, 3, 4, 5]);
        assert_eq!(module_b, [6, 7, 8]);
        assert_eq!(sensor.num_guards(), 8);
    }

    #[test]
    fn guard_init_is_idempotent_for_initialized_ranges() {
        let mut sensor = sensor();
        let mut module = [0u32; 4];
        sensor.handle_pc_guard_init(&mut module);
        let before = module;
        sensor.handle_pc_guard_init(&mut module);
        assert_eq!(module, before);
        assert_eq!(sensor.num_guards(), 4);
    }

    #[test]
    fn guard_ids_fold_past_the_configured_bound() {
        let config = Config {
            max_num_guards: 4,
            ..Config::default()
        };
        let mut sensor = TracePc::new(&config);
        let mut module = [0u32; 6];
        sensor.handle_pc_guard_init(&mut module);
        assert_eq!(module, [1, 2, 3, 4, 1, 2]);
        assert_eq!(sensor.num_guards(), 4);
    }

    #[test]
    fn edge_features_bucket_hit_counts() {
        let mut sensor = sensor();
        let mut module = [0u32; 5];
        sensor.handle_pc_guard_init(&mut module);

        // Guard 1 stays at zero and must be skipped.
        sensor.handle_pc_guard(2);
        for _ in 0..3 {
            sensor.handle_pc_guard(3);
        }
        for _ in 0..4 {
            sensor.handle_pc_guard(4);
        }
        for _ in 0..128 {
            sensor.handle_pc_guard(5);
        }

        let features = collected(&mut sensor);
        assert_eq!(
            features,
            vec![
                Feature::Edge {
                    guard: 2,
                    counter_bucket: 0
                },
                Feature::Edge {
                    guard: 3,
                    counter_bucket: 2
                },
                Feature::Edge {
                    guard: 4,
                    counter_bucket: 3
                },
                Feature::Edge {
                    guard: 5,
                    counter_bucket: 7
                },
            ]
        );
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut sensor = sensor();
        let mut module = [0u32; 1];
        sensor.handle_pc_guard_init(&mut module);
        for _ in 0..300 {
            sensor.handle_pc_guard(1);
        }
        let features = collected(&mut sensor);
        assert_eq!(
            features,
            vec![Feature::Edge {
                guard: 1,
                counter_bucket: 7
            }]
        );
    }

    #[test]
    fn indirect_pairs_emit_sorted_by_reduced_key_regardless_of_arrival() {
        let mut forward = sensor();
        forward.handle_pc_indir(0x1001, 0x2002);
        forward.handle_pc_indir(0x2002, 0x1001);

        let mut reversed = sensor();
        reversed.handle_pc_indir(0x2002, 0x1001);
        reversed.handle_pc_indir(0x1001, 0x2002);

        let a = collected(&mut forward);
        let b = collected(&mut reversed);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a[0].reduced() < a[1].reduced());
    }

    #[test]
    fn consecutive_reduced_duplicates_are_skipped() {
        let mut sensor = sensor();
        sensor.handle_pc_indir(0x10, 0x20);
        sensor.handle_pc_indir(0x10, 0x20);
        // Same low 12 bits as the first pair, so the same reduced key.
        sensor.handle_pc_indir(0x10 + 0x1000, 0x20);
        sensor.handle_trace_cmp8(0x40, 2, 3);
        sensor.handle_trace_cmp8(0x40, 8, 12);

        let features = collected(&mut sensor);
        assert_eq!(features.len(), 2);
        assert!(matches!(features[0], Feature::Indirect { .. }));
        assert!(matches!(features[1], Feature::Comparison { .. }));
    }

    #[test]
    fn collection_is_deterministic_across_repeated_calls() {
        let mut sensor = sensor();
        let mut module = [0u32; 3];
        sensor.handle_pc_guard_init(&mut module);
        sensor.handle_pc_guard(2);
        sensor.handle_pc_indir(0x333, 0x111);
        sensor.handle_pc_indir(0x111, 0x333);
        sensor.handle_trace_cmp4(0x99, 7, 9);
        sensor.handle_trace_cmp1(0x98, 1, 1);

        let first = collected(&mut sensor);
        let second = collected(&mut sensor);
        assert_eq!(first, second);
    }

    #[test]
    fn cmp_handlers_feed_the_recent_compare_tables() {
        let mut sensor = sensor();
        sensor.handle_trace_cmp4(0x10, 0xFF00, 0xFF01);
        sensor.handle_trace_cmp8(0x11, 5, 5);

        let slot4 = ((0xFF00u32 ^ 0xFF01).count_ones() as usize + 1) % 32;
        assert_eq!(sensor.torc4().get(slot4), Some((0xFF00, 0xFF01)));
        assert_eq!(sensor.torc8().get(1), Some((5, 5)));
    }

    #[test]
    fn reset_clears_per_execution_state_only() {
        let mut sensor = sensor();
        let mut module = [0u32; 2];
        sensor.handle_pc_guard_init(&mut module);
        sensor.handle_pc_guard(1);
        sensor.handle_pc_indir(0x1, 0x2);
        sensor.handle_trace_cmp8(0x3, 1, 2);
        sensor.record_edge_observed(1);
        let value_bits = sensor.value_map().count_set();

        sensor.reset_collected_features();

        assert!(collected(&mut sensor).is_empty());
        assert_eq!(sensor.observed_edge_count(), 1);
        assert_eq!(sensor.value_map().count_set(), value_bits);
        assert!(sensor.torc8().get(3).is_some());
    }

    #[test]
    #[should_panic(expected = "before pc_guard_init")]
    fn counter_bump_without_init_is_fatal() {
        let mut sensor = sensor();
        sensor.handle_pc_guard(1);
    }
}
