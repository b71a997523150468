//! The mutate-run-observe-accept loop.
//!
//! One execution is bracketed by `reset_collected_features` and
//! `collect_features` on the sensor. An input is accepted when it produces
//! a feature never seen before, or reaches a known feature at strictly
//! smaller complexity. Acceptance appends to the pool, persists through the
//! World callback, rescores, and batch-applies the evictions.

use rand_core::RngCore as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::corpus::pool::{UnitInfo, UnitPool};
use crate::corpus::world::World;
use crate::coverage::sensor::TracePc;
use crate::error::GonzoResult;
use crate::feature::Feature;
use crate::generator::InputGenerator;
use crate::rng::GonzoRng;

/// Classification of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Pass,
    Interesting,
    Crash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzStats {
    pub run_id: String,
    pub seed: u64,
    pub executed: u64,
    pub interesting: u64,
    pub crashes: u64,
    pub pool_units: usize,
    pub coverage_score: f64,
    pub observed_edges: usize,
}

impl FuzzStats {
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Result of a bounded fuzzing run.
#[derive(Debug)]
pub struct FuzzReport<I> {
    pub stats: FuzzStats,
    /// The input that made the target report failure, when one was found.
    pub crash: Option<I>,
}

pub struct Fuzzer<G: InputGenerator, W: World<G::Input>> {
    generator: G,
    world: W,
    pool: UnitPool<G::Input>,
    rand: GonzoRng,
    runs: Option<u64>,
    stats: FuzzStats,
}

impl<G: InputGenerator, W: World<G::Input>> Fuzzer<G, W> {
    pub fn new(generator: G, world: W, config: &Config) -> Self {
        let seed = config.seed.unwrap_or_else(gen_seed);
        Self {
            generator,
            world,
            pool: UnitPool::new(config),
            rand: GonzoRng::new(rng_seed_from(seed)),
            runs: config.runs,
            stats: FuzzStats {
                run_id: Uuid::new_v4().to_string(),
                seed,
                executed: 0,
                interesting: 0,
                crashes: 0,
                pool_units: 0,
                coverage_score: 0.0,
                observed_edges: 0,
            },
        }
    }

    pub fn stats(&self) -> &FuzzStats {
        &self.stats
    }

    pub fn pool(&self) -> &UnitPool<G::Input> {
        &self.pool
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    /// Pin an externally chosen unit into the selection mix. It never
    /// enters feature accounting and is never persisted or evicted.
    pub fn set_favored_unit(&mut self, unit: G::Input) {
        let complexity = self.generator.complexity(&unit);
        self.pool
            .set_favored_unit(UnitInfo::new(unit, complexity, Vec::new()));
    }

    /// Replay starting inputs through the acceptance path, unmutated. The
    /// pool state is reconstructable from the inputs fed back here.
    pub fn seed_corpus(
        &mut self,
        sensor: &mut TracePc,
        test: &mut impl FnMut(&mut TracePc, &G::Input) -> bool,
        inputs: Vec<G::Input>,
    ) -> GonzoResult<()> {
        for input in inputs {
            let _ = self.execute(sensor, test, input)?;
        }
        Ok(())
    }

    /// One iteration: pick a unit (or bootstrap a fresh input), mutate,
    /// execute, observe, and accept if interesting.
    pub fn run_once(
        &mut self,
        sensor: &mut TracePc,
        test: &mut impl FnMut(&mut TracePc, &G::Input) -> bool,
    ) -> GonzoResult<(RunOutcome, G::Input)> {
        let input = if self.pool.is_empty() && !self.pool.has_favored() {
            self.generator.new_input(&mut self.rand)
        } else {
            let idx = self.pool.choose_unit_idx_to_mutate(&mut self.rand);
            let mut input = self.pool[idx].unit.clone();
            self.generator.mutate(&mut input, &mut self.rand);
            input
        };
        self.execute(sensor, test, input)
    }

    /// Loop until the configured run budget is spent or the target reports
    /// a failure. Stops at the first crash and surfaces the crashing input.
    pub fn run(
        &mut self,
        sensor: &mut TracePc,
        test: &mut impl FnMut(&mut TracePc, &G::Input) -> bool,
    ) -> GonzoResult<FuzzReport<G::Input>> {
        let budget = self.runs.unwrap_or(u64::MAX);
        let mut crash = None;
        for _ in 0..budget {
            let (outcome, input) = self.run_once(sensor, test)?;
            if outcome == RunOutcome::Crash {
                crash = Some(input);
                break;
            }
        }
        Ok(FuzzReport {
            stats: self.stats.clone(),
            crash,
        })
    }

    fn execute(
        &mut self,
        sensor: &mut TracePc,
        test: &mut impl FnMut(&mut TracePc, &G::Input) -> bool,
        input: G::Input,
    ) -> GonzoResult<(RunOutcome, G::Input)> {
        sensor.reset_collected_features();
        let ok = test(sensor, &input);
        self.stats.executed += 1;

        let mut features = Vec::new();
        sensor.collect_features(|feature| features.push(feature));

        if !ok {
            self.stats.crashes += 1;
            self.refresh_stats(sensor);
            return Ok((RunOutcome::Crash, input));
        }

        let complexity = self.generator.complexity(&input);
        let interesting = features.iter().any(|feature| {
            match self.pool.smallest_complexity_for(feature.reduced()) {
                None => true,
                Some(smallest) => complexity < smallest,
            }
        });
        if !interesting {
            self.refresh_stats(sensor);
            return Ok((RunOutcome::Pass, input));
        }

        for feature in &features {
            if let Feature::Edge { guard, .. } = feature {
                sensor.record_edge_observed(*guard);
            }
        }

        self.stats.interesting += 1;
        tracing::debug!(complexity, features = features.len(), "accepting unit");

        let info = UnitInfo::new(input.clone(), complexity, features);
        self.pool.append(info).apply(&mut self.world)?;
        for removal in self.pool.update_scores_and_weights() {
            removal.apply(&mut self.world)?;
        }

        self.refresh_stats(sensor);
        Ok((RunOutcome::Interesting, input))
    }

    fn refresh_stats(&mut self, sensor: &TracePc) {
        self.stats.pool_units = self.pool.len();
        self.stats.coverage_score = self.pool.coverage_score();
        self.stats.observed_edges = sensor.observed_edge_count();
    }
}

fn gen_seed() -> u64 {
    let mut seed = [0u8; 8];
    rand_core::OsRng.fill_bytes(&mut seed);
    u64::from_le_bytes(seed)
}

/// Derive the 32-bit engine seed from the user-facing 64-bit seed.
fn rng_seed_from(seed: u64) -> u32 {
    let digest = blake3::hash(&seed.to_le_bytes());
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::world::InMemoryWorld;

    /// Byte-string generator for the tests: complexity is length + 1 so the
    /// empty input stays representable.
    struct ByteGenerator {
        max_len: usize,
    }

    impl InputGenerator for ByteGenerator {
        type Input = Vec<u8>;

        fn new_input(&mut self, rand: &mut GonzoRng) -> Vec<u8> {
            let len = rand.index_below(4);
            (0..len).map(|_| rand.uint16() as u8).collect()
        }

        fn mutate(&mut self, input: &mut Vec<u8>, rand: &mut GonzoRng) {
            match rand.index_below(3) {
                0 if input.len() < self.max_len => {
                    let idx = rand.index_below(input.len() + 1);
                    input.insert(idx, rand.uint16() as u8);
                }
                1 if !input.is_empty() => {
                    let idx = rand.index_below(input.len());
                    input.remove(idx);
                }
                _ if !input.is_empty() => {
                    let idx = rand.index_below(input.len());
                    input[idx] ^= 1 << rand.index_below(8);
                }
                _ => input.push(rand.uint16() as u8),
            }
        }

        fn complexity(&self, input: &Vec<u8>) -> f64 {
            input.len() as f64 + 1.0
        }
    }

    /// Synthetic target: one guard per low nibble seen, a failure on the
    /// magic prefix.
    fn target(sensor: &mut TracePc, input: &Vec<u8>) -> bool {
        for &byte in input {
            sensor.handle_pc_guard(u32::from(byte % 16) + 1);
        }
        sensor.handle_trace_cmp8(0x10, input.len() as u64, 6);
        !input.starts_with(&[0xFF, 0xFF])
    }

    fn init_sensor(config: &Config) -> TracePc {
        let mut sensor = TracePc::new(config);
        let mut slots = [0u32; 17];
        sensor.handle_pc_guard_init(&mut slots);
        sensor
    }

    fn fuzzer(config: &Config) -> Fuzzer<ByteGenerator, InMemoryWorld<Vec<u8>>> {
        Fuzzer::new(
            ByteGenerator { max_len: 32 },
            InMemoryWorld::new(),
            config,
        )
    }

    #[test]
    fn accepted_units_reach_the_output_corpus() {
        let config = Config {
            seed: Some(7),
            runs: Some(50),
            ..Config::default()
        };
        let mut sensor = init_sensor(&config);
        let mut fuzzer = fuzzer(&config);

        let report = fuzzer.run(&mut sensor, &mut target).expect("run");
        assert!(report.stats.executed > 0);
        assert!(fuzzer.pool().len() > 0);
        assert_eq!(fuzzer.world().units.len(), fuzzer.pool().len());
        assert!(report.stats.observed_edges > 0);
    }

    #[test]
    fn identical_seeds_reproduce_the_run() {
        let config = Config {
            seed: Some(42),
            runs: Some(80),
            ..Config::default()
        };

        let mut sensor_a = init_sensor(&config);
        let mut fuzzer_a = fuzzer(&config);
        let report_a = fuzzer_a.run(&mut sensor_a, &mut target).expect("run a");

        let mut sensor_b = init_sensor(&config);
        let mut fuzzer_b = fuzzer(&config);
        let report_b = fuzzer_b.run(&mut sensor_b, &mut target).expect("run b");

        assert_eq!(report_a.stats.executed, report_b.stats.executed);
        assert_eq!(report_a.stats.interesting, report_b.stats.interesting);
        assert_eq!(fuzzer_a.world().units, fuzzer_b.world().units);
        assert_eq!(report_a.crash, report_b.crash);
    }

    #[test]
    fn seeding_the_corpus_accepts_novel_inputs_unmutated() {
        let config = Config {
            seed: Some(3),
            ..Config::default()
        };
        let mut sensor = init_sensor(&config);
        let mut fuzzer = fuzzer(&config);

        fuzzer
            .seed_corpus(
                &mut sensor,
                &mut target,
                vec![vec![1, 2, 3], vec![1, 2, 3], vec![4]],
            )
            .expect("seed corpus");

        assert!(fuzzer.pool().len() >= 1);
        assert!(fuzzer
            .world()
            .units
            .iter()
            .any(|u| u == &vec![1, 2, 3]));
    }

    #[test]
    fn a_failing_target_surfaces_the_crashing_input() {
        let config = Config {
            seed: Some(11),
            runs: Some(2),
            ..Config::default()
        };
        let mut sensor = init_sensor(&config);
        let mut fuzzer = fuzzer(&config);

        let mut always_fail = |sensor: &mut TracePc, _input: &Vec<u8>| {
            sensor.handle_trace_cmp1(0x1, 0, 1);
            false
        };
        let report = fuzzer.run(&mut sensor, &mut always_fail).expect("run");
        assert!(report.crash.is_some());
        assert_eq!(report.stats.crashes, 1);
        assert_eq!(report.stats.executed, 1);
    }

    #[test]
    fn stats_render_as_json() {
        let config = Config {
            seed: Some(1),
            ..Config::default()
        };
        let fuzzer = fuzzer(&config);
        let rendered = fuzzer.stats().pretty();
        assert!(rendered.contains("\"seed\": 1"));
        assert!(rendered.contains("run_id"));
    }
}
