//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation produces identical
//! results given identical inputs.
//!
//! # Testing Strategy
//!
//! Replays and lockstep peers rely on the simulation being 100%
//! deterministic. Sources of non-determinism include:
//!
//! - **Floating-point math**: We use fixed-point arithmetic via
//!   [`glest_core::math::Fixed`] throughout the tick path.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Simulation state lives in `BTreeMap`s and is walked in ID order.
//!
//! - **System randomness and wall-clock**: The core reads neither.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual system determinism (movement, combat, etc.)
//! 2. **Property tests**: Random command streams must still replay exactly
//! 3. **Integration tests**: Full scenarios are reproducible tick by tick
//! 4. **Parallel tests**: Running N simulations in parallel all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use glest_core::command::CommandSubmission;
use glest_core::simulation::Simulation;
use serde::{Deserialize, Serialize};

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Result of parallel simulation runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Final state hash from each simulation.
    pub hashes: Vec<u64>,
    /// Number of ticks each simulation ran.
    pub ticks: u64,
    /// Number of simulations run.
    pub num_sims: usize,
}

impl ParallelSimResult {
    /// Check if all simulations produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all simulations matched.
    ///
    /// # Panics
    ///
    /// Panics if simulations produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel simulations diverged!\n\
                 Simulations: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_sims,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Submissions keyed by the tick they were submitted before.
///
/// Recording a live session and replaying the log against a fresh world
/// must reproduce every committed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    /// `(tick, submission)` in submission order.
    pub entries: Vec<(u64, CommandSubmission)>,
}

impl CommandLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission made before `tick` runs.
    pub fn record(&mut self, tick: u64, submission: CommandSubmission) {
        self.entries.push((tick, submission));
    }

    /// Submissions recorded for `tick`, in order.
    pub fn at(&self, tick: u64) -> impl Iterator<Item = &CommandSubmission> {
        self.entries
            .iter()
            .filter(move |(t, _)| *t == tick)
            .map(|(_, s)| s)
    }

    /// Save as RON text.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Load from RON text.
    ///
    /// # Errors
    ///
    /// Returns the parser's error.
    pub fn from_ron(source: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(source)
    }
}

/// Run a simulation for `ticks`, submitting the log's entries before each
/// tick, and return the committed snapshot bytes after every tick.
///
/// # Panics
///
/// Panics if a snapshot fails to serialize.
pub fn replay<F>(setup_fn: F, log: &CommandLog, ticks: u64) -> Vec<Vec<u8>>
where
    F: FnOnce() -> Simulation,
{
    let mut sim = setup_fn();
    let mut frames = Vec::with_capacity(ticks as usize);
    for tick in 0..ticks {
        for submission in log.at(tick) {
            sim.submit(submission.clone());
        }
        sim.tick();
        frames.push(sim.snapshot_bytes().expect("snapshot serializes"));
    }
    frames
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```ignore
/// use glest_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(
///     5,  // Run 5 times
///     100, // 100 ticks each
///     || setup_combat_scenario(),
///     |sim| { sim.tick(); },
///     |sim| sim.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);
    if !is_deterministic {
        tracing::warn!(runs, ticks, "runs produced different final hashes");
    }

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run the simulation twice with identical setup and compare final state
/// hashes.
///
/// # Example
///
/// ```ignore
/// use glest_test_utils::determinism::verify_simulation_determinism;
/// use glest_test_utils::fixtures::empty_simulation;
///
/// assert!(verify_simulation_determinism(|| empty_simulation(32, 32), 100));
/// ```
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let result = verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |sim| {
            sim.tick();
        },
        |sim| sim.state_hash(),
    );
    result.is_deterministic
}

/// Run N simulations on scoped threads and collect final hashes.
///
/// Catches non-determinism that only shows up under thread scheduling or
/// memory layout differences.
///
/// # Panics
///
/// Panics if a simulation thread panics.
///
/// # Example
///
/// ```ignore
/// use glest_test_utils::determinism::run_parallel_simulations;
///
/// let result = run_parallel_simulations(
///     || setup_battle_scenario(),
///     8,   // 8 parallel simulations
///     500, // 500 ticks each
/// );
/// result.assert_deterministic();
/// ```
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> ParallelSimResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..num_ticks {
                        sim.tick();
                    }
                    sim.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });

    ParallelSimResult {
        hashes,
        ticks: num_ticks,
        num_sims,
    }
}

/// Compare two simulation runs tick-by-tick, finding first divergence.
///
/// # Returns
///
/// `None` if simulations are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();

    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        sim1.tick();
        sim2.tick();

        if sim1.state_hash() != sim2.state_hash() {
            tracing::warn!(tick, "simulations diverged");
            return Some(tick);
        }
    }

    None
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible command streams for
/// property-based testing of the simulation.
pub mod strategies {
    use glest_core::command::{Command, CommandSubmission, FormationShape};
    use glest_core::math::{Fixed, Vec2Fixed};
    use glest_core::{EntityId, PlayerId};
    use proptest::prelude::*;

    /// Generate a cell-aligned position, possibly just off a `size × size` map.
    pub fn arb_position(size: i32) -> impl Strategy<Value = Vec2Fixed> {
        (-2..size + 2, -2..size + 2)
            .prop_map(|(x, y)| Vec2Fixed::new(Fixed::from_num(x), Fixed::from_num(y)))
    }

    /// Generate a formation shape.
    pub fn arb_shape() -> impl Strategy<Value = FormationShape> {
        prop_oneof![
            Just(FormationShape::Line),
            Just(FormationShape::Column),
            Just(FormationShape::Box),
        ]
    }

    /// Generate a movement command (no entity refs).
    pub fn arb_movement_command(size: i32) -> impl Strategy<Value = Command> {
        prop_oneof![
            arb_position(size).prop_map(|target| Command::Move { target }),
            arb_position(size).prop_map(|target| Command::Patrol { target }),
            (arb_position(size), arb_shape()).prop_map(|(anchor, shape)| Command::Formation {
                anchor,
                shape,
                offset: Vec2Fixed::ZERO,
            }),
            arb_position(size).prop_map(|anchor| Command::GroupMove {
                anchor,
                offset: Vec2Fixed::ZERO,
            }),
            Just(Command::Stop),
            Just(Command::Hold),
        ]
    }

    /// Generate a command aimed at an entity or cell.
    pub fn arb_targeted_command(size: i32, max_id: EntityId) -> impl Strategy<Value = Command> {
        prop_oneof![
            (1..=max_id).prop_map(|target| Command::Attack { target }),
            (1..=max_id).prop_map(|target| Command::Follow { target }),
            (1..=max_id).prop_map(|target| Command::Guard { target }),
            (1..=max_id).prop_map(|node| Command::Gather { node }),
            (1..=max_id).prop_map(|target| Command::Repair { target }),
            (0..size, 0..size).prop_map(|cell| Command::Build {
                building_type: "energy_source".to_string(),
                cell,
            }),
        ]
    }

    /// Generate any unit command referencing IDs up to `max_id`.
    pub fn arb_unit_command(size: i32, max_id: EntityId) -> impl Strategy<Value = Command> {
        prop_oneof![
            arb_movement_command(size),
            arb_targeted_command(size, max_id),
        ]
    }

    /// Generate a building command.
    pub fn arb_building_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            prop_oneof![Just("worker"), Just("archer"), Just("initiate"), Just("wisp")]
                .prop_map(|name| Command::ProduceUnit {
                    unit_type: name.to_string(),
                }),
            prop_oneof![Just("improved_bows"), Just("arcane_flight")].prop_map(|tech| {
                Command::StartResearch {
                    tech: tech.to_string(),
                }
            }),
            Just(Command::StartUpgrade),
            proptest::option::of(0usize..4).prop_map(|index| Command::CancelProduction { index }),
            Just(Command::ClearProductionQueue),
        ]
    }

    /// Generate one submission from any of `players` to IDs up to `max_id`.
    pub fn arb_submission(
        players: Vec<PlayerId>,
        size: i32,
        max_id: EntityId,
    ) -> impl Strategy<Value = CommandSubmission> {
        (
            proptest::sample::select(players),
            proptest::collection::vec(1..=max_id, 1..4),
            prop_oneof![
                3 => arb_unit_command(size, max_id),
                1 => arb_building_command(),
            ],
            any::<bool>(),
        )
            .prop_map(|(player, entities, command, queued)| CommandSubmission {
                player,
                entities,
                command,
                queued,
            })
    }

    /// Generate a command stream as `(tick, submission)` pairs.
    pub fn arb_command_stream(
        players: Vec<PlayerId>,
        size: i32,
        max_id: EntityId,
        ticks: u64,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<(u64, CommandSubmission)>> {
        proptest::collection::vec((0..ticks, arb_submission(players, size, max_id)), 0..max_len)
    }
}
