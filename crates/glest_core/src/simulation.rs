//! Core simulation loop.
//!
//! The simulation advances a [`World`] one fixed step at a time and owns
//! the inbound command queue and the committed read view. Wall-clock
//! pacing lives outside the core; calling [`Simulation::tick`] in a loop
//! runs the game as fast as the host allows.
//!
//! # Determinism
//!
//! - No floating-point math in the tick path (everything is [`Fixed`])
//! - No system randomness
//! - Entities advance in ascending ID order; ties break on ID
//! - Same initial state and same submissions give the same snapshots
//!
//! # Tick order
//!
//! 1. Drain submitted commands through the dispatcher
//! 2. Update units
//! 3. Update buildings (production, generation, dying → dead)
//! 4. Credit generated resources
//! 5. Death sweep and garbage collection
//! 6. Flush events to subscribers
//! 7. Commit the read view
//!
//! [`Fixed`]: crate::math::Fixed

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{mpsc, Arc};

use crate::catalog::Catalog;
use crate::command::CommandSubmission;
use crate::config::GameConfig;
use crate::dispatch::dispatch;
use crate::error::{CommandError, GameError, Result};
use crate::events::{EventHandler, EventKind, GameEvent};
use crate::view::{SharedView, WorldSnapshot};
use crate::world::World;

/// Where the outcome of a queued submission is reported.
pub type ReplyTicket = mpsc::Sender<std::result::Result<(), CommandError>>;

/// The core game simulation.
#[derive(Debug)]
pub struct Simulation {
    world: World,
    inbox: VecDeque<(CommandSubmission, Option<ReplyTicket>)>,
    rejected: u64,
    shared: SharedView,
}

impl Simulation {
    /// Build the world for `config` and commit its first snapshot.
    ///
    /// # Errors
    ///
    /// Anything [`World::new`] rejects.
    pub fn new(config: &GameConfig, catalog: Arc<Catalog>) -> Result<Self> {
        World::new(config, catalog).map(Self::from_world)
    }

    /// Wrap an already built world.
    #[must_use]
    pub fn from_world(world: World) -> Self {
        let shared = SharedView::new(WorldSnapshot::capture(&world));
        Self {
            world,
            inbox: VecDeque::new(),
            rejected: 0,
            shared,
        }
    }

    /// The world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access for setup between ticks.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Current tick.
    #[must_use]
    pub const fn get_tick(&self) -> u64 {
        self.world.tick
    }

    /// Dispatch a submission right away, between ticks.
    ///
    /// # Errors
    ///
    /// The validation failure; the world is unchanged.
    pub fn issue(&mut self, submission: &CommandSubmission) -> std::result::Result<(), CommandError> {
        let result = dispatch(&mut self.world, submission);
        if result.is_err() {
            self.rejected += 1;
        }
        result
    }

    /// Queue a submission for the start of the next tick.
    pub fn submit(&mut self, submission: CommandSubmission) {
        self.inbox.push_back((submission, None));
    }

    /// Queue a submission and report its outcome on `reply` when drained.
    pub fn submit_with_reply(&mut self, submission: CommandSubmission, reply: ReplyTicket) {
        self.inbox.push_back((submission, Some(reply)));
    }

    /// Submissions waiting for the next tick.
    #[must_use]
    pub fn pending_submissions(&self) -> usize {
        self.inbox.len()
    }

    /// Advance the simulation by one tick and return the flushed events.
    pub fn tick(&mut self) -> Vec<GameEvent> {
        while let Some((submission, reply)) = self.inbox.pop_front() {
            let result = dispatch(&mut self.world, &submission);
            if let Err(reason) = &result {
                self.rejected += 1;
                self.world.events.emit(GameEvent::CommandRejected {
                    player: submission.player,
                    reason: reason.clone(),
                });
            }
            if let Some(reply) = reply {
                // The submitter may have stopped listening.
                let _ = reply.send(result);
            }
        }

        self.world.advance_tick();
        let events = self.world.events.flush();

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.world.tick, state_hash = hash, "simulation state hash");
        }
        #[cfg(feature = "debug-validation")]
        for problem in self.world.check_invariants() {
            tracing::error!(tick = self.world.tick, %problem, "invariant violated");
        }

        self.shared.store(WorldSnapshot::capture(&self.world));
        events
    }

    /// Record that the host loop fell behind and dropped ticks.
    ///
    /// The event goes out with the next tick's flush.
    pub fn report_slow_tick(&mut self, dropped: u64) {
        tracing::warn!(tick = self.world.tick, dropped, "tick loop fell behind");
        self.world.events.emit(GameEvent::SlowTick { dropped });
    }

    /// Register an event handler.
    pub fn subscribe(&mut self, kind: EventKind, handler: EventHandler) {
        self.world.events.subscribe(kind, handler);
    }

    /// Submissions rejected so far.
    #[must_use]
    pub const fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Last committed snapshot.
    #[must_use]
    pub fn view(&self) -> Arc<WorldSnapshot> {
        self.shared.load()
    }

    /// Handle readers can keep across ticks.
    #[must_use]
    pub fn shared_view(&self) -> SharedView {
        self.shared.clone()
    }

    /// Hash of the simulation state.
    ///
    /// Two simulations with identical state produce identical hashes, so
    /// comparing hashes per tick finds the first divergence.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.world.tick.hash(&mut hasher);
        self.world.entities.hash(&mut hasher);
        self.world.ledger.hash(&mut hasher);
        self.world.nodes.hash(&mut hasher);
        self.world.players.hash(&mut hasher);
        hasher.finish()
    }

    /// Committed snapshot as bytes, for bit-exact comparison.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&*self.view())
            .map_err(|e| GameError::InvalidState(format!("failed to serialize snapshot: {e}")))
    }
}
