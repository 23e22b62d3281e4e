//! # Simulation Server
//!
//! The authoritative server: one simulation thread, one thread per
//! connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SIMULATION SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Sessions     │  │ Simulation   │  │ Hub          │       │
//! │  │ (thread per  │─►│ (fixed-rate  │─►│ (outbound    │       │
//! │  │  connection) │  │  tick loop)  │  │  queues)     │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         │ requests        │ sole mutator       ▲            │
//! │         │                 ▼                    │ chat       │
//! │         │       ┌───────────────────┐          │            │
//! │         └──────►│ TimelineEngine    │  sessions┘            │
//! │                 └───────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Tick
//!
//! 1. Drain every request queue into the engine.
//! 2. Advance the clock, prune the timeline, move entities.
//! 3. Flush the diff pool and broadcast it as `entity_create`,
//!    `entities_update` and `entity_destroy` messages.
//! 4. Push the whole world to connections that finished logging in.

mod auth;
mod connection;
mod hub;
mod session;
mod tick;

pub use auth::{
    Authenticator, MemoryAuthenticator, MAX_PASSWORD_LEN, MAX_USERNAME_LEN, MIN_PASSWORD_LEN, MIN_USERNAME_LEN,
};
pub use connection::{ConnectionId, ConnectionState};
pub use hub::{Hub, Payload};
pub use session::Session;
pub use tick::{TickLoop, TickStats};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tempo_core::{ChunkCoord, DiffPool, Tick, TerrainBlock, TimelineEngine, WireTick};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::protocol::{EntityUpdate, ExitCode, Message};
use crate::request::{pipeline, Backend, Completer, FrontendRegistry};

/// Entity changes per `entities_update` message.
pub const MAX_UPDATES_PER_MESSAGE: usize = 1024;

/// Commands from sessions to the simulation thread.
#[derive(Debug)]
pub enum Control {
    /// Push the world to a logged-in connection, then start broadcasting to it.
    Join {
        /// The connection.
        connection: ConnectionId,
        /// Resolved once the connection is ready.
        done: Completer<()>,
    },
}

/// Services shared by the simulation and every session.
///
/// Created once at startup and handed to each session by reference count.
pub struct Context {
    /// Server configuration.
    pub config: ServerConfig,
    /// Credential checks.
    pub authenticator: Arc<dyn Authenticator>,
    /// Logged-in connections.
    pub hub: Hub,
    /// Registers request producers.
    pub requests: FrontendRegistry,
    control: Sender<Control>,
    next_connection: AtomicU32,
}

impl Context {
    /// Allocates a connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}

/// What one tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick after the step.
    pub tick: Tick,
    /// Requests applied.
    pub accepted: usize,
    /// Requests refused.
    pub rejected: usize,
    /// Deltas that fell out of the rewind horizon.
    pub pruned: usize,
    /// Entities moved by their speed.
    pub moved: usize,
    /// Messages broadcast.
    pub broadcasts: usize,
    /// Connections that became ready.
    pub joined: usize,
}

/// The simulation thread's state.
pub struct SimulationServer {
    context: Arc<Context>,
    engine: TimelineEngine,
    backend: Backend,
    control: Receiver<Control>,
    /// Loaded terrain, kept encoded for world pushes.
    terrain: BTreeMap<ChunkCoord, Payload>,
    tick_loop: TickLoop,
}

impl SimulationServer {
    /// Builds the engine, the request pipeline and the shared context.
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Result<Self, ServerError> {
        config.validate()?;
        let engine = TimelineEngine::new(config.rewind_horizon)?;
        let (requests, backend) = pipeline(config.queue_capacity);
        let (control_tx, control) = unbounded();
        let tick_loop = TickLoop::new(config.tick_rate);

        let context = Arc::new(Context {
            hub: Hub::new(config.max_players),
            config,
            authenticator,
            requests,
            control: control_tx,
            next_connection: AtomicU32::new(1),
        });
        Ok(Self {
            context,
            engine,
            backend,
            control,
            terrain: BTreeMap::new(),
            tick_loop,
        })
    }

    /// Handle to the shared services, for sessions.
    #[must_use]
    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.context)
    }

    /// The authoritative state.
    #[must_use]
    pub const fn engine(&self) -> &TimelineEngine {
        &self.engine
    }

    /// Timing of the ticks run by [`SimulationServer::run`].
    #[must_use]
    pub const fn tick_stats(&self) -> &TickStats {
        self.tick_loop.stats()
    }

    /// Chunks with loaded terrain.
    pub fn terrain_chunks(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.terrain.keys().copied()
    }

    /// Loads or replaces a terrain block and sends it to every ready connection.
    pub fn load_terrain(&mut self, block: TerrainBlock) -> Result<(), ServerError> {
        let coord = block.coord();
        let payload: Payload = Message::TerrainUpdate(block).encode()?.into();
        self.context.hub.broadcast(&payload);
        self.terrain.insert(coord, payload);
        tracing::debug!(chunk_x = coord.x, chunk_y = coord.y, "terrain block loaded");
        Ok(())
    }

    /// Runs one simulation step.
    pub fn run_tick(&mut self) -> Result<TickReport, ServerError> {
        let drained = self.backend.drain(&mut self.engine);
        let pruned = self.engine.advance();
        let moved = self.engine.step_motion()?;

        let pool = self.engine.store().flush();
        let tick = self.engine.clock().wire_tick();
        let mut broadcasts = 0;
        for payload in encode_pool(tick, &pool)? {
            self.context.hub.broadcast(&payload);
            broadcasts += 1;
        }
        let joined = self.process_control(tick)?;

        Ok(TickReport {
            tick: self.engine.now(),
            accepted: drained.accepted,
            rejected: drained.rejected,
            pruned,
            moved,
            broadcasts,
            joined,
        })
    }

    /// Runs ticks at the configured rate until `running` is cleared, then
    /// tells every ready connection the server is going away.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), ServerError> {
        tracing::info!(
            tick_rate = self.context.config.tick_rate,
            rewind_horizon = self.context.config.rewind_horizon,
            "simulation started"
        );
        while running.load(Ordering::Acquire) {
            self.tick_loop.wait_for_next_tick();
            let start = self.tick_loop.begin_tick();
            match self.run_tick() {
                Ok(report) if report.accepted + report.rejected + report.joined > 0 => {
                    tracing::debug!(?report, "tick");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(%err, tick = self.engine.now(), "tick failed"),
            }
            self.tick_loop.end_tick(start);
        }

        let farewell: Payload = Message::Exit {
            code: ExitCode::ServerShutdown,
        }
        .encode()?
        .into();
        self.context.hub.broadcast(&farewell);
        let stats = self.tick_loop.stats();
        tracing::info!(
            ticks = stats.total_ticks,
            late = stats.late_ticks,
            avg_us = stats.avg_tick_us,
            "simulation stopped"
        );
        Ok(())
    }

    fn process_control(&mut self, tick: WireTick) -> Result<usize, ServerError> {
        let mut joined = 0;
        while let Ok(command) = self.control.try_recv() {
            match command {
                Control::Join { connection, done } => {
                    if self.push_world(connection, tick)? {
                        done.complete(Ok(()));
                        joined += 1;
                    }
                }
            }
        }
        Ok(joined)
    }

    /// Sends every live entity and terrain block to `connection` and marks it
    /// ready. A connection whose queue overflows is released.
    fn push_world(&self, connection: ConnectionId, tick: WireTick) -> Result<bool, ServerError> {
        let hub = &self.context.hub;
        if !hub.contains(connection) {
            return Ok(false);
        }
        for entity in self.engine.store().iter() {
            let payload: Payload = Message::EntityCreate {
                tick,
                update: EntityUpdate::full(*entity),
            }
            .encode()?
            .into();
            if !hub.send_to(connection, payload) {
                return Ok(self.evict(connection));
            }
        }
        for payload in self.terrain.values() {
            if !hub.send_to(connection, Arc::clone(payload)) {
                return Ok(self.evict(connection));
            }
        }
        Ok(hub.mark_ready(connection))
    }

    fn evict(&self, connection: ConnectionId) -> bool {
        tracing::warn!(%connection, "world push overflowed the outbound queue");
        self.context.hub.release(connection);
        false
    }
}

/// Encodes a flushed pool: creations, then one batch of updates per
/// [`MAX_UPDATES_PER_MESSAGE`] entities, then removals.
pub fn encode_pool(tick: WireTick, pool: &DiffPool) -> Result<Vec<Payload>, ServerError> {
    let mut payloads = Vec::new();
    for entity in pool.created() {
        let message = Message::EntityCreate {
            tick,
            update: EntityUpdate::full(*entity),
        };
        payloads.push(message.encode()?.into());
    }

    let mut updates: Vec<EntityUpdate> = pool
        .updated()
        .values()
        .map(|pending| EntityUpdate {
            entity: pending.entity,
            diff: pending.diff,
        })
        .collect();
    updates.sort_by_key(|update| update.entity.id);
    for batch in updates.chunks(MAX_UPDATES_PER_MESSAGE) {
        let message = Message::EntitiesUpdate {
            tick,
            updates: batch.to_vec(),
        };
        payloads.push(message.encode()?.into());
    }

    for &entity in pool.deleted() {
        payloads.push(Message::EntityDestroy { tick, entity }.encode()?.into());
    }
    Ok(payloads)
}
