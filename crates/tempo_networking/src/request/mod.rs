//! # Request Frontend/Backend
//!
//! The boundary between connection threads and the simulation thread.
//!
//! ```text
//!  producer A ─► Frontend ─► [bounded queue A] ─┐
//!  producer B ─► Frontend ─► [bounded queue B] ─┼─► Backend ─► TimelineEngine
//!  scheduler  ─► Frontend ─► [bounded queue C] ─┘      │
//!       ▲                                              │
//!       └───────────── Pending ◄── Completer ◄─────────┘
//! ```
//!
//! Every producer owns one queue, so its requests are accepted in
//! submission order. A full queue blocks the producer. The backend services
//! queues round-robin and never waits on any single one.

mod completion;

pub use completion::{completion, Completer, Pending};

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender, TryRecvError};
use tempo_core::{Action, ActionOrigin, Delta, Entity, EntityDiff, EntityId, Operation, Tick, TimelineEngine, WireTick};

use crate::error::RequestError;

/// Deltas produced by an accepted request.
pub type Reply = Vec<Delta>;

/// When a request takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetTick {
    /// The current authoritative tick.
    Now,
    /// A monotonic tick.
    At(Tick),
    /// A wire tick received from a client, reconstructed on acceptance.
    Wire(WireTick),
}

/// A mutation waiting to be accepted by the simulation loop.
#[derive(Debug)]
pub struct Request {
    /// When it takes effect.
    pub target: TargetTick,
    /// Who asked for it.
    pub origin: ActionOrigin,
    /// What it does.
    pub operation: Operation,
    completer: Completer<Reply>,
}

/// Creates the producer registry and the single consumer.
///
/// Every registered producer gets its own queue of `capacity` requests.
#[must_use]
pub fn pipeline(capacity: usize) -> (FrontendRegistry, Backend) {
    let (register_tx, register_rx) = unbounded();
    (
        FrontendRegistry {
            register: register_tx,
            capacity,
        },
        Backend {
            register: register_rx,
            queues: Vec::new(),
        },
    )
}

/// Hands out producer queues. Cheap to clone.
#[derive(Clone, Debug)]
pub struct FrontendRegistry {
    register: Sender<Receiver<Request>>,
    capacity: usize,
}

impl FrontendRegistry {
    /// Opens a new producer queue.
    ///
    /// If the backend is already gone, every submission through the
    /// returned frontend fails with [`RequestError::Disconnected`].
    #[must_use]
    pub fn register(&self) -> Frontend {
        let (queue, receiver) = bounded(self.capacity);
        let _ = self.register.send(receiver);
        Frontend { queue }
    }
}

/// Submitting side of one producer queue.
#[derive(Debug)]
pub struct Frontend {
    queue: Sender<Request>,
}

impl Frontend {
    /// Queues a request, blocking while the queue is full.
    pub fn submit(
        &self,
        target: TargetTick,
        origin: ActionOrigin,
        operation: Operation,
    ) -> Result<Pending<Reply>, RequestError> {
        let (completer, pending) = completion();
        let request = Request {
            target,
            origin,
            operation,
            completer,
        };
        self.queue.send(request).map_err(|_| RequestError::Disconnected)?;
        Ok(pending)
    }

    /// Creates an entity at the current tick.
    pub fn create(&self, entity: Entity) -> Result<Pending<Reply>, RequestError> {
        self.submit(TargetTick::Now, ActionOrigin::Server, Operation::Create(entity))
    }

    /// Updates the flagged fields of an entity at the current tick.
    pub fn update(&self, entity: Entity, diff: EntityDiff) -> Result<Pending<Reply>, RequestError> {
        self.submit(TargetTick::Now, ActionOrigin::Server, Operation::Update { entity, diff })
    }

    /// Deletes an entity at the current tick.
    pub fn delete(&self, id: EntityId) -> Result<Pending<Reply>, RequestError> {
        self.submit(TargetTick::Now, ActionOrigin::Server, Operation::Delete(id))
    }
}

/// Outcome of one drain pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Requests applied to the engine.
    pub accepted: usize,
    /// Requests the engine refused.
    pub rejected: usize,
}

/// Single consumer of every producer queue.
#[derive(Debug)]
pub struct Backend {
    register: Receiver<Receiver<Request>>,
    queues: Vec<Receiver<Request>>,
}

impl Backend {
    /// Number of live producer queues.
    #[must_use]
    pub fn producers(&self) -> usize {
        self.queues.len()
    }

    fn adopt_new_producers(&mut self) {
        self.queues.extend(self.register.try_iter());
    }

    /// Accepts every request queued when the call starts, without blocking.
    ///
    /// Queues are serviced round-robin, one request at a time. Queues whose
    /// producer is gone are dropped once empty.
    pub fn drain(&mut self, engine: &mut TimelineEngine) -> DrainStats {
        self.adopt_new_producers();
        let mut stats = DrainStats::default();
        if self.queues.is_empty() {
            return stats;
        }

        // A different queue goes first on every pass.
        self.queues.rotate_left(1);

        let mut budget: Vec<usize> = self.queues.iter().map(Receiver::len).collect();
        let mut closed = vec![false; self.queues.len()];
        let mut remaining: usize = budget.iter().sum();

        while remaining > 0 {
            for (index, queue) in self.queues.iter().enumerate() {
                if budget[index] == 0 {
                    continue;
                }
                budget[index] -= 1;
                remaining -= 1;
                closed[index] |= service(engine, queue, &mut stats);
            }
        }

        // One more look at every queue tells a dropped producer from an idle one.
        for (index, queue) in self.queues.iter().enumerate() {
            if !closed[index] {
                closed[index] = service(engine, queue, &mut stats);
            }
        }
        let mut flags = closed.into_iter();
        self.queues.retain(|_| !flags.next().unwrap_or(false));

        stats
    }

    /// Blocks until a request is queued or `timeout` elapses, then drains.
    pub fn wait_and_drain(&mut self, engine: &mut TimelineEngine, timeout: Duration) -> DrainStats {
        self.adopt_new_producers();
        if self.queues.iter().all(Receiver::is_empty) {
            let mut select = Select::new();
            select.recv(&self.register);
            for queue in &self.queues {
                select.recv(queue);
            }
            let _ = select.ready_timeout(timeout);
        }
        self.drain(engine)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.adopt_new_producers();
        // Dropping a request resolves its completion as disconnected.
        for queue in &self.queues {
            while queue.try_recv().is_ok() {}
        }
    }
}

/// Takes at most one request from `queue`. Returns true if the producer is gone.
fn service(engine: &mut TimelineEngine, queue: &Receiver<Request>, stats: &mut DrainStats) -> bool {
    match queue.try_recv() {
        Ok(request) => {
            if accept(engine, request) {
                stats.accepted += 1;
            } else {
                stats.rejected += 1;
            }
            false
        }
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Disconnected) => true,
    }
}

/// Applies one request and resolves its completion.
fn accept(engine: &mut TimelineEngine, request: Request) -> bool {
    let Request {
        target,
        origin,
        operation,
        completer,
    } = request;

    let tick = match target {
        TargetTick::Now => Some(engine.now()),
        TargetTick::At(tick) => Some(tick),
        TargetTick::Wire(wire) => engine.clock().reconstruct(wire),
    };
    let result = match tick {
        Some(tick) => engine.submit(Action::new(tick, origin, operation)),
        None => Err(tempo_core::CoreError::InvalidArgument(format!(
            "wire tick {target:?} was never produced by this clock"
        ))),
    };

    match result {
        Ok(deltas) => {
            tracing::debug!(?origin, deltas = deltas.len(), now = engine.now(), "request accepted");
            completer.complete(Ok(deltas));
            true
        }
        Err(err) => {
            tracing::debug!(?origin, error = %err, "request rejected");
            completer.complete(Err(RequestError::Rejected(err)));
            false
        }
    }
}
