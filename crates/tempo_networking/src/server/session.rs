//! # Client Session
//!
//! One session per connection. The session thread reads and handles client
//! messages; a companion writer thread drains the connection's outbound
//! queue, which the session and the broadcast hub both feed.
//!
//! ```text
//!  socket ─► read_message ─► Session::handle ─┬─► Frontend ─► simulation
//!                                             └─► outbound ─┐
//!  simulation ─► Hub::broadcast ────────────────► outbound ─┴─► writer ─► socket
//! ```
//!
//! ## Lifecycle
//!
//! 1. `version`: equal versions move to `Accepted`; a mismatch closes the
//!    connection with `ClientOutdated` or `ServerOutdated`.
//! 2. `login` / `register`: failures count against `max_login_attempts`.
//!    A successful login claims a hub slot, spawns the player's entity and
//!    asks the simulation for the world push.
//! 3. `Ready`: ping, chat, actions on the player's own entity, exit.
//!
//! On any exit path the player's entity is deleted and the slot released.

use std::cmp::Ordering;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tempo_core::{ActionOrigin, CoreError, Entity, EntityDiff, EntityId, EntityKind, Operation, Position, TickClock, WireTick};

use super::connection::{ConnectionId, ConnectionState};
use super::hub::Payload;
use super::{Context, Control};
use crate::error::{ProtocolError, RequestError, ServerError};
use crate::protocol::{
    read_message, write_frame, EntityUpdate, ExitCode, LoginGrant, LoginResponseCode, Message, MessageType,
    RegisterResponseCode, PROTOCOL_VERSION,
};
use crate::request::{completion, Frontend, Pending, Reply, TargetTick};

/// What the read loop does after a message.
enum Flow {
    Continue,
    Close,
}

/// Server side of one client connection.
pub struct Session {
    id: ConnectionId,
    context: Arc<Context>,
    frontend: Frontend,
    outbound: Sender<Payload>,
    state: ConnectionState,
    failed_attempts: u32,
    entity: Option<EntityId>,
    /// Client actions the simulation has not answered yet.
    in_flight: Vec<Pending<Reply>>,
}

impl Session {
    /// Serves one connection until the client leaves, the stream breaks or
    /// the client violates the protocol.
    ///
    /// `reader` and `writer` are the two halves of the same stream.
    pub fn serve<R, W>(context: Arc<Context>, mut reader: R, writer: W) -> Result<(), ServerError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let id = context.next_connection_id();
        let (outbound, queue) = bounded(context.config.outbound_capacity);
        let writer_thread = thread::Builder::new()
            .name(format!("{id}-writer"))
            .spawn(move || write_outbound(writer, &queue))?;

        let mut session = Self {
            id,
            frontend: context.requests.register(),
            context,
            outbound,
            state: ConnectionState::Connected,
            failed_attempts: 0,
            entity: None,
            in_flight: Vec::new(),
        };
        tracing::info!(connection = %id, "connection opened");

        let result = session.pump(&mut reader);
        session.close();
        drop(session);

        // The writer stops once every sender is gone, after flushing what was queued.
        match writer_thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(connection = %id, %err, "writer stopped"),
            Err(_) => tracing::error!(connection = %id, "writer thread panicked"),
        }
        match &result {
            Ok(()) => tracing::info!(connection = %id, "connection closed"),
            Err(err) => tracing::info!(connection = %id, %err, "connection dropped"),
        }
        result
    }

    /// Current stage of the connection.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    fn pump<R: Read>(&mut self, reader: &mut R) -> Result<(), ServerError> {
        loop {
            let message = match read_message(reader) {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.fail(err.into())),
            };
            match self.handle(message) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => return Ok(()),
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Tells the client why it is being dropped, when the reason is its own input.
    fn fail(&mut self, err: ServerError) -> ServerError {
        if matches!(&err, ServerError::Protocol(inner) if !matches!(inner, ProtocolError::Io(_))) {
            self.exit(ExitCode::ProtocolViolation);
        }
        err
    }

    fn handle(&mut self, message: Message) -> Result<Flow, ServerError> {
        let kind = message.message_type();
        match (self.state, message) {
            (_, Message::Ping) => self.send(&Message::Pong)?,
            (_, Message::Pong) => {}
            (_, Message::Exit { code }) => {
                tracing::debug!(connection = %self.id, ?code, "client exit");
                return Ok(Flow::Close);
            }
            (ConnectionState::Connected, Message::Version { version }) => return self.handshake(version),
            (ConnectionState::Accepted, Message::Login { username, password }) => self.login(&username, &password)?,
            (ConnectionState::Accepted, Message::Register { username, password }) => {
                self.register(&username, &password)?;
            }
            (ConnectionState::Ready, _) if !self.context.hub.contains(self.id) => {
                tracing::warn!(connection = %self.id, "evicted from the hub, closing");
                return Ok(Flow::Close);
            }
            (ConnectionState::Ready, Message::ChatSend { message }) => self.chat(message)?,
            (ConnectionState::Ready, Message::Action { tick, update }) => self.action(tick, update)?,
            (state, _) => {
                return Err(ProtocolError::UnexpectedMessage {
                    got: kind,
                    state: state.name(),
                }
                .into())
            }
        }
        Ok(Flow::Continue)
    }

    fn handshake(&mut self, version: u16) -> Result<Flow, ServerError> {
        let code = match version.cmp(&PROTOCOL_VERSION) {
            Ordering::Less => ExitCode::ClientOutdated,
            Ordering::Greater => ExitCode::ServerOutdated,
            Ordering::Equal => {
                self.state.transition(ConnectionState::Accepted, MessageType::Version)?;
                self.send(&Message::Version {
                    version: PROTOCOL_VERSION,
                })?;
                return Ok(Flow::Continue);
            }
        };
        tracing::info!(connection = %self.id, version, ?code, "protocol version mismatch");
        self.exit(code);
        Ok(Flow::Close)
    }

    fn attempts_exhausted(&self) -> bool {
        self.failed_attempts >= self.context.config.max_login_attempts
    }

    fn reject_login(&self, code: LoginResponseCode) -> Result<(), ServerError> {
        self.send(&Message::LoginResponse { code, grant: None })
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), ServerError> {
        if self.attempts_exhausted() {
            return self.reject_login(LoginResponseCode::TooManyTries);
        }
        if let Err(code) = self.context.authenticator.login(username, password) {
            self.failed_attempts = self.failed_attempts.saturating_add(1);
            tracing::debug!(connection = %self.id, username, ?code, "login refused");
            return self.reject_login(code);
        }
        if let Err(code) = self.context.hub.claim(self.id, username, self.outbound.clone()) {
            return self.reject_login(code);
        }
        self.state.transition(ConnectionState::LoggedIn, MessageType::Login)?;

        let spawn = Entity::new(EntityKind::Player, Position::default());
        let deltas = self.frontend.create(spawn)?.wait()?;
        let created = deltas
            .first()
            .ok_or_else(|| CoreError::InvalidArgument("player spawn recorded no change".into()))?;
        let entity = created.entity_id();
        self.entity = Some(entity);

        self.send(&Message::LoginResponse {
            code: LoginResponseCode::Ok,
            grant: Some(LoginGrant {
                tick: TickClock::to_wire(created.tick()),
                entity,
            }),
        })?;

        let (done, joined) = completion();
        self.context
            .control
            .send(Control::Join {
                connection: self.id,
                done,
            })
            .map_err(|_| RequestError::Disconnected)?;
        joined.wait()?;
        self.state.transition(ConnectionState::Ready, MessageType::Login)?;

        tracing::info!(connection = %self.id, username, %entity, "player joined");
        Ok(())
    }

    fn register(&mut self, username: &str, password: &str) -> Result<(), ServerError> {
        let code = if self.attempts_exhausted() {
            RegisterResponseCode::TooManyTries
        } else {
            self.context.authenticator.register(username, password)
        };
        if code == RegisterResponseCode::Ok {
            tracing::info!(connection = %self.id, username, "account registered");
        } else {
            self.failed_attempts = self.failed_attempts.saturating_add(1);
        }
        self.send(&Message::RegisterResponse { code })
    }

    fn chat(&self, message: String) -> Result<(), ServerError> {
        let username = self.context.hub.username(self.id).unwrap_or_default();
        let payload: Payload = Message::ChatReceive { username, message }.encode()?.into();
        self.context.hub.broadcast(&payload);
        Ok(())
    }

    fn action(&mut self, tick: WireTick, update: EntityUpdate) -> Result<(), ServerError> {
        self.reap_actions();
        if self.entity != Some(update.entity.id) {
            tracing::warn!(connection = %self.id, target = %update.entity.id, "action on a foreign entity ignored");
            return Ok(());
        }
        // Players steer their entity; they cannot change what it is.
        let diff = EntityDiff::from_bits(update.diff.bits() & !EntityDiff::KIND.bits()).unwrap_or(EntityDiff::NONE);
        if diff.is_empty() {
            return Ok(());
        }
        let pending = self.frontend.submit(
            TargetTick::Wire(tick),
            ActionOrigin::Client,
            Operation::Update {
                entity: update.entity,
                diff,
            },
        )?;
        self.in_flight.push(pending);
        Ok(())
    }

    fn reap_actions(&mut self) {
        for err in reap(&mut self.in_flight) {
            tracing::warn!(connection = %self.id, %err, "client action rejected");
        }
    }

    fn send(&self, message: &Message) -> Result<(), ServerError> {
        let payload: Payload = message.encode()?.into();
        self.outbound
            .send(payload)
            .map_err(|_| ProtocolError::Io(io::ErrorKind::BrokenPipe.into()))?;
        Ok(())
    }

    /// Best-effort exit notice.
    fn exit(&mut self, code: ExitCode) {
        if let Err(err) = self.send(&Message::Exit { code }) {
            tracing::debug!(connection = %self.id, %err, "exit notice not sent");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn close(&mut self) {
        self.reap_actions();
        if let Some(entity) = self.entity.take() {
            if let Err(err) = self.frontend.delete(entity) {
                tracing::debug!(connection = %self.id, %entity, %err, "player entity not removed");
            }
        }
        if let Some(username) = self.context.hub.release(self.id) {
            tracing::info!(connection = %self.id, username, "player left");
        }
        self.state = ConnectionState::Disconnected;
    }
}

/// Removes resolved requests from `in_flight` and returns their errors.
fn reap<T>(in_flight: &mut Vec<Pending<T>>) -> Vec<RequestError> {
    let mut errors = Vec::new();
    for pending in std::mem::take(in_flight) {
        match pending.wait_timeout(Duration::ZERO) {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => errors.push(err),
            Err(pending) => in_flight.push(pending),
        }
    }
    errors
}

fn write_outbound<W: Write>(mut writer: W, queue: &Receiver<Payload>) -> Result<(), ProtocolError> {
    for payload in queue {
        write_frame(&mut writer, &payload)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reap_keeps_unresolved_and_reports_rejections() {
        let (accepted, first) = completion::<u32>();
        let (rejected, second) = completion::<u32>();
        let (open, third) = completion::<u32>();
        accepted.complete(Ok(1));
        rejected.complete(Err(RequestError::Rejected(CoreError::UnknownEntity(EntityId::new(9)))));

        let mut in_flight = vec![first, second, third];
        let errors = reap(&mut in_flight);
        assert_eq!(
            errors,
            vec![RequestError::Rejected(CoreError::UnknownEntity(EntityId::new(9)))]
        );
        assert_eq!(in_flight.len(), 1);
        assert!(!in_flight[0].is_done());

        open.complete(Ok(3));
        assert!(reap(&mut in_flight).is_empty());
        assert!(in_flight.is_empty());
    }
}
