//! # Broadcast Hub
//!
//! Registry of logged-in connections and their outbound queues. The
//! simulation thread broadcasts encoded messages through it; sessions claim
//! a slot on login and release it on disconnect.
//!
//! A connection whose outbound queue is full when a broadcast arrives is
//! evicted: it stops receiving broadcasts and its session ends on its next
//! message.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;

use super::connection::ConnectionId;
use crate::protocol::LoginResponseCode;

/// An encoded message shared by every recipient.
pub type Payload = Arc<[u8]>;

#[derive(Debug)]
struct Member {
    username: String,
    outbound: Sender<Payload>,
    ready: bool,
}

/// Registry of logged-in connections.
#[derive(Debug)]
pub struct Hub {
    members: Mutex<HashMap<ConnectionId, Member>>,
    max_players: usize,
}

impl Hub {
    /// Creates an empty hub holding at most `max_players` connections.
    #[must_use]
    pub fn new(max_players: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            max_players,
        }
    }

    /// Reserves a slot for a freshly logged-in connection.
    ///
    /// The connection does not receive broadcasts until [`Hub::mark_ready`].
    pub fn claim(&self, id: ConnectionId, username: &str, outbound: Sender<Payload>) -> Result<(), LoginResponseCode> {
        let mut members = self.members.lock();
        if members.values().any(|member| member.username == username) {
            return Err(LoginResponseCode::AlreadyConnected);
        }
        if members.len() >= self.max_players {
            return Err(LoginResponseCode::PlayerLimitReached);
        }
        members.insert(
            id,
            Member {
                username: username.to_owned(),
                outbound,
                ready: false,
            },
        );
        Ok(())
    }

    /// Starts delivering broadcasts to `id`. Returns false if it is not a member.
    pub fn mark_ready(&self, id: ConnectionId) -> bool {
        match self.members.lock().get_mut(&id) {
            Some(member) => {
                member.ready = true;
                true
            }
            None => false,
        }
    }

    /// Frees the slot of `id`, returning its username.
    pub fn release(&self, id: ConnectionId) -> Option<String> {
        self.members.lock().remove(&id).map(|member| member.username)
    }

    /// Returns true while `id` holds a slot.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().contains_key(&id)
    }

    /// Username of `id`.
    #[must_use]
    pub fn username(&self, id: ConnectionId) -> Option<String> {
        self.members.lock().get(&id).map(|member| member.username.clone())
    }

    /// Queues `payload` for every ready connection. Returns the number reached.
    pub fn broadcast(&self, payload: &Payload) -> usize {
        let mut members = self.members.lock();
        let mut delivered = 0;
        members.retain(|id, member| {
            if !member.ready {
                return true;
            }
            match member.outbound.try_send(Arc::clone(payload)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = %id, username = %member.username, "outbound queue full, evicting");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        delivered
    }

    /// Queues `payload` for one connection, ready or not.
    pub fn send_to(&self, id: ConnectionId, payload: Payload) -> bool {
        let members = self.members.lock();
        members
            .get(&id)
            .is_some_and(|member| member.outbound.try_send(payload).is_ok())
    }

    /// Number of claimed slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Returns true if nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}
