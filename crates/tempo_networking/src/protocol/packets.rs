//! # Message Definitions
//!
//! Every message starts with a one-byte [`MessageType`] tag. Response and
//! exit codes are closed enumerations; decoding any other byte is a
//! protocol error.

use tempo_core::{Entity, EntityDiff, EntityId, TerrainBlock, WireTick};

/// Version spoken by this build. Exchanged once when a connection opens.
pub const PROTOCOL_VERSION: u16 = 1;

/// Type tag of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Bidirectional: protocol version handshake.
    Version = 0,
    /// Bidirectional: liveness probe.
    Ping = 1,
    /// Bidirectional: answer to a ping.
    Pong = 2,
    /// Client -> Server: log in.
    Login = 3,
    /// Server -> Client: result of a login.
    LoginResponse = 4,
    /// Client -> Server: create an account.
    Register = 5,
    /// Server -> Client: result of a registration.
    RegisterResponse = 6,
    /// Server -> Client: an entity appeared.
    EntityCreate = 7,
    /// Server -> Client: batch of entity changes.
    EntitiesUpdate = 8,
    /// Server -> Client: an entity disappeared.
    EntityDestroy = 9,
    /// Server -> Client: a terrain block.
    TerrainUpdate = 10,
    /// Client -> Server: chat line.
    ChatSend = 11,
    /// Server -> Client: relayed chat line.
    ChatReceive = 12,
    /// Client -> Server: change to the player's own entity.
    Action = 13,
    /// Bidirectional: connection is closing.
    Exit = 14,
}

impl MessageType {
    /// Decodes a type tag.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Version,
            1 => Self::Ping,
            2 => Self::Pong,
            3 => Self::Login,
            4 => Self::LoginResponse,
            5 => Self::Register,
            6 => Self::RegisterResponse,
            7 => Self::EntityCreate,
            8 => Self::EntitiesUpdate,
            9 => Self::EntityDestroy,
            10 => Self::TerrainUpdate,
            11 => Self::ChatSend,
            12 => Self::ChatReceive,
            13 => Self::Action,
            14 => Self::Exit,
            _ => return None,
        })
    }
}

/// Result of a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginResponseCode {
    /// Logged in.
    Ok = 0,
    /// No account with this name.
    UnknownUser = 1,
    /// Password does not match.
    WrongPassword = 2,
    /// This connection failed too often.
    TooManyTries = 3,
    /// The account is already playing.
    AlreadyConnected = 4,
    /// The server is full.
    PlayerLimitReached = 5,
}

impl LoginResponseCode {
    /// Decodes a response code.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::UnknownUser,
            2 => Self::WrongPassword,
            3 => Self::TooManyTries,
            4 => Self::AlreadyConnected,
            5 => Self::PlayerLimitReached,
            _ => return None,
        })
    }
}

/// Result of a registration attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterResponseCode {
    /// Account created.
    Ok = 0,
    /// Name already taken.
    UsedName = 1,
    /// Name breaks the naming rules.
    InvalidName = 2,
    /// Password breaks the password rules.
    InvalidPassword = 3,
    /// This connection failed too often.
    TooManyTries = 4,
    /// The server does not accept new accounts.
    RegistrationDisabled = 5,
}

impl RegisterResponseCode {
    /// Decodes a response code.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::UsedName,
            2 => Self::InvalidName,
            3 => Self::InvalidPassword,
            4 => Self::TooManyTries,
            5 => Self::RegistrationDisabled,
            _ => return None,
        })
    }
}

/// Why a connection is closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// The client left.
    ClientQuit = 0,
    /// The server is shutting down.
    ServerShutdown = 1,
    /// The client speaks an older protocol.
    ClientOutdated = 2,
    /// The server speaks an older protocol.
    ServerOutdated = 3,
    /// The peer sent something invalid.
    ProtocolViolation = 4,
}

impl ExitCode {
    /// Decodes an exit code.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::ClientQuit,
            1 => Self::ServerShutdown,
            2 => Self::ClientOutdated,
            3 => Self::ServerOutdated,
            4 => Self::ProtocolViolation,
            _ => return None,
        })
    }
}

/// Entity fields travelling on the wire: the id, a bitfield and the
/// flagged fields. Unflagged fields of `entity` are meaningless.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityUpdate {
    /// Entity id plus the flagged field values.
    pub entity: Entity,
    /// Fields present on the wire.
    pub diff: EntityDiff,
}

impl EntityUpdate {
    /// Every field of `entity`.
    #[must_use]
    pub const fn full(entity: Entity) -> Self {
        Self {
            entity,
            diff: EntityDiff::ALL,
        }
    }
}

/// Session data granted by a successful login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginGrant {
    /// Server tick at login.
    pub tick: WireTick,
    /// The player's entity.
    pub entity: EntityId,
}

/// A decoded message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Protocol version handshake.
    Version {
        /// Version spoken by the sender.
        version: u16,
    },
    /// Liveness probe.
    Ping,
    /// Answer to a ping.
    Pong,
    /// Log in.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// Result of a login.
    LoginResponse {
        /// Outcome.
        code: LoginResponseCode,
        /// Present exactly when `code` is `Ok`.
        grant: Option<LoginGrant>,
    },
    /// Create an account.
    Register {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// Result of a registration.
    RegisterResponse {
        /// Outcome.
        code: RegisterResponseCode,
    },
    /// An entity appeared.
    EntityCreate {
        /// Tick of creation.
        tick: WireTick,
        /// Entity fields.
        update: EntityUpdate,
    },
    /// Batch of entity changes.
    EntitiesUpdate {
        /// Tick of the batch.
        tick: WireTick,
        /// Changes, one per entity.
        updates: Vec<EntityUpdate>,
    },
    /// An entity disappeared.
    EntityDestroy {
        /// Tick of removal.
        tick: WireTick,
        /// Removed entity.
        entity: EntityId,
    },
    /// A terrain block, compressed around its most frequent point type.
    TerrainUpdate(TerrainBlock),
    /// Chat line from a client.
    ChatSend {
        /// Text.
        message: String,
    },
    /// Chat line relayed to clients.
    ChatReceive {
        /// Author.
        username: String,
        /// Text.
        message: String,
    },
    /// Change to the sender's own entity at a past tick.
    Action {
        /// Tick the change happened at, as seen by the client.
        tick: WireTick,
        /// Changed fields.
        update: EntityUpdate,
    },
    /// Connection is closing.
    Exit {
        /// Reason.
        code: ExitCode,
    },
}

impl Message {
    /// Returns the type tag of this message.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Version { .. } => MessageType::Version,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::Login { .. } => MessageType::Login,
            Self::LoginResponse { .. } => MessageType::LoginResponse,
            Self::Register { .. } => MessageType::Register,
            Self::RegisterResponse { .. } => MessageType::RegisterResponse,
            Self::EntityCreate { .. } => MessageType::EntityCreate,
            Self::EntitiesUpdate { .. } => MessageType::EntitiesUpdate,
            Self::EntityDestroy { .. } => MessageType::EntityDestroy,
            Self::TerrainUpdate(_) => MessageType::TerrainUpdate,
            Self::ChatSend { .. } => MessageType::ChatSend,
            Self::ChatReceive { .. } => MessageType::ChatReceive,
            Self::Action { .. } => MessageType::Action,
            Self::Exit { .. } => MessageType::Exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_round_trip() {
        for tag in 0..=14u8 {
            let kind = MessageType::from_u8(tag).unwrap();
            assert_eq!(kind as u8, tag);
        }
        assert_eq!(MessageType::from_u8(15), None);
    }

    #[test]
    fn test_codes_are_closed() {
        assert_eq!(LoginResponseCode::from_u8(5), Some(LoginResponseCode::PlayerLimitReached));
        assert_eq!(LoginResponseCode::from_u8(6), None);
        assert_eq!(RegisterResponseCode::from_u8(5), Some(RegisterResponseCode::RegistrationDisabled));
        assert_eq!(RegisterResponseCode::from_u8(6), None);
        assert_eq!(ExitCode::from_u8(3), Some(ExitCode::ServerOutdated));
        assert_eq!(ExitCode::from_u8(5), None);
    }

    #[test]
    fn test_message_type() {
        assert_eq!(Message::Ping.message_type(), MessageType::Ping);
        let exit = Message::Exit {
            code: ExitCode::ClientQuit,
        };
        assert_eq!(exit.message_type(), MessageType::Exit);
    }
}
