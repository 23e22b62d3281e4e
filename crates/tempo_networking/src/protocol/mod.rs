//! # Wire Protocol
//!
//! Binary, big-endian messages exchanged between clients and the server.
//!
//! ## Message Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Frame length (u32 BE, transport only)                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Type tag (u8) │ Payload (fixed-width fields, short strings)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Connected ─► Accepted ─► LoggedIn ─► Ready
//!     │            │           │         │
//!     └────────────┴───────────┴─────────┴──► Disconnected
//! ```
//!
//! The version handshake moves a connection to `Accepted`; a mismatch ends
//! it with [`ExitCode::ClientOutdated`] or [`ExitCode::ServerOutdated`].

mod compression;
mod packets;
mod serialization;

pub use compression::{
    fields_len, read_entity_update, read_terrain, write_entity_update, write_terrain, CompressedTerrain,
};
pub use packets::{
    EntityUpdate, ExitCode, LoginGrant, LoginResponseCode, Message, MessageType, RegisterResponseCode,
    PROTOCOL_VERSION,
};
pub use serialization::{
    read_frame, read_message, write_frame, write_message, PacketReader, PacketWriter, MAX_FRAME_SIZE,
    MAX_STRING_LEN,
};
