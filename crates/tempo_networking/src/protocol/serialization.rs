//! # Message Serialization
//!
//! Big-endian writer/reader pair plus stream framing.
//!
//! ## Encoding Rules
//!
//! - integers: fixed width, big-endian
//! - floats: IEEE-754 bits, big-endian
//! - strings: one length byte, then at most 255 raw UTF-8 bytes
//!
//! ## Framing
//!
//! ```text
//! ┌────────────────┬──────────┬──────────────────────┐
//! │ length (u32 BE)│ tag (u8) │ payload (length - 1) │
//! └────────────────┴──────────┴──────────────────────┘
//! ```

use std::io::{self, Read, Write};

use tempo_core::{EntityId, WireTick};

use super::compression::{read_entity_update, read_terrain, write_entity_update, write_terrain};
use super::packets::{
    ExitCode, LoginGrant, LoginResponseCode, Message, MessageType, RegisterResponseCode,
};
use crate::error::{ProtocolError, ProtocolResult};

/// Largest accepted frame, in bytes.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Longest string a one-byte length prefix can describe.
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Appends big-endian values to a growable buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates an empty writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes one byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a `u16`.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a `u32`.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes an `i32`.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes an `f32`.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Writes a length-prefixed string.
    pub fn write_str(&mut self, value: &str) -> ProtocolResult<()> {
        let len = u8::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong(value.len()))?;
        self.write_u8(len);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

/// Reads big-endian values from a byte slice.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let bytes = self.take_slice(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    fn take_slice(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Reads one byte.
    #[inline]
    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    /// Reads a `u16`.
    #[inline]
    pub fn read_u16(&mut self) -> ProtocolResult<u16> {
        self.take().map(u16::from_be_bytes)
    }

    /// Reads a `u32`.
    #[inline]
    pub fn read_u32(&mut self) -> ProtocolResult<u32> {
        self.take().map(u32::from_be_bytes)
    }

    /// Reads an `i32`.
    #[inline]
    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        self.take().map(i32::from_be_bytes)
    }

    /// Reads an `f32`.
    #[inline]
    pub fn read_f32(&mut self) -> ProtocolResult<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads a length-prefixed string.
    pub fn read_string(&mut self) -> ProtocolResult<String> {
        let len = usize::from(self.read_u8()?);
        let bytes = self.take_slice(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Fails if unread bytes remain.
    pub fn finish(&self) -> ProtocolResult<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }
}

fn invalid(name: &'static str, value: u8) -> ProtocolError {
    ProtocolError::InvalidEnum { name, value }
}

impl Message {
    /// Encodes the message, type tag first.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut writer = PacketWriter::with_capacity(32);
        writer.write_u8(self.message_type() as u8);

        match self {
            Self::Version { version } => writer.write_u16(*version),
            Self::Ping | Self::Pong => {}
            Self::Login { username, password } | Self::Register { username, password } => {
                writer.write_str(username)?;
                writer.write_str(password)?;
            }
            Self::LoginResponse { code, grant } => {
                writer.write_u8(*code as u8);
                if let Some(grant) = grant {
                    writer.write_u16(grant.tick);
                    writer.write_u32(grant.entity.get());
                }
            }
            Self::RegisterResponse { code } => writer.write_u8(*code as u8),
            Self::EntityCreate { tick, update } | Self::Action { tick, update } => {
                writer.write_u16(*tick);
                write_entity_update(&mut writer, update);
            }
            Self::EntitiesUpdate { tick, updates } => {
                let count = u16::try_from(updates.len()).map_err(|_| ProtocolError::FrameTooLarge(updates.len()))?;
                writer.write_u16(*tick);
                writer.write_u16(count);
                for update in updates {
                    write_entity_update(&mut writer, update);
                }
            }
            Self::EntityDestroy { tick, entity } => {
                writer.write_u16(*tick);
                writer.write_u32(entity.get());
            }
            Self::TerrainUpdate(block) => write_terrain(&mut writer, block)?,
            Self::ChatSend { message } => writer.write_str(message)?,
            Self::ChatReceive { username, message } => {
                writer.write_str(username)?;
                writer.write_str(message)?;
            }
            Self::Exit { code } => writer.write_u8(*code as u8),
        }

        Ok(writer.into_bytes())
    }

    /// Decodes exactly one message from `bytes`.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut reader = PacketReader::new(bytes);
        let tag = reader.read_u8()?;
        let kind = MessageType::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

        let message = match kind {
            MessageType::Version => Self::Version {
                version: reader.read_u16()?,
            },
            MessageType::Ping => Self::Ping,
            MessageType::Pong => Self::Pong,
            MessageType::Login => Self::Login {
                username: reader.read_string()?,
                password: reader.read_string()?,
            },
            MessageType::LoginResponse => {
                let value = reader.read_u8()?;
                let code = LoginResponseCode::from_u8(value).ok_or_else(|| invalid("login response code", value))?;
                let grant = if code == LoginResponseCode::Ok {
                    Some(LoginGrant {
                        tick: reader.read_u16()?,
                        entity: EntityId::new(reader.read_u32()?),
                    })
                } else {
                    None
                };
                Self::LoginResponse { code, grant }
            }
            MessageType::Register => Self::Register {
                username: reader.read_string()?,
                password: reader.read_string()?,
            },
            MessageType::RegisterResponse => {
                let value = reader.read_u8()?;
                Self::RegisterResponse {
                    code: RegisterResponseCode::from_u8(value)
                        .ok_or_else(|| invalid("register response code", value))?,
                }
            }
            MessageType::EntityCreate => Self::EntityCreate {
                tick: reader.read_u16()?,
                update: read_entity_update(&mut reader)?,
            },
            MessageType::EntitiesUpdate => {
                let tick: WireTick = reader.read_u16()?;
                let count = reader.read_u16()?;
                let updates = (0..count)
                    .map(|_| read_entity_update(&mut reader))
                    .collect::<ProtocolResult<Vec<_>>>()?;
                Self::EntitiesUpdate { tick, updates }
            }
            MessageType::EntityDestroy => Self::EntityDestroy {
                tick: reader.read_u16()?,
                entity: EntityId::new(reader.read_u32()?),
            },
            MessageType::TerrainUpdate => Self::TerrainUpdate(read_terrain(&mut reader)?),
            MessageType::ChatSend => Self::ChatSend {
                message: reader.read_string()?,
            },
            MessageType::ChatReceive => Self::ChatReceive {
                username: reader.read_string()?,
                message: reader.read_string()?,
            },
            MessageType::Action => Self::Action {
                tick: reader.read_u16()?,
                update: read_entity_update(&mut reader)?,
            },
            MessageType::Exit => {
                let value = reader.read_u8()?;
                Self::Exit {
                    code: ExitCode::from_u8(value).ok_or_else(|| invalid("exit code", value))?,
                }
            }
        };

        reader.finish()?;
        Ok(message)
    }
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// Returns `None` if the stream ends cleanly before a new frame starts.
pub fn read_frame<R: Read>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Encodes and frames a message.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> ProtocolResult<()> {
    write_frame(writer, &message.encode()?)
}

/// Reads and decodes one framed message. `None` on clean end of stream.
pub fn read_message<R: Read>(reader: &mut R) -> ProtocolResult<Option<Message>> {
    read_frame(reader)?.map(|frame| Message::decode(&frame)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EntityUpdate;
    use tempo_core::{Entity, EntityDiff, EntityKind, Position, Speed};

    #[test]
    fn test_big_endian_layout() {
        let mut writer = PacketWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x0304_0506);
        writer.write_i32(-2);
        assert_eq!(writer.as_slice(), &[1, 2, 3, 4, 5, 6, 0xFF, 0xFF, 0xFF, 0xFE]);

        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(reader.read_i32().unwrap(), -2);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_strings() {
        let mut writer = PacketWriter::new();
        writer.write_str("hé").unwrap();
        assert_eq!(writer.as_slice(), &[3, b'h', 0xC3, 0xA9]);
        assert_eq!(PacketReader::new(writer.as_slice()).read_string().unwrap(), "hé");

        let long = "x".repeat(256);
        assert!(matches!(writer.write_str(&long), Err(ProtocolError::StringTooLong(256))));
        assert!(writer.write_str(&long[..255]).is_ok());

        let bad = [2u8, 0xFF, 0xFE];
        assert!(matches!(PacketReader::new(&bad).read_string(), Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_login_layout() {
        let login = Message::Login {
            username: "ann".into(),
            password: "pw".into(),
        };
        let bytes = login.encode().unwrap();
        assert_eq!(bytes, vec![3, 3, b'a', b'n', b'n', 2, b'p', b'w']);
        assert_eq!(Message::decode(&bytes).unwrap(), login);
    }

    #[test]
    fn test_login_response_grant_only_on_success() {
        let refused = Message::LoginResponse {
            code: LoginResponseCode::WrongPassword,
            grant: None,
        };
        assert_eq!(refused.encode().unwrap(), vec![4, 2]);

        let granted = Message::LoginResponse {
            code: LoginResponseCode::Ok,
            grant: Some(LoginGrant {
                tick: 0xABCD,
                entity: EntityId::new(7),
            }),
        };
        let bytes = granted.encode().unwrap();
        assert_eq!(bytes, vec![4, 0, 0xAB, 0xCD, 0, 0, 0, 7]);
        assert_eq!(Message::decode(&bytes).unwrap(), granted);
    }

    #[test]
    fn test_entities_update() {
        let entity = Entity::new(EntityKind::Npc, Position::new(1, -1, 3.5, 4.0))
            .with_id(EntityId::new(9))
            .with_speed(Speed::new(0.25, 2.0));
        let message = Message::EntitiesUpdate {
            tick: 12,
            updates: vec![
                EntityUpdate::full(entity),
                EntityUpdate {
                    entity: Entity::default().with_id(EntityId::new(10)).with_speed(Speed::new(0.0, 5.0)),
                    diff: EntityDiff::SPEED_NORM,
                },
            ],
        };
        let bytes = message.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(Message::decode(&[]), Err(ProtocolError::Truncated { .. })));
        assert!(matches!(Message::decode(&[200]), Err(ProtocolError::UnknownMessageType(200))));
        assert!(matches!(
            Message::decode(&[14, 9]),
            Err(ProtocolError::InvalidEnum { value: 9, .. })
        ));
        assert!(matches!(Message::decode(&[0, 1]), Err(ProtocolError::Truncated { .. })));
        assert!(matches!(Message::decode(&[1, 0]), Err(ProtocolError::TrailingBytes(1))));
    }

    #[test]
    fn test_frames() {
        let mut stream = Vec::new();
        write_message(&mut stream, &Message::Ping).unwrap();
        write_message(&mut stream, &Message::Version { version: 1 }).unwrap();
        assert_eq!(&stream[..5], &[0, 0, 0, 1, 1]);

        let mut cursor = std::io::Cursor::new(stream);
        assert_eq!(read_message(&mut cursor).unwrap(), Some(Message::Ping));
        assert_eq!(read_message(&mut cursor).unwrap(), Some(Message::Version { version: 1 }));
        assert_eq!(read_message(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_frame_limits() {
        let mut cursor = std::io::Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(read_frame(&mut cursor), Err(ProtocolError::FrameTooLarge(_))));

        let mut cut = std::io::Cursor::new(vec![0, 0]);
        assert!(matches!(read_frame(&mut cut), Err(ProtocolError::Io(_))));
    }
}
