//! # Entity Bitfields and Terrain Compression
//!
//! ## Entity Updates
//!
//! ```text
//! ┌───────────┬──────────┬──────────────────────────────────────────────┐
//! │ id (u32)  │ bits (u8)│ present fields, in bit order                  │
//! └───────────┴──────────┴──────────────────────────────────────────────┘
//!   bit 0  position     chunk_x i32, chunk_y i32, x f32, y f32  (16 bytes)
//!   bit 1  speed angle  f32                                      (4 bytes)
//!   bit 2  speed norm   f32                                      (4 bytes)
//!   bit 3  kind         u8                                       (1 byte)
//! ```
//!
//! Unset fields consume zero bytes.
//!
//! ## Terrain Blocks
//!
//! The most frequent point type is sent once as the default; only the
//! points that differ follow as `(x, y, type)` triples:
//!
//! ```text
//! chunk_x i32 │ chunk_y i32 │ default u8 │ count u16 │ count × (x u8, y u8, type u8)
//! ```
//!
//! The mode covers at least `POINTS_PER_BLOCK / 256` points, so the count
//! always fits in a `u16`.

use tempo_core::{ChunkCoord, Entity, EntityDiff, EntityId, EntityKind, PointType, Position, TerrainBlock};

use super::packets::EntityUpdate;
use super::serialization::{PacketReader, PacketWriter};
use crate::error::{ProtocolError, ProtocolResult};

/// Wire size of the fields flagged in `diff`.
#[must_use]
pub const fn fields_len(diff: EntityDiff) -> usize {
    let mut len = 0;
    if diff.contains(EntityDiff::POSITION) {
        len += 16;
    }
    if diff.contains(EntityDiff::SPEED_ANGLE) {
        len += 4;
    }
    if diff.contains(EntityDiff::SPEED_NORM) {
        len += 4;
    }
    if diff.contains(EntityDiff::KIND) {
        len += 1;
    }
    len
}

/// Writes id, bitfield and the flagged fields.
pub fn write_entity_update(writer: &mut PacketWriter, update: &EntityUpdate) {
    let EntityUpdate { entity, diff } = update;
    writer.write_u32(entity.id.get());
    writer.write_u8(diff.bits());

    if diff.contains(EntityDiff::POSITION) {
        writer.write_i32(entity.position.chunk_x);
        writer.write_i32(entity.position.chunk_y);
        writer.write_f32(entity.position.x);
        writer.write_f32(entity.position.y);
    }
    if diff.contains(EntityDiff::SPEED_ANGLE) {
        writer.write_f32(entity.speed.angle);
    }
    if diff.contains(EntityDiff::SPEED_NORM) {
        writer.write_f32(entity.speed.norm);
    }
    if diff.contains(EntityDiff::KIND) {
        writer.write_u8(entity.kind as u8);
    }
}

fn read_finite(reader: &mut PacketReader<'_>, field: &'static str) -> ProtocolResult<f32> {
    let value = reader.read_f32()?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProtocolError::NonFinite(field))
    }
}

/// Reads an entity update. Absent fields keep their default value.
/// NaN or infinite floats are rejected.
pub fn read_entity_update(reader: &mut PacketReader<'_>) -> ProtocolResult<EntityUpdate> {
    let id = EntityId::new(reader.read_u32()?);
    let bits = reader.read_u8()?;
    let diff = EntityDiff::from_bits(bits).ok_or(ProtocolError::InvalidEnum {
        name: "entity bitfield",
        value: bits,
    })?;

    let mut entity = Entity::default().with_id(id);
    if diff.contains(EntityDiff::POSITION) {
        let chunk_x = reader.read_i32()?;
        let chunk_y = reader.read_i32()?;
        let x = read_finite(reader, "position x")?;
        let y = read_finite(reader, "position y")?;
        entity.position = Position::new(chunk_x, chunk_y, x, y);
    }
    if diff.contains(EntityDiff::SPEED_ANGLE) {
        entity.speed.angle = read_finite(reader, "speed angle")?;
    }
    if diff.contains(EntityDiff::SPEED_NORM) {
        entity.speed.norm = read_finite(reader, "speed norm")?;
    }
    if diff.contains(EntityDiff::KIND) {
        let value = reader.read_u8()?;
        entity.kind = EntityKind::from_u8(value).ok_or(ProtocolError::InvalidEnum {
            name: "entity kind",
            value,
        })?;
    }
    Ok(EntityUpdate { entity, diff })
}

/// A terrain block split into its default type and exceptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedTerrain {
    /// Chunk of the block.
    pub coord: ChunkCoord,
    /// Most frequent point type.
    pub default: PointType,
    /// Points that differ from `default`, row by row.
    pub exceptions: Vec<(u8, u8, PointType)>,
}

impl CompressedTerrain {
    /// Splits a block around its mode.
    #[must_use]
    pub fn compress(block: &TerrainBlock) -> Self {
        let default = block.mode();
        Self {
            coord: block.coord(),
            default,
            exceptions: block.exceptions(default).collect(),
        }
    }

    /// Rebuilds the full point grid.
    #[must_use]
    pub fn decompress(&self) -> TerrainBlock {
        TerrainBlock::from_exceptions(self.coord, self.default, self.exceptions.iter().copied())
    }
}

/// Writes a terrain block in its compressed form.
pub fn write_terrain(writer: &mut PacketWriter, block: &TerrainBlock) -> ProtocolResult<()> {
    let compressed = CompressedTerrain::compress(block);
    let count = u16::try_from(compressed.exceptions.len())
        .map_err(|_| ProtocolError::FrameTooLarge(compressed.exceptions.len()))?;

    writer.write_i32(compressed.coord.x);
    writer.write_i32(compressed.coord.y);
    writer.write_u8(compressed.default);
    writer.write_u16(count);
    for (x, y, kind) in compressed.exceptions {
        writer.write_u8(x);
        writer.write_u8(y);
        writer.write_u8(kind);
    }
    Ok(())
}

/// Reads a compressed terrain block and expands it.
pub fn read_terrain(reader: &mut PacketReader<'_>) -> ProtocolResult<TerrainBlock> {
    let coord = ChunkCoord::new(reader.read_i32()?, reader.read_i32()?);
    let default = reader.read_u8()?;
    let count = reader.read_u16()?;

    let mut exceptions = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        exceptions.push((reader.read_u8()?, reader.read_u8()?, reader.read_u8()?));
    }
    Ok(CompressedTerrain {
        coord,
        default,
        exceptions,
    }
    .decompress())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::Speed;

    fn encoded(update: &EntityUpdate) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        write_entity_update(&mut writer, update);
        writer.into_bytes()
    }

    #[test]
    fn test_unset_fields_cost_nothing() {
        let entity = Entity::new(EntityKind::Npc, Position::new(0, 0, 1.0, 2.0))
            .with_id(EntityId::new(3))
            .with_speed(Speed::new(0.5, 1.5));

        for bits in 0..16u8 {
            let diff = EntityDiff::from_bits(bits).unwrap();
            let bytes = encoded(&EntityUpdate { entity, diff });
            assert_eq!(bytes.len(), 5 + fields_len(diff));
            assert_eq!(bytes[4], bits);
        }
    }

    #[test]
    fn test_speed_norm_only_layout() {
        let entity = Entity::default().with_id(EntityId::new(1)).with_speed(Speed::new(9.0, 10.0));
        let bytes = encoded(&EntityUpdate {
            entity,
            diff: EntityDiff::SPEED_NORM,
        });
        let mut expected = vec![0, 0, 0, 1, 0b0100];
        expected.extend_from_slice(&10.0f32.to_be_bytes());
        assert_eq!(bytes, expected);

        let decoded = read_entity_update(&mut PacketReader::new(&bytes)).unwrap();
        assert_eq!(decoded.entity.speed, Speed::new(0.0, 10.0));
        assert_eq!(decoded.diff, EntityDiff::SPEED_NORM);
    }

    #[test]
    fn test_rejects_unknown_bits_and_kinds() {
        let bytes = [0, 0, 0, 1, 0b1_0000];
        assert!(matches!(
            read_entity_update(&mut PacketReader::new(&bytes)),
            Err(ProtocolError::InvalidEnum { .. })
        ));

        let bytes = [0, 0, 0, 1, 0b1000, 42];
        assert!(matches!(
            read_entity_update(&mut PacketReader::new(&bytes)),
            Err(ProtocolError::InvalidEnum { value: 42, .. })
        ));
    }

    #[test]
    fn test_rejects_non_finite_floats() {
        let mut bytes = vec![0, 0, 0, 1, 0b0001, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&f32::NAN.to_be_bytes());
        bytes.extend_from_slice(&1.0f32.to_be_bytes());
        assert!(matches!(
            read_entity_update(&mut PacketReader::new(&bytes)),
            Err(ProtocolError::NonFinite("position x"))
        ));

        let mut bytes = vec![0, 0, 0, 1, 0b0100];
        bytes.extend_from_slice(&f32::INFINITY.to_be_bytes());
        assert!(matches!(
            read_entity_update(&mut PacketReader::new(&bytes)),
            Err(ProtocolError::NonFinite("speed norm"))
        ));

        let mut bytes = vec![0, 0, 0, 1, 0b0010];
        bytes.extend_from_slice(&f32::NEG_INFINITY.to_be_bytes());
        assert!(matches!(
            read_entity_update(&mut PacketReader::new(&bytes)),
            Err(ProtocolError::NonFinite("speed angle"))
        ));
    }

    #[test]
    fn test_terrain_exceptions() {
        let mut block = TerrainBlock::filled(ChunkCoord::new(-1, 4), 0);
        for x in 0..10 {
            block.set(x, 3, 1);
        }
        for y in 0..7 {
            block.set(250, y, 2);
        }

        let compressed = CompressedTerrain::compress(&block);
        assert_eq!(compressed.default, 0);
        assert_eq!(compressed.exceptions.len(), 17);

        let mut writer = PacketWriter::new();
        write_terrain(&mut writer, &block).unwrap();
        assert_eq!(writer.len(), 4 + 4 + 1 + 2 + 17 * 3);
        assert_eq!(&writer.as_slice()[8..11], &[0, 0, 17]);

        let decoded = read_terrain(&mut PacketReader::new(writer.as_slice())).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_worst_case_terrain_fits() {
        let mut block = TerrainBlock::filled(ChunkCoord::default(), 0);
        for y in 0..=u8::MAX {
            for x in 0..=u8::MAX {
                block.set(x, y, x);
            }
        }
        let compressed = CompressedTerrain::compress(&block);
        assert_eq!(compressed.exceptions.len(), 65_280);

        let mut writer = PacketWriter::new();
        write_terrain(&mut writer, &block).unwrap();
        assert_eq!(read_terrain(&mut PacketReader::new(writer.as_slice())).unwrap(), block);
    }
}
