//! # Terrain Blocks
//!
//! A terrain block is the `CHUNK_SIZE x CHUNK_SIZE` grid of point types of
//! one chunk. Point coordinates fit in a byte.
//!
//! Blocks are usually dominated by one point type, so the wire form is the
//! most frequent type (the mode) plus the list of points that differ from
//! it. [`TerrainBlock::mode`], [`TerrainBlock::exceptions`] and
//! [`TerrainBlock::from_exceptions`] expose exactly that decomposition.

use crate::CHUNK_SIZE;

/// Terrain material of one point.
pub type PointType = u8;

/// Points per block.
pub const POINTS_PER_BLOCK: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Chunk coordinate (identifies a block in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkCoord {
    /// Column, in chunks.
    pub x: i32,
    /// Row, in chunks.
    pub y: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Point grid of one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerrainBlock {
    coord: ChunkCoord,
    points: Vec<PointType>,
}

impl TerrainBlock {
    /// Creates a block where every point has type `fill`.
    #[must_use]
    pub fn filled(coord: ChunkCoord, fill: PointType) -> Self {
        Self {
            coord,
            points: vec![fill; POINTS_PER_BLOCK],
        }
    }

    /// Rebuilds a block from its default type and the differing points.
    ///
    /// Later exceptions for the same point win.
    #[must_use]
    pub fn from_exceptions<I>(coord: ChunkCoord, default: PointType, exceptions: I) -> Self
    where
        I: IntoIterator<Item = (u8, u8, PointType)>,
    {
        let mut block = Self::filled(coord, default);
        for (x, y, kind) in exceptions {
            block.set(x, y, kind);
        }
        block
    }

    /// Chunk this block belongs to.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    #[inline]
    fn index(x: u8, y: u8) -> usize {
        usize::from(y) * CHUNK_SIZE + usize::from(x)
    }

    /// Returns the type of point `(x, y)`.
    #[inline]
    #[must_use]
    pub fn get(&self, x: u8, y: u8) -> PointType {
        self.points[Self::index(x, y)]
    }

    /// Sets the type of point `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: u8, y: u8, kind: PointType) {
        self.points[Self::index(x, y)] = kind;
    }

    /// Most frequent point type. Ties go to the smallest type.
    #[must_use]
    pub fn mode(&self) -> PointType {
        let mut counts = [0usize; 256];
        for point in &self.points {
            counts[usize::from(*point)] += 1;
        }
        let mut best: PointType = 0;
        for (kind, count) in (0..=PointType::MAX).zip(counts) {
            if count > counts[usize::from(best)] {
                best = kind;
            }
        }
        best
    }

    /// Points whose type differs from `default`, row by row.
    pub fn exceptions(&self, default: PointType) -> impl Iterator<Item = (u8, u8, PointType)> + '_ {
        (0..=u8::MAX)
            .flat_map(|y| (0..=u8::MAX).map(move |x| (x, y)))
            .filter_map(move |(x, y)| {
                let kind = self.get(x, y);
                (kind != default).then_some((x, y, kind))
            })
    }
}
