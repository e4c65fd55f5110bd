use std::fmt::{self, Display};

/// Amount of chunks along one side of a region.
pub const REGION_CHUNKS_SIDE: i32 = 32;

/// Position of a region, each region covers 32x32 chunks.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct RegionPosition {
    pub x: i32,
    pub z: i32,
}

impl RegionPosition {
    pub fn new(x: i32, z: i32) -> RegionPosition {
        RegionPosition { x, z }
    }

    pub fn from_chunk_position(chunk_x: i32, chunk_z: i32) -> RegionPosition {
        let x = chunk_x >> 5;
        let z = chunk_z >> 5;

        RegionPosition::new(x, z)
    }

    /// Global position of a chunk inside this region.
    pub fn chunk_position(&self, region_chunk: RegionChunkPosition) -> ChunkPosition {
        ChunkPosition::new(
            self.x * REGION_CHUNKS_SIDE + (region_chunk.x & 31) as i32,
            self.z * REGION_CHUNKS_SIDE + (region_chunk.z & 31) as i32,
        )
    }

    /// Region file name, `r.<x>.<z>.mca`.
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }
}

impl Display for RegionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.z)
    }
}

/// Position of a chunk inside its region.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct RegionChunkPosition {
    pub x: u8,
    pub z: u8,
}

impl RegionChunkPosition {
    pub fn new(x: u8, z: u8) -> RegionChunkPosition {
        debug_assert!(32 > x, "Region chunk x coordinate out of bounds");
        debug_assert!(32 > z, "Region chunk z coordinate out of bounds");

        RegionChunkPosition { x, z }
    }

    pub fn from_chunk_position(chunk_x: i32, chunk_z: i32) -> RegionChunkPosition {
        let x = (chunk_x & 31) as u8;
        let z = (chunk_z & 31) as u8;

        RegionChunkPosition::new(x, z)
    }

    pub(crate) fn from_metadata_index(index: usize) -> RegionChunkPosition {
        RegionChunkPosition::new((index % 32) as u8, (index / 32) as u8)
    }

    /// Coordinates are wrapped into the region, fields are public and may be out of range.
    pub(crate) fn metadata_index(&self) -> usize {
        (self.x & 31) as usize + (self.z & 31) as usize * 32
    }
}

impl Display for RegionChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.z)
    }
}

/// Global position of a chunk in a world.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ChunkPosition {
    pub x: i32,
    pub z: i32,
}

impl ChunkPosition {
    pub fn new(x: i32, z: i32) -> ChunkPosition {
        ChunkPosition { x, z }
    }

    pub fn region(&self) -> RegionPosition {
        RegionPosition::from_chunk_position(self.x, self.z)
    }

    pub fn region_chunk(&self) -> RegionChunkPosition {
        RegionChunkPosition::from_chunk_position(self.x, self.z)
    }
}

impl Display for ChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use crate::position::{ChunkPosition, RegionChunkPosition, RegionPosition};

    #[test]
    fn test_negative_chunk_position() {
        let chunk = ChunkPosition::new(-1, -33);

        assert_eq!(chunk.region(), RegionPosition::new(-1, -2));
        assert_eq!(chunk.region_chunk(), RegionChunkPosition::new(31, 31));
    }

    #[test]
    fn test_chunk_position_round_trip() {
        let region = RegionPosition::new(-3, 7);
        let region_chunk = RegionChunkPosition::new(5, 30);
        let chunk = region.chunk_position(region_chunk);

        assert_eq!(chunk, ChunkPosition::new(-91, 254));
        assert_eq!(chunk.region(), region);
        assert_eq!(chunk.region_chunk(), region_chunk);
    }

    #[test]
    fn test_metadata_index() {
        let position = RegionChunkPosition::new(15, 3);
        let index = position.metadata_index();

        assert_eq!(index, 111);
        assert_eq!(RegionChunkPosition::from_metadata_index(index), position);
    }

    #[test]
    fn test_out_of_range_position_wraps() {
        let position = RegionChunkPosition { x: 0, z: 40 };

        assert_eq!(position.metadata_index(), 256);
        assert_eq!(
            RegionPosition::new(0, 0).chunk_position(position),
            ChunkPosition::new(0, 8)
        );
    }

    #[test]
    fn test_file_name() {
        assert_eq!(RegionPosition::new(-1, 2).file_name(), "r.-1.2.mca");
    }
}
