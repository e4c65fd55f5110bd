use crate::position::RegionChunkPosition;
use nbt::decode::TagDecodeError;
use std::path::PathBuf;
use std::{error::Error, fmt::Display, io};

/// Possible errors while loading the region header.
#[derive(Debug)]
pub enum RegionLoadError {
    /// Region source is not empty but shorter than the 8KB header.
    ///
    /// Region file are corrupted.
    TruncatedHeader {
        /// Source length in bytes.
        length: u64,
    },
    /// Chunk sectors start inside the header sectors.
    ///
    /// Region file are corrupted.
    HeaderOverlap { position: RegionChunkPosition },
    /// Two chunks claim the same sector.
    ///
    /// Region file are corrupted.
    SectorsOverlap {
        first: RegionChunkPosition,
        second: RegionChunkPosition,
    },
    /// Chunk sectors lie past the end of the source.
    ///
    /// Region file are corrupted or truncated.
    SectorsOutOfBounds {
        position: RegionChunkPosition,
        /// Sector index following the last chunk sector.
        end_sector: u32,
        /// Amount of sectors in source.
        total_sectors: u32,
    },
    /// Region file name does not follow `r.<x>.<z>.mca` pattern.
    InvalidFileName { path: PathBuf },
    /// I/O Error which happened while were reading region header.
    IOError { io_error: io::Error },
}

impl RegionLoadError {
    /// Whether error describes structural damage of the region file.
    pub fn is_corruption(&self) -> bool {
        use RegionLoadError::*;
        match self {
            TruncatedHeader { .. }
            | HeaderOverlap { .. }
            | SectorsOverlap { .. }
            | SectorsOutOfBounds { .. } => true,
            InvalidFileName { .. } | IOError { .. } => false,
        }
    }
}

impl From<io::Error> for RegionLoadError {
    fn from(io_error: io::Error) -> Self {
        RegionLoadError::IOError { io_error }
    }
}

impl Error for RegionLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegionLoadError::IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for RegionLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use RegionLoadError::*;
        match self {
            TruncatedHeader { length } => {
                write!(f, "Region header truncated at {} bytes", length)
            }
            HeaderOverlap { position } => {
                write!(f, "Chunk {} sectors overlap region header", position)
            }
            SectorsOverlap { first, second } => {
                write!(f, "Chunks {} and {} share sectors", first, second)
            }
            SectorsOutOfBounds {
                position,
                end_sector,
                total_sectors,
            } => write!(
                f,
                "Chunk {} sectors end at {} but region has {} sectors",
                position, end_sector, total_sectors
            ),
            InvalidFileName { path } => {
                write!(f, "Not a region file name: {}", path.display())
            }
            IOError { .. } => write!(f, "IO Error"),
        }
    }
}

/// Possible errors while loading the chunk.
#[derive(Debug)]
pub enum ChunkReadError {
    /// Chunk at specified coordinates inside region not found.
    ChunkNotFound { position: RegionChunkPosition },
    /// Chunk length is zero or overlaps declared sectors.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted.
    InvalidLength {
        /// Chunk length.
        length: u32,
        /// Chunk maximum expected length.
        maximum_length: u32,
    },
    /// Compression scheme id is unknown.
    ///
    /// Region file are corrupted or was introduced new compression type.
    UnsupportedCompressionScheme {
        /// Compression scheme type id.
        compression_scheme: u8,
    },
    /// Chunk data could not be decompressed.
    DecompressError { io_error: io::Error },
    /// Error while decoding binary data to NBT tag.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted or a developer error in the NBT library.
    TagDecodeError { tag_decode_error: TagDecodeError },
    /// Region header marks chunk as external, but the external file is absent.
    ///
    /// Region folder are corrupted.
    ExternalChunkMissing { path: PathBuf },
    /// I/O Error which happened while were reading chunk data from region file.
    IOError { io_error: io::Error },
}

impl From<io::Error> for ChunkReadError {
    fn from(io_error: io::Error) -> Self {
        ChunkReadError::IOError { io_error }
    }
}

impl From<TagDecodeError> for ChunkReadError {
    fn from(tag_decode_error: TagDecodeError) -> Self {
        ChunkReadError::TagDecodeError { tag_decode_error }
    }
}

impl Error for ChunkReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use ChunkReadError::*;
        match self {
            IOError { io_error } | DecompressError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for ChunkReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChunkReadError::*;
        match self {
            ChunkNotFound { position } => write!(f, "Chunk {} not found", position),
            InvalidLength {
                length,
                maximum_length,
            } => write!(
                f,
                "Chunk length of {} is invalid (maximum {})",
                length, maximum_length
            ),
            UnsupportedCompressionScheme { compression_scheme } => {
                write!(f, "Unsupported compression scheme: {}", compression_scheme)
            }
            DecompressError { .. } => write!(f, "Failed to decompress chunk data"),
            TagDecodeError { tag_decode_error } => {
                write!(f, "Failed to decode nbt: {:?}", tag_decode_error)
            }
            ExternalChunkMissing { path } => {
                write!(f, "External chunk file {} is missing", path.display())
            }
            IOError { .. } => write!(f, "IO Error"),
        }
    }
}

/// Possible errors while saving the chunk.
#[derive(Debug)]
pub enum ChunkWriteError {
    /// Chunk length exceeds 255 sectors and region has no external chunk store.
    LengthExceedsMaximum {
        /// Chunk length.
        length: u32,
    },
    /// Sector offset does not fit into 3 bytes of location entry.
    RegionFull {
        /// Sector index at which chunk should have been placed.
        sector: u32,
    },
    /// I/O Error which happened while were writing chunk data to region.
    IOError { io_error: io::Error },
}

impl From<io::Error> for ChunkWriteError {
    fn from(io_error: io::Error) -> Self {
        ChunkWriteError::IOError { io_error }
    }
}

impl Error for ChunkWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChunkWriteError::IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for ChunkWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChunkWriteError::*;
        match self {
            LengthExceedsMaximum { length } => write!(
                f,
                "Chunk length of {} exceeds maximum (255 sectors) and no external store is set",
                length
            ),
            RegionFull { sector } => {
                write!(f, "Sector {} is out of addressable region range", sector)
            }
            IOError { .. } => write!(f, "IO Error"),
        }
    }
}
