//! Storage engine for Anvil region files.
//!
//! A region file keeps up to 1024 chunks of a 32x32 area in 4096 byte
//! sectors. Chunks are decoded lazily and only changed chunks are rewritten
//! on save. Chunks too large for 255 sectors are moved to `c.<x>.<z>.mcc`
//! files next to the region file.

mod chunk;
pub mod codec;
mod dirty;
pub mod error;
pub mod external;
pub mod index;
mod lz4;
pub mod options;
pub mod position;
pub mod region;
mod sectors;
pub mod source;

pub use crate::codec::CompressionScheme;
pub use crate::error::{ChunkReadError, ChunkWriteError, RegionLoadError};
pub use crate::external::ExternalChunkStore;
pub use crate::index::RegionIndex;
pub use crate::options::RegionOptions;
pub use crate::position::{ChunkPosition, RegionChunkPosition, RegionPosition};
pub use crate::region::{ChunkMetadata, Region};
pub use crate::source::RegionFile;
pub use nbt::CompoundTag;
