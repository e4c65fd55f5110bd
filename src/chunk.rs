use crate::codec::{ChunkFraming, CompressionScheme};
use nbt::CompoundTag;

/// In-memory state of a chunk which was read, put or deleted.
pub(crate) struct Chunk {
    /// Decoded tag, `None` when chunk is deleted and waits for save.
    pub(crate) tag: Option<CompoundTag>,
    /// Scheme requested for the next write.
    pub(crate) compression: Option<CompressionScheme>,
    /// Framing of the data currently stored in region, if known.
    pub(crate) stored: Option<ChunkFraming>,
    /// Fingerprint of the tag as last read or written.
    pub(crate) fingerprint: Option<u64>,
}

impl Chunk {
    pub(crate) fn loaded(tag: CompoundTag, stored: ChunkFraming) -> Self {
        Chunk {
            tag: Some(tag),
            compression: None,
            stored: Some(stored),
            fingerprint: None,
        }
    }

    pub(crate) fn put(
        previous: Option<Chunk>,
        tag: CompoundTag,
        compression: Option<CompressionScheme>,
    ) -> Self {
        let (previous_compression, stored) = match previous {
            Some(chunk) => (chunk.compression, chunk.stored),
            None => (None, None),
        };

        Chunk {
            tag: Some(tag),
            compression: compression.or(previous_compression),
            stored,
            fingerprint: None,
        }
    }

    pub(crate) fn deleted(previous: Option<Chunk>) -> Self {
        Chunk {
            tag: None,
            compression: None,
            stored: previous.and_then(|chunk| chunk.stored),
            fingerprint: None,
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.tag.is_none()
    }
}
