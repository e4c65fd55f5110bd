use crate::chunk::Chunk;
use crate::codec::{self, ChunkFraming, CompressionScheme};
use crate::dirty::DirtyTracker;
use crate::error::{ChunkReadError, ChunkWriteError, RegionLoadError};
use crate::external::{self, ExternalChunkStore, EXTERNAL_CHUNK_EXTENSION};
use crate::index::region_position_from_path;
use crate::options::RegionOptions;
use crate::position::{RegionChunkPosition, RegionPosition};
use crate::sectors::{SectorMap, HEADER_SECTORS};
use crate::source::{RegionFile, SeekExt, SeekWriteExt, Truncate};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use nbt::CompoundTag;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Amount of chunks in region.
pub const REGION_CHUNKS: usize = 1024;
/// Length of chunks metadata in region.
const REGION_CHUNKS_METADATA_LENGTH: usize = 2 * REGION_CHUNKS;
/// Region header length in bytes.
pub const REGION_HEADER_BYTES_LENGTH: u64 = 8 * REGION_CHUNKS as u64;
/// Region sector length in bytes.
pub const REGION_SECTOR_BYTES_LENGTH: u32 = 4096;
/// Maximum amount of sectors a single chunk can occupy.
pub const CHUNK_MAXIMUM_SECTORS: u32 = 255;
/// Maximum chunk length in bytes, length prefix included.
pub const CHUNK_MAXIMUM_BYTES_LENGTH: u32 = REGION_SECTOR_BYTES_LENGTH * CHUNK_MAXIMUM_SECTORS;
/// Bytes of the length prefix in front of chunk data.
const CHUNK_LENGTH_BYTES: u32 = 4;
/// Largest sector index location entry can address.
const MAXIMUM_SECTOR_INDEX: u32 = 0x00FF_FFFF;
/// Timestamps before ~2001-09-09 are most likely garbage.
const MINIMUM_VALID_TIMESTAMP: u32 = 1_000_000_000;

/// Region represents a 32x32 group of chunks.
///
/// Chunks are decoded on first access and kept in memory. Changes are kept in
/// memory until `save`, which writes only changed chunks.
pub struct Region<S> {
    /// Region position in world.
    position: RegionPosition,
    /// Source in which region are stored.
    source: S,
    /// Array of chunks metadata.
    chunks_metadata: [ChunkMetadata; REGION_CHUNKS],
    /// Used sectors for chunks data.
    sectors: SectorMap,
    /// Decoded, put or deleted chunks.
    chunks: Vec<Option<Chunk>>,
    dirty: DirtyTracker,
    /// Store for chunks which don't fit into 255 sectors.
    external: Option<ExternalChunkStore>,
    /// Scheme for chunks without stored scheme.
    compression: CompressionScheme,
}

impl<S> Region<S> {
    pub fn position(&self) -> RegionPosition {
        self.position
    }

    /// Returns chunk metadata at specified position.
    pub fn metadata(&self, position: RegionChunkPosition) -> ChunkMetadata {
        self.chunks_metadata[position.metadata_index()]
    }

    pub fn external_store(&self) -> Option<&ExternalChunkStore> {
        self.external.as_ref()
    }

    /// Sets store used for chunks over 255 sectors.
    pub fn with_external_store(mut self, external: ExternalChunkStore) -> Self {
        self.external = Some(external);
        self
    }

    /// Whether chunk exists, counting unsaved changes.
    pub fn contains(&self, position: RegionChunkPosition) -> bool {
        let index = position.metadata_index();

        match &self.chunks[index] {
            Some(chunk) => !chunk.is_deleted(),
            None => !self.chunks_metadata[index].is_empty(),
        }
    }

    /// Positions of existing chunks, counting unsaved changes.
    pub fn positions(&self) -> Vec<RegionChunkPosition> {
        (0..REGION_CHUNKS)
            .map(RegionChunkPosition::from_metadata_index)
            .filter(|position| self.contains(*position))
            .collect()
    }

    /// Returns chunk tag only if it was already decoded.
    pub fn get_cached(&self, position: RegionChunkPosition) -> Option<&CompoundTag> {
        self.chunks[position.metadata_index()]
            .as_ref()
            .and_then(|chunk| chunk.tag.as_ref())
    }

    /// Replaces chunk tag. Nothing is written until `save`.
    pub fn put(&mut self, position: RegionChunkPosition, compound_tag: CompoundTag) {
        self.put_chunk(position, compound_tag, None);
    }

    /// Replaces chunk tag and sets compression scheme used to save it.
    pub fn put_with_compression(
        &mut self,
        position: RegionChunkPosition,
        compound_tag: CompoundTag,
        compression: CompressionScheme,
    ) {
        self.put_chunk(position, compound_tag, Some(compression));
    }

    fn put_chunk(
        &mut self,
        position: RegionChunkPosition,
        compound_tag: CompoundTag,
        compression: Option<CompressionScheme>,
    ) {
        let index = position.metadata_index();
        let previous = self.chunks[index].take();

        self.chunks[index] = Some(Chunk::put(previous, compound_tag, compression));
        self.dirty.mark_modified(index);
    }

    /// Removes chunk. Its sectors and external file are released on `save`.
    ///
    /// Returns whether chunk existed.
    pub fn delete(&mut self, position: RegionChunkPosition) -> bool {
        let index = position.metadata_index();
        let existed = self.contains(position);
        let previous = self.chunks[index].take();

        if self.chunks_metadata[index].is_empty() {
            // Never saved, nothing to remove from source.
            self.dirty.clear(index);
            self.dirty.refresh();
        } else {
            self.chunks[index] = Some(Chunk::deleted(previous));
            self.dirty.mark_modified(index);
        }

        existed
    }

    /// Drops decoded chunk tag from memory, unless it has unsaved changes.
    pub fn evict(&mut self, position: RegionChunkPosition) -> bool {
        let index = position.metadata_index();

        if self.dirty.is_modified(index) || self.dirty.is_suspected(index) {
            return false;
        }

        self.chunks[index].take().is_some()
    }

    /// Whether any chunk was put, deleted or handed out mutably since last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_changed()
    }

    pub fn dirty_positions(&self) -> Vec<RegionChunkPosition> {
        self.dirty
            .pending()
            .into_iter()
            .map(RegionChunkPosition::from_metadata_index)
            .collect()
    }

    /// Ranges of sectors not used by any chunk.
    pub fn free_sectors(&self) -> Vec<Range<u32>> {
        self.sectors.free_ranges()
    }

    /// Amount of sectors in source, header included.
    pub fn total_sectors(&self) -> u32 {
        self.sectors.len()
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: Read + Seek> Region<S> {
    pub fn load(position: RegionPosition, source: S) -> Result<Self, RegionLoadError> {
        Self::load_with_options(position, source, &RegionOptions::default())
    }

    pub fn load_with_options(
        position: RegionPosition,
        mut source: S,
        options: &RegionOptions,
    ) -> Result<Self, RegionLoadError> {
        let source_len = source.len()?;
        source.seek(SeekFrom::Start(0))?;

        let mut chunks_metadata = Self::read_header(&mut source, source_len)?;
        let total_sectors = sectors_for_length(source_len);

        validate_header(&mut chunks_metadata, source_len)?;

        let sectors = SectorMap::new(total_sectors as usize, &chunks_metadata);
        let chunks = (0..REGION_CHUNKS).map(|_| None).collect();

        debug!(
            target: "anvil-store",
            "Loaded region x: {}, z: {} with {} sectors",
            position.x,
            position.z,
            total_sectors
        );

        Ok(Region {
            position,
            source,
            chunks_metadata,
            sectors,
            chunks,
            dirty: DirtyTracker::new(),
            external: None,
            compression: options.compression,
        })
    }

    /// First 8KB of source are header of 1024 offsets and 1024 timestamps.
    fn read_header(
        source: &mut S,
        source_len: u64,
    ) -> Result<[ChunkMetadata; REGION_CHUNKS], RegionLoadError> {
        let mut chunks_metadata = [ChunkMetadata::default(); REGION_CHUNKS];

        if source_len == 0 {
            return Ok(chunks_metadata);
        }

        if REGION_HEADER_BYTES_LENGTH > source_len {
            return Err(RegionLoadError::TruncatedHeader { length: source_len });
        }

        let mut header = vec![0u8; REGION_HEADER_BYTES_LENGTH as usize];
        source.read_exact(&mut header)?;

        let mut cursor = Cursor::new(header);
        let mut values = [0u32; REGION_CHUNKS_METADATA_LENGTH];

        for value in values.iter_mut() {
            *value = cursor.read_u32::<BigEndian>()?;
        }

        for index in 0..REGION_CHUNKS {
            let last_modified_timestamp = values[REGION_CHUNKS + index];
            let offset = values[index];

            let start_sector_index = offset >> 8;
            let sectors = (offset & 0xFF) as u8;

            chunks_metadata[index] =
                ChunkMetadata::new(start_sector_index, sectors, last_modified_timestamp);
        }

        Ok(chunks_metadata)
    }

    /// Returns chunk tag, decoding it on first access.
    pub fn get(&mut self, position: RegionChunkPosition) -> Result<&CompoundTag, ChunkReadError> {
        let index = position.metadata_index();
        self.load_chunk(position)?;

        match self.chunks[index].as_ref().and_then(|chunk| chunk.tag.as_ref()) {
            Some(compound_tag) => Ok(compound_tag),
            None => Err(ChunkReadError::ChunkNotFound { position }),
        }
    }

    /// Returns mutable chunk tag, decoding it on first access.
    ///
    /// Chunk is rewritten on `save` only if its content actually changed.
    pub fn get_mut(
        &mut self,
        position: RegionChunkPosition,
    ) -> Result<&mut CompoundTag, ChunkReadError> {
        let index = position.metadata_index();
        self.load_chunk(position)?;

        let chunk = match self.chunks[index].as_mut() {
            Some(chunk) => chunk,
            None => return Err(ChunkReadError::ChunkNotFound { position }),
        };

        let compound_tag = match chunk.tag.as_mut() {
            Some(compound_tag) => compound_tag,
            None => return Err(ChunkReadError::ChunkNotFound { position }),
        };

        if !self.dirty.is_modified(index) && chunk.fingerprint.is_none() {
            let raw = codec::serialize(compound_tag)?;
            chunk.fingerprint = Some(codec::fingerprint(&raw));
        }

        self.dirty.mark_suspected(index);

        Ok(compound_tag)
    }

    /// Compression scheme of stored chunk data.
    pub fn compression(
        &mut self,
        position: RegionChunkPosition,
    ) -> Result<CompressionScheme, ChunkReadError> {
        let index = position.metadata_index();

        if let Some(chunk) = self.chunks[index].as_ref() {
            if chunk.is_deleted() {
                return Err(ChunkReadError::ChunkNotFound { position });
            }

            if let Some(framing) = chunk.stored {
                return Ok(framing.compression);
            }
        }

        let metadata = self.chunks_metadata[index];

        if metadata.is_empty() {
            return Err(ChunkReadError::ChunkNotFound { position });
        }

        Ok(self.read_framing(metadata)?.compression)
    }

    fn load_chunk(&mut self, position: RegionChunkPosition) -> Result<(), ChunkReadError> {
        let index = position.metadata_index();

        if self.chunks[index].is_some() {
            return Ok(());
        }

        let metadata = self.chunks_metadata[index];

        if metadata.is_empty() {
            return Err(ChunkReadError::ChunkNotFound { position });
        }

        let (framing, data) = self.read_chunk_data(position, metadata)?;
        let compound_tag = codec::decode(&data, framing.compression)?;

        self.chunks[index] = Some(Chunk::loaded(compound_tag, framing));

        Ok(())
    }

    /// Reads length prefix and compression byte of chunk data.
    ///
    /// Length must fit both chunk sectors and the source.
    fn read_framing(&mut self, metadata: ChunkMetadata) -> Result<ChunkFraming, ChunkReadError> {
        let seek_offset = metadata.start_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64;
        let sectors_length =
            metadata.sectors as u32 * REGION_SECTOR_BYTES_LENGTH - CHUNK_LENGTH_BYTES;
        let source_length = self
            .source
            .len()?
            .saturating_sub(seek_offset + CHUNK_LENGTH_BYTES as u64);
        let maximum_length = (sectors_length as u64).min(source_length) as u32;

        self.source.seek(SeekFrom::Start(seek_offset))?;
        let length = self.source.read_u32::<BigEndian>()?;

        if length == 0 || length > maximum_length {
            return Err(ChunkReadError::InvalidLength {
                length,
                maximum_length,
            });
        }

        // Minecraft sometimes reserves one extra sector, more than that is suspicious.
        let sectors_needed = sectors_for_length((length + CHUNK_LENGTH_BYTES) as u64);

        if metadata.sectors as u32 > sectors_needed + 1 {
            warn!(
                target: "anvil-store",
                "Chunk at sector {} with length {} occupies {} sectors instead of {}",
                metadata.start_sector_index,
                length,
                metadata.sectors,
                sectors_needed
            );
        }

        let compression_byte = self.source.read_u8()?;
        let (compression, external) = codec::unpack_compression(compression_byte)?;

        Ok(ChunkFraming {
            length,
            compression,
            external,
        })
    }

    fn read_chunk_data(
        &mut self,
        position: RegionChunkPosition,
        metadata: ChunkMetadata,
    ) -> Result<(ChunkFraming, Vec<u8>), ChunkReadError> {
        let framing = self.read_framing(metadata)?;

        if framing.external {
            let chunk_position = self.position.chunk_position(position);

            let data = match &self.external {
                Some(store) => store.read(chunk_position)?,
                None => {
                    let file_name = external::file_name(chunk_position, EXTERNAL_CHUNK_EXTENSION);
                    return Err(ChunkReadError::ExternalChunkMissing {
                        path: PathBuf::from(file_name),
                    });
                }
            };

            return Ok((framing, data));
        }

        // Source is positioned right after the compression byte.
        let mut compressed_buffer = vec![0u8; (framing.length - 1) as usize];
        self.source.read_exact(&mut compressed_buffer)?;

        Ok((framing, compressed_buffer))
    }
}

/// Result of saving a single pending chunk.
enum ChunkSave {
    Written,
    Removed,
    Unchanged,
}

impl<S: Read + Write + Seek> Region<S> {
    /// Writes changed chunks, leaving all other sectors untouched.
    ///
    /// Returns amount of chunks written or removed. Once started, a save
    /// should run to completion, cancelling in between leaves chunks
    /// partially saved.
    pub fn save(&mut self) -> Result<usize, ChunkWriteError> {
        if !self.dirty.is_changed() {
            return Ok(0);
        }

        let mut saved = 0;
        let result = self.save_pending(&mut saved);
        self.dirty.refresh();
        result?;

        if saved > 0 {
            self.align_source()?;
        }

        self.source.flush()?;

        debug!(
            target: "anvil-store",
            "Saved {} chunks of region x: {}, z: {}",
            saved,
            self.position.x,
            self.position.z
        );

        Ok(saved)
    }

    fn save_pending(&mut self, saved: &mut usize) -> Result<(), ChunkWriteError> {
        for index in self.dirty.pending() {
            let mut chunk = match self.chunks[index].take() {
                Some(chunk) => chunk,
                None => {
                    self.dirty.clear(index);
                    continue;
                }
            };

            let position = RegionChunkPosition::from_metadata_index(index);

            match self.save_chunk(position, &mut chunk) {
                Ok(ChunkSave::Removed) => *saved += 1,
                Ok(ChunkSave::Written) => {
                    self.chunks[index] = Some(chunk);
                    *saved += 1;
                }
                Ok(ChunkSave::Unchanged) => self.chunks[index] = Some(chunk),
                Err(error) => {
                    self.chunks[index] = Some(chunk);
                    return Err(error);
                }
            }

            self.dirty.clear(index);
        }

        Ok(())
    }

    fn save_chunk(
        &mut self,
        position: RegionChunkPosition,
        chunk: &mut Chunk,
    ) -> Result<ChunkSave, ChunkWriteError> {
        let index = position.metadata_index();
        let metadata = self.chunks_metadata[index];

        let stored = match chunk.stored {
            Some(framing) => Some(framing),
            None if !metadata.is_empty() => self.stored_framing(position, metadata),
            None => None,
        };

        let compound_tag = match chunk.tag.as_ref() {
            Some(compound_tag) => compound_tag,
            None => {
                self.remove_chunk(position, metadata, stored)?;
                return Ok(ChunkSave::Removed);
            }
        };

        let raw = codec::serialize(compound_tag)?;
        let fingerprint = codec::fingerprint(&raw);

        if !self.dirty.is_modified(index) && chunk.fingerprint == Some(fingerprint) {
            debug!(
                target: "anvil-store",
                "Region x: {}, z: {} chunk {} is unchanged",
                self.position.x,
                self.position.z,
                position
            );

            return Ok(ChunkSave::Unchanged);
        }

        let compression = match chunk.compression {
            Some(compression) => compression,
            None => stored
                .map(|framing| framing.compression)
                .unwrap_or(self.compression),
        };

        let data = codec::compress(&raw, compression)?;
        // 1 byte for compression scheme, 4 bytes for data length.
        let length = data.len() as u32 + 1;
        let external = length + CHUNK_LENGTH_BYTES > CHUNK_MAXIMUM_BYTES_LENGTH;
        let chunk_position = self.position.chunk_position(position);

        let embedded_data: &[u8] = if external {
            match &self.external {
                Some(store) => store.write(chunk_position, &data)?,
                None => {
                    return Err(ChunkWriteError::LengthExceedsMaximum {
                        length: length + CHUNK_LENGTH_BYTES,
                    })
                }
            }

            debug!(
                target: "anvil-store",
                "Region x: {}, z: {} chunk {} with length {} moved to external file",
                self.position.x,
                self.position.z,
                position,
                length
            );

            &[]
        } else {
            &data
        };

        let framing = ChunkFraming {
            length: embedded_data.len() as u32 + 1,
            compression,
            external,
        };

        let sectors_required = sectors_for_length((framing.length + CHUNK_LENGTH_BYTES) as u64);
        let mut new_metadata = self.find_place(position, metadata, sectors_required as u8)?;

        self.write_sectors(new_metadata, framing, embedded_data)?;
        new_metadata.update_last_modified_timestamp();
        self.update_metadata(position, new_metadata)?;

        // Old sectors are released only after header points to the new ones.
        if !metadata.is_empty() {
            self.release_old_sectors(metadata, new_metadata);
        }

        let was_external = stored.map(|framing| framing.external).unwrap_or(false);

        if was_external && !external {
            if let Some(store) = &self.external {
                store.delete(chunk_position)?;
            }

            debug!(
                target: "anvil-store",
                "Region x: {}, z: {} chunk {} moved back into region",
                self.position.x,
                self.position.z,
                position
            );
        }

        chunk.stored = Some(framing);
        chunk.fingerprint = Some(fingerprint);

        Ok(ChunkSave::Written)
    }

    /// Releases sectors of the previous chunk place no longer covered by the new one.
    fn release_old_sectors(&mut self, metadata: ChunkMetadata, new_metadata: ChunkMetadata) {
        if metadata.start_sector_index != new_metadata.start_sector_index {
            self.sectors
                .release(metadata.start_sector_index, metadata.sectors as u32);
        } else if metadata.sectors > new_metadata.sectors {
            let unused_sectors = (metadata.sectors - new_metadata.sectors) as u32;

            self.sectors.release(
                metadata.start_sector_index + new_metadata.sectors as u32,
                unused_sectors,
            );
        }
    }

    /// Framing of stored chunk data, unreadable framing is treated as unknown.
    fn stored_framing(
        &mut self,
        position: RegionChunkPosition,
        metadata: ChunkMetadata,
    ) -> Option<ChunkFraming> {
        match self.read_framing(metadata) {
            Ok(framing) => Some(framing),
            Err(error) => {
                warn!(
                    target: "anvil-store",
                    "Region x: {}, z: {} chunk {} has unreadable stored data: {}",
                    self.position.x,
                    self.position.z,
                    position,
                    error
                );

                None
            }
        }
    }

    fn remove_chunk(
        &mut self,
        position: RegionChunkPosition,
        metadata: ChunkMetadata,
        stored: Option<ChunkFraming>,
    ) -> Result<(), ChunkWriteError> {
        if !metadata.is_empty() {
            self.update_metadata(position, ChunkMetadata::default())?;
            self.sectors
                .release(metadata.start_sector_index, metadata.sectors as u32);
        }

        if stored.map(|framing| framing.external).unwrap_or(false) {
            if let Some(store) = &self.external {
                store.delete(self.position.chunk_position(position))?;
            }
        }

        debug!(
            target: "anvil-store",
            "Region x: {}, z: {} chunk {} removed",
            self.position.x,
            self.position.z,
            position
        );

        Ok(())
    }

    /// Finds a place where chunk data of a given amount of sectors can be put.
    ///
    /// Chunk stays in place if it still fits, otherwise first free gap is
    /// used or source is extended. Old sectors stay reserved until the chunk
    /// header is rewritten.
    fn find_place(
        &mut self,
        position: RegionChunkPosition,
        metadata: ChunkMetadata,
        sectors_required: u8,
    ) -> Result<ChunkMetadata, ChunkWriteError> {
        // Chunk still fits in the old place, unused tail is released after header update.
        if !metadata.is_empty() && metadata.sectors >= sectors_required {
            debug!(
                target: "anvil-store",
                "Region x: {}, z: {} chunk {} with {} sectors still fits in the old place",
                self.position.x,
                self.position.z,
                position,
                sectors_required
            );

            return Ok(ChunkMetadata::new(
                metadata.start_sector_index,
                sectors_required,
                0,
            ));
        }

        let total_sectors = self.sectors.len();
        let start_sector_index = self.sectors.allocate(sectors_required);

        if start_sector_index > MAXIMUM_SECTOR_INDEX {
            self.sectors
                .release(start_sector_index, sectors_required as u32);

            return Err(ChunkWriteError::RegionFull {
                sector: start_sector_index,
            });
        }

        if start_sector_index + sectors_required as u32 > total_sectors {
            debug!(
                target: "anvil-store",
                "Extending region x: {}, z: {} source to {} sectors to place chunk {}",
                self.position.x,
                self.position.z,
                self.sectors.len(),
                position
            );
        } else {
            debug!(
                target: "anvil-store",
                "Region x: {}, z: {} chunk {} with {} required sectors \
                can be placed in free sectors gap from {}",
                self.position.x,
                self.position.z,
                position,
                sectors_required,
                start_sector_index
            );
        }

        Ok(ChunkMetadata::new(start_sector_index, sectors_required, 0))
    }

    fn write_sectors(
        &mut self,
        metadata: ChunkMetadata,
        framing: ChunkFraming,
        data: &[u8],
    ) -> Result<(), io::Error> {
        // If necessary, extend the source length to the length of the header.
        if REGION_HEADER_BYTES_LENGTH > self.source.len()? {
            debug!(target: "anvil-store", "Extending source to header length");
            self.source.extend_len(REGION_HEADER_BYTES_LENGTH)?;
        }

        let seek_offset = metadata.start_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64;

        self.source.seek(SeekFrom::Start(seek_offset))?;
        self.source.write_u32::<BigEndian>(framing.length)?;
        self.source
            .write_u8(codec::pack_compression(framing.compression, framing.external))?;
        self.source.write_all(data)?;

        // Padding to align sector.
        let written_len = CHUNK_LENGTH_BYTES + framing.length;
        let padding_len = metadata.sectors as u32 * REGION_SECTOR_BYTES_LENGTH - written_len;

        if padding_len > 0 {
            self.source.write_all(&vec![0; padding_len as usize])?;
        }

        Ok(())
    }

    /// Updates chunk metadata.
    fn update_metadata(
        &mut self,
        position: RegionChunkPosition,
        metadata: ChunkMetadata,
    ) -> Result<(), io::Error> {
        let metadata_index = position.metadata_index();
        self.chunks_metadata[metadata_index] = metadata;

        let start_seek_offset = SeekFrom::Start((metadata_index * 4) as u64);
        let offset = (metadata.start_sector_index << 8) | metadata.sectors as u32;

        self.source.seek(start_seek_offset)?;
        self.source.write_u32::<BigEndian>(offset)?;

        let next_seek_offset = SeekFrom::Current(REGION_SECTOR_BYTES_LENGTH as i64 - 4);
        let last_modified_timestamp = metadata.last_modified_timestamp;

        self.source.seek(next_seek_offset)?;
        self.source
            .write_u32::<BigEndian>(last_modified_timestamp)?;

        Ok(())
    }

    /// Pads source to a whole amount of sectors.
    fn align_source(&mut self) -> Result<(), io::Error> {
        let source_len = self.source.len()?;
        let aligned_len =
            sectors_for_length(source_len) as u64 * REGION_SECTOR_BYTES_LENGTH as u64;

        if aligned_len > source_len {
            self.source.extend_len(aligned_len)?;
        }

        Ok(())
    }
}

impl<S: Read + Write + Seek + Truncate> Region<S> {
    /// Saves pending changes, then moves all chunks next to each other
    /// right after the header and shrinks the source.
    ///
    /// Rewrites the whole region, never called implicitly.
    pub fn compact(&mut self) -> Result<(), ChunkWriteError> {
        self.save()?;

        if self.source.len()? == 0 {
            return Ok(());
        }

        self.align_source()?;

        let mut occupied: Vec<usize> = (0..REGION_CHUNKS)
            .filter(|index| !self.chunks_metadata[*index].is_empty())
            .collect();
        occupied.sort_by_key(|index| self.chunks_metadata[*index].start_sector_index);

        let mut next_sector_index = HEADER_SECTORS;

        for index in occupied {
            let metadata = self.chunks_metadata[index];

            if metadata.start_sector_index != next_sector_index {
                let sectors_len = metadata.sectors as usize * REGION_SECTOR_BYTES_LENGTH as usize;
                let mut buffer = vec![0u8; sectors_len];

                self.source.seek(SeekFrom::Start(
                    metadata.start_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64,
                ))?;
                self.source.read_exact(&mut buffer)?;

                self.source.seek(SeekFrom::Start(
                    next_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64,
                ))?;
                self.source.write_all(&buffer)?;

                let moved = ChunkMetadata::new(
                    next_sector_index,
                    metadata.sectors,
                    metadata.last_modified_timestamp,
                );
                self.update_metadata(RegionChunkPosition::from_metadata_index(index), moved)?;
            }

            next_sector_index += metadata.sectors as u32;
        }

        self.source
            .truncate(next_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64)?;
        self.source.flush()?;
        self.sectors = SectorMap::new(next_sector_index as usize, &self.chunks_metadata);

        debug!(
            target: "anvil-store",
            "Compacted region x: {}, z: {} to {} sectors",
            self.position.x,
            self.position.z,
            next_sector_index
        );

        Ok(())
    }
}

impl Region<RegionFile> {
    /// Opens existing region file, position is taken from `r.<x>.<z>.mca` file name.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegionLoadError> {
        Self::open_with(path, &RegionOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: &RegionOptions,
    ) -> Result<Self, RegionLoadError> {
        let position = position_from_path(path.as_ref())?;
        let source = RegionFile::open(path)?;

        Self::from_file(position, source, options)
    }

    /// Opens region file, or binds an empty region to the path if file does not exist.
    ///
    /// File is created on first save which writes a chunk.
    pub fn open_or_empty<P: AsRef<Path>>(path: P) -> Result<Self, RegionLoadError> {
        Self::open_or_empty_with(path, &RegionOptions::default())
    }

    pub fn open_or_empty_with<P: AsRef<Path>>(
        path: P,
        options: &RegionOptions,
    ) -> Result<Self, RegionLoadError> {
        let position = position_from_path(path.as_ref())?;

        Self::open_or_empty_at(position, path, options)
    }

    /// Like `open_or_empty_with`, but with explicit position.
    pub fn open_or_empty_at<P: AsRef<Path>>(
        position: RegionPosition,
        path: P,
        options: &RegionOptions,
    ) -> Result<Self, RegionLoadError> {
        let source = RegionFile::open_or_empty(path)?;

        Self::from_file(position, source, options)
    }

    fn from_file(
        position: RegionPosition,
        source: RegionFile,
        options: &RegionOptions,
    ) -> Result<Self, RegionLoadError> {
        let folder = source
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let region = Region::load_with_options(position, source, options)?;

        if !options.allow_external {
            return Ok(region);
        }

        let store = ExternalChunkStore::new(folder).with_extension(&options.external_extension);

        Ok(region.with_external_store(store))
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }
}

fn position_from_path(path: &Path) -> Result<RegionPosition, RegionLoadError> {
    region_position_from_path(path).ok_or_else(|| RegionLoadError::InvalidFileName {
        path: path.to_path_buf(),
    })
}

/// Checks that chunks lie after the header, inside the source and don't share sectors.
fn validate_header(
    chunks_metadata: &mut [ChunkMetadata; REGION_CHUNKS],
    source_len: u64,
) -> Result<(), RegionLoadError> {
    // Partially present last sector can't hold chunk data.
    let total_sectors = (source_len / REGION_SECTOR_BYTES_LENGTH as u64) as u32;
    let mut ranges = Vec::new();

    for (index, metadata) in chunks_metadata.iter_mut().enumerate() {
        let position = RegionChunkPosition::from_metadata_index(index);

        if metadata.sectors == 0 {
            if metadata.start_sector_index != 0 {
                debug!(
                    target: "anvil-store",
                    "Chunk {} has offset {} but no sectors, treating as absent",
                    position,
                    metadata.start_sector_index
                );

                *metadata = ChunkMetadata::default();
            }

            continue;
        }

        if metadata.start_sector_index < HEADER_SECTORS {
            return Err(RegionLoadError::HeaderOverlap { position });
        }

        let end_sector = metadata.start_sector_index + metadata.sectors as u32;

        if end_sector > total_sectors {
            return Err(RegionLoadError::SectorsOutOfBounds {
                position,
                end_sector,
                total_sectors,
            });
        }

        if metadata.last_modified_timestamp < MINIMUM_VALID_TIMESTAMP {
            warn!(
                target: "anvil-store",
                "Invalid timestamp for chunk {}: {}",
                position,
                metadata.last_modified_timestamp
            );
        }

        ranges.push((metadata.start_sector_index, end_sector, position));
    }

    ranges.sort();

    for pair in ranges.windows(2) {
        let (_, first_end, first) = pair[0];
        let (second_start, _, second) = pair[1];

        if second_start < first_end {
            return Err(RegionLoadError::SectorsOverlap { first, second });
        }
    }

    Ok(())
}

/// Amount of sectors needed to hold a given amount of bytes.
fn sectors_for_length(length: u64) -> u32 {
    let sector_len = REGION_SECTOR_BYTES_LENGTH as u64;

    ((length + sector_len - 1) / sector_len) as u32
}

/// Chunk metadata are stored in header.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct ChunkMetadata {
    /// Sector index from which starts chunk data.
    pub(crate) start_sector_index: u32,
    /// Amount of sectors used to store chunk.
    pub(crate) sectors: u8,
    /// Last time in seconds when chunk was modified.
    pub(crate) last_modified_timestamp: u32,
}

impl ChunkMetadata {
    pub(crate) fn new(start_sector_index: u32, sectors: u8, last_modified_timestamp: u32) -> Self {
        ChunkMetadata {
            start_sector_index,
            sectors,
            last_modified_timestamp,
        }
    }

    pub fn start_sector_index(&self) -> u32 {
        self.start_sector_index
    }

    pub fn sectors(&self) -> u8 {
        self.sectors
    }

    pub fn last_modified_timestamp(&self) -> u32 {
        self.last_modified_timestamp
    }

    fn update_last_modified_timestamp(&mut self) {
        self.last_modified_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|time| time.as_secs() as u32)
            .unwrap_or(0);
    }

    pub fn is_empty(&self) -> bool {
        self.sectors == 0
    }
}
