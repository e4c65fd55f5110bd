//! Chunk payload encoding: NBT serialization plus per-chunk compression.

use crate::error::{ChunkReadError, ChunkWriteError};
use crate::lz4;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use nbt::decode::read_compound_tag;
use nbt::encode::write_compound_tag;
use nbt::CompoundTag;
use std::io::{self, Cursor, Read, Write};
use xxhash_rust::xxh64::xxh64;

/// Bit of the compression byte marking chunk data stored in an external file.
pub const EXTERNAL_FLAG: u8 = 0x80;

/// Compression scheme used for chunk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompressionScheme {
    /// Gzip (RFC1952), unused in practice.
    Gzip = 1,
    /// Zlib (RFC1950). In practice, you will mostly encounter chunks compressed using zlib.
    Zlib = 2,
    /// No compression.
    Uncompressed = 3,
    /// LZ4 blocks in lz4-java stream framing.
    Lz4 = 4,
}

impl CompressionScheme {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(CompressionScheme::Gzip),
            2 => Some(CompressionScheme::Zlib),
            3 => Some(CompressionScheme::Uncompressed),
            4 => Some(CompressionScheme::Lz4),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl Default for CompressionScheme {
    fn default() -> Self {
        CompressionScheme::Zlib
    }
}

/// Length prefix and compression byte which start chunk data in region sectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChunkFraming {
    /// Length of compression byte plus compressed bytes.
    pub length: u32,
    pub compression: CompressionScheme,
    /// Compressed bytes are stored in an external file.
    pub external: bool,
}

/// Splits compression byte into scheme and external flag.
pub fn unpack_compression(compression_byte: u8) -> Result<(CompressionScheme, bool), ChunkReadError> {
    let external = compression_byte & EXTERNAL_FLAG != 0;
    let id = compression_byte & !EXTERNAL_FLAG;

    match CompressionScheme::from_id(id) {
        Some(compression) => Ok((compression, external)),
        None => Err(ChunkReadError::UnsupportedCompressionScheme {
            compression_scheme: compression_byte,
        }),
    }
}

pub fn pack_compression(compression: CompressionScheme, external: bool) -> u8 {
    if external {
        compression.id() | EXTERNAL_FLAG
    } else {
        compression.id()
    }
}

/// Decompresses chunk data, returning raw NBT bytes.
pub fn decompress(data: &[u8], compression: CompressionScheme) -> Result<Vec<u8>, ChunkReadError> {
    let mut buffer = Vec::new();

    let result = match compression {
        CompressionScheme::Gzip => GzDecoder::new(data).read_to_end(&mut buffer),
        CompressionScheme::Zlib => ZlibDecoder::new(data).read_to_end(&mut buffer),
        CompressionScheme::Uncompressed => return Ok(data.to_vec()),
        CompressionScheme::Lz4 => {
            return lz4::decompress(data)
                .map_err(|io_error| ChunkReadError::DecompressError { io_error })
        }
    };

    match result {
        Ok(_) => Ok(buffer),
        Err(io_error) => Err(ChunkReadError::DecompressError { io_error }),
    }
}

/// Compresses raw NBT bytes.
pub fn compress(raw: &[u8], compression: CompressionScheme) -> Result<Vec<u8>, ChunkWriteError> {
    match compression {
        CompressionScheme::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(raw)?;
            Ok(encoder.finish()?)
        }
        CompressionScheme::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(raw)?;
            Ok(encoder.finish()?)
        }
        CompressionScheme::Uncompressed => Ok(raw.to_vec()),
        CompressionScheme::Lz4 => Ok(lz4::compress(raw)?),
    }
}

/// Parses raw NBT bytes.
pub fn parse(raw: &[u8]) -> Result<CompoundTag, ChunkReadError> {
    let mut cursor = Cursor::new(raw);

    Ok(read_compound_tag(&mut cursor)?)
}

/// Writes tag as uncompressed NBT bytes.
pub fn serialize(compound_tag: &CompoundTag) -> Result<Vec<u8>, io::Error> {
    let mut buffer = Vec::new();
    write_compound_tag(&mut buffer, compound_tag.clone())?;

    Ok(buffer)
}

/// Content checksum of raw NBT bytes.
pub fn fingerprint(raw: &[u8]) -> u64 {
    xxh64(raw, 0)
}

/// Decodes compressed chunk data into a tag.
pub fn decode(data: &[u8], compression: CompressionScheme) -> Result<CompoundTag, ChunkReadError> {
    let raw = decompress(data, compression)?;

    parse(&raw)
}

/// Encodes a tag into compressed chunk data. Same tag and scheme always give same bytes.
pub fn encode(
    compound_tag: &CompoundTag,
    compression: CompressionScheme,
) -> Result<Vec<u8>, ChunkWriteError> {
    let raw = serialize(compound_tag)?;

    compress(&raw, compression)
}
