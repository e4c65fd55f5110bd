//! LZ4 block stream in the framing of lz4-java `LZ4BlockOutputStream`.
//!
//! Every block starts with a 21 byte header: `LZ4Block` magic, token with
//! compression method and level, little-endian compressed length,
//! decompressed length and checksum of decompressed bytes. Stream ends with
//! an empty block.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};
use xxhash_rust::xxh32::xxh32;

const MAGIC: &[u8; 8] = b"LZ4Block";
const BLOCK_HEADER_LENGTH: usize = 21;
const COMPRESSION_METHOD_RAW: u8 = 0x10;
const COMPRESSION_METHOD_LZ4: u8 = 0x20;
const COMPRESSION_METHOD_MASK: u8 = 0xF0;
/// log2(block size) - 10, stored in low token bits.
const COMPRESSION_LEVEL: u8 = 6;
const BLOCK_SIZE: usize = 1 << 16;
const CHECKSUM_SEED: u32 = 0x9747_B28C;

/// xxHash32 with lz4-java seed, lz4-java keeps only lower 28 bits.
pub(crate) fn checksum(data: &[u8]) -> u32 {
    xxh32(data, CHECKSUM_SEED) & 0x0FFF_FFFF
}

pub(crate) fn compress(raw: &[u8]) -> Result<Vec<u8>, io::Error> {
    let mut output = Vec::with_capacity(raw.len() / 2 + 2 * BLOCK_HEADER_LENGTH);

    for block in raw.chunks(BLOCK_SIZE) {
        let compressed = lz4_flex::block::compress(block);

        // Incompressible blocks are stored as is.
        let (method, payload) = if compressed.len() >= block.len() {
            (COMPRESSION_METHOD_RAW, block)
        } else {
            (COMPRESSION_METHOD_LZ4, compressed.as_slice())
        };

        write_block_header(&mut output, method, payload.len(), block.len(), checksum(block))?;
        output.extend_from_slice(payload);
    }

    write_block_header(&mut output, COMPRESSION_METHOD_RAW, 0, 0, 0)?;

    Ok(output)
}

fn write_block_header(
    output: &mut Vec<u8>,
    method: u8,
    compressed_len: usize,
    decompressed_len: usize,
    checksum: u32,
) -> Result<(), io::Error> {
    output.extend_from_slice(MAGIC);
    output.write_u8(method | COMPRESSION_LEVEL)?;
    output.write_u32::<LittleEndian>(compressed_len as u32)?;
    output.write_u32::<LittleEndian>(decompressed_len as u32)?;
    output.write_u32::<LittleEndian>(checksum)?;

    Ok(())
}

pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>, io::Error> {
    let mut reader = Cursor::new(data);
    let mut output = Vec::new();

    while (reader.position() as usize) < data.len() {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;

        if &magic != MAGIC {
            return Err(invalid_data("Missing LZ4Block magic header".to_owned()));
        }

        let token = reader.read_u8()?;
        let compressed_len = reader.read_u32::<LittleEndian>()? as usize;
        let decompressed_len = reader.read_u32::<LittleEndian>()? as usize;
        let expected_checksum = reader.read_u32::<LittleEndian>()?;

        // End of stream.
        if decompressed_len == 0 {
            break;
        }

        let start = reader.position() as usize;
        let end = start + compressed_len;

        if end > data.len() {
            return Err(invalid_data(format!(
                "Truncated LZ4 block of {} bytes",
                compressed_len
            )));
        }

        let payload = &data[start..end];
        reader.set_position(end as u64);

        let block = match token & COMPRESSION_METHOD_MASK {
            COMPRESSION_METHOD_RAW if compressed_len == decompressed_len => payload.to_vec(),
            COMPRESSION_METHOD_LZ4 => lz4_flex::block::decompress(payload, decompressed_len)
                .map_err(|e| invalid_data(e.to_string()))?,
            _ => {
                return Err(invalid_data(format!(
                    "Unsupported LZ4 block token {:#x}",
                    token
                )))
            }
        };

        if block.len() != decompressed_len {
            return Err(invalid_data(format!(
                "LZ4 block decompressed to {} bytes instead of {}",
                block.len(),
                decompressed_len
            )));
        }

        let actual_checksum = checksum(&block);

        if actual_checksum != expected_checksum {
            return Err(invalid_data(format!(
                "Checksum mismatch: expected {:#x}, got {:#x}",
                expected_checksum, actual_checksum
            )));
        }

        output.extend_from_slice(&block);
    }

    Ok(output)
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
