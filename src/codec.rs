//! Spatial key/value codec.
//!
//! Pure functions mapping coordinates to the byte keys and values of the
//! world store. All integers are little-endian.
//!
//! | Record        | Key                                   | Value                  |
//! |---------------|---------------------------------------|------------------------|
//! | block         | `p, q, x, y, z` as `i32` (20 bytes)    | block type `i32` (4)   |
//! | chunk version | `p, 0, q` as `i32` (12 bytes)          | UTF-8 version string   |
//! | camera        | fixed [`CAMERA_KEY`]                  | `x, y, z, rx, ry` `f32` (20) |
//!
//! Block keys of one chunk share their first 8 bytes, so a prefix scan over
//! [`chunk_prefix`] enumerates exactly that chunk, chunk-major then
//! coordinate-major in byte order.

use crate::types::{Camera, ChunkId, Vec3};

pub const BLOCK_KEY_LEN: usize = 20;
pub const CHUNK_KEY_LEN: usize = 12;
pub const BLOCK_VALUE_LEN: usize = 4;
pub const CAMERA_VALUE_LEN: usize = 20;

/// Key of the single camera record.
pub const CAMERA_KEY: &[u8] = b"camera";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad {what} length: {len} (expected {expected})")]
    BadLength {
        what: &'static str,
        len: usize,
        expected: usize,
    },

    /// The chunk part of a block key disagrees with its coordinate.
    #[error("bad block key: chunk {stored} does not contain block {block}")]
    ChunkMismatch { stored: ChunkId, block: Vec3 },

    #[error("chunk version is not valid UTF-8")]
    BadVersion,
}

fn check_len(what: &'static str, bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() != expected {
        return Err(CodecError::BadLength {
            what,
            len: bytes.len(),
            expected,
        });
    }
    Ok(())
}

fn read_i32(bytes: &[u8], index: usize) -> i32 {
    let start = index * 4;
    i32::from_le_bytes([
        bytes[start],
        bytes[start + 1],
        bytes[start + 2],
        bytes[start + 3],
    ])
}

// ---------------------------------------------------------------------------
// Block records
// ---------------------------------------------------------------------------

/// 8-byte prefix shared by every block key of `chunk`.
pub fn chunk_prefix(chunk: ChunkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8);
    key.extend_from_slice(&chunk.p.to_le_bytes());
    key.extend_from_slice(&chunk.q.to_le_bytes());
    key
}

/// Key for `block`, prefixed by the chunk that contains it.
pub fn encode_block_key(block: Vec3) -> Vec<u8> {
    let mut key = chunk_prefix(block.chunk_id());
    key.reserve(12);
    for v in [block.x, block.y, block.z] {
        key.extend_from_slice(&v.to_le_bytes());
    }
    key
}

/// Decode a block key into its stored chunk and its coordinate.
///
/// Fails if the stored chunk is not the chunk of the coordinate.
pub fn decode_block_key(key: &[u8]) -> Result<(ChunkId, Vec3), CodecError> {
    check_len("block key", key, BLOCK_KEY_LEN)?;
    let stored = ChunkId::new(read_i32(key, 0), read_i32(key, 1));
    let block = Vec3::new(read_i32(key, 2), read_i32(key, 3), read_i32(key, 4));
    if block.chunk_id() != stored {
        return Err(CodecError::ChunkMismatch { stored, block });
    }
    Ok((stored, block))
}

/// Block types are stored as raw 32-bit values; 0 is an ordinary type.
pub fn encode_block_value(w: i32) -> [u8; BLOCK_VALUE_LEN] {
    w.to_le_bytes()
}

pub fn decode_block_value(value: &[u8]) -> Result<i32, CodecError> {
    check_len("block value", value, BLOCK_VALUE_LEN)?;
    Ok(read_i32(value, 0))
}

// ---------------------------------------------------------------------------
// Chunk versions
// ---------------------------------------------------------------------------

pub fn encode_chunk_key(chunk: ChunkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHUNK_KEY_LEN);
    let id = chunk.as_vec3();
    for v in [id.x, id.y, id.z] {
        key.extend_from_slice(&v.to_le_bytes());
    }
    key
}

pub fn decode_chunk_key(key: &[u8]) -> Result<ChunkId, CodecError> {
    check_len("chunk key", key, CHUNK_KEY_LEN)?;
    Ok(ChunkId::new(read_i32(key, 0), read_i32(key, 2)))
}

pub fn decode_version(value: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(value.to_vec()).map_err(|_| CodecError::BadVersion)
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

pub fn encode_camera(camera: &Camera) -> Vec<u8> {
    let mut value = Vec::with_capacity(CAMERA_VALUE_LEN);
    for v in [camera.x, camera.y, camera.z, camera.rx, camera.ry] {
        value.extend_from_slice(&v.to_le_bytes());
    }
    value
}

pub fn decode_camera(value: &[u8]) -> Result<Camera, CodecError> {
    check_len("camera value", value, CAMERA_VALUE_LEN)?;
    let f = |i: usize| f32::from_bits(read_i32(value, i) as u32);
    Ok(Camera {
        x: f(0),
        y: f(1),
        z: f(2),
        rx: f(3),
        ry: f(4),
    })
}
