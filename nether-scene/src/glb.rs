//! GLB binary container parsing.
//!
//! A GLB file is a 12-byte header followed by length-prefixed chunks. The
//! first chunk must hold the JSON document; an optional second chunk holds
//! the binary buffer referenced by `buffers[0]` without a URI.

use thiserror::Error;

/// `glTF` magic, little-endian.
pub const GLB_MAGIC: [u8; 4] = *b"glTF";
/// The only container version supported.
pub const GLB_VERSION: u32 = 2;
/// Chunk type for the JSON document ("JSON").
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
/// Chunk type for the binary buffer ("BIN\0").
pub const CHUNK_BIN: u32 = 0x004E_4942;

const HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;

/// Container-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlbError {
    #[error("GLB too short: {0} bytes (header needs 12)")]
    TooShort(usize),

    #[error("invalid GLB magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported GLB version {0} (expected 2)")]
    UnsupportedVersion(u32),

    #[error("GLB header declares {declared} bytes but file has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("{chunk} chunk header truncated")]
    TruncatedChunkHeader { chunk: &'static str },

    #[error("{chunk} chunk declares {declared} bytes but only {available} remain")]
    ChunkOverrun {
        chunk: &'static str,
        declared: usize,
        available: usize,
    },

    #[error("{chunk} chunk has type {found:#010x}, expected {expected:#010x}")]
    UnexpectedChunkType {
        chunk: &'static str,
        expected: u32,
        found: u32,
    },
}

/// Borrowed view of a validated GLB container.
#[derive(Debug, Clone, Copy)]
pub struct Glb<'a> {
    pub json: &'a [u8],
    pub bin: Option<&'a [u8]>,
}

impl<'a> Glb<'a> {
    /// Validate the header and chunk table of `data`.
    ///
    /// Every length is checked against the bytes actually present before any
    /// slice is taken, so a truncated file fails here rather than in the JSON
    /// parser.
    pub fn from_slice(data: &'a [u8]) -> Result<Self, GlbError> {
        if data.len() < HEADER_SIZE {
            return Err(GlbError::TooShort(data.len()));
        }

        let magic = [data[0], data[1], data[2], data[3]];
        if magic != GLB_MAGIC {
            return Err(GlbError::BadMagic(magic));
        }

        let version = read_u32(data, 4);
        if version != GLB_VERSION {
            return Err(GlbError::UnsupportedVersion(version));
        }

        let declared = read_u32(data, 8) as usize;
        if declared != data.len() {
            return Err(GlbError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        let (json, rest) = read_chunk(&data[HEADER_SIZE..], "JSON", CHUNK_JSON)?;

        let bin = if rest.is_empty() {
            None
        } else {
            let (bin, _trailing) = read_chunk(rest, "BIN", CHUNK_BIN)?;
            Some(bin)
        };

        Ok(Self { json, bin })
    }
}

/// Returns true when `data` starts with the GLB magic.
pub fn is_glb(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == GLB_MAGIC
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Split one chunk off the front of `data`, returning (payload, remainder).
fn read_chunk<'a>(
    data: &'a [u8],
    chunk: &'static str,
    expected: u32,
) -> Result<(&'a [u8], &'a [u8]), GlbError> {
    if data.len() < CHUNK_HEADER_SIZE {
        return Err(GlbError::TruncatedChunkHeader { chunk });
    }

    let length = read_u32(data, 0) as usize;
    let kind = read_u32(data, 4);
    let available = data.len() - CHUNK_HEADER_SIZE;

    if length > available {
        return Err(GlbError::ChunkOverrun {
            chunk,
            declared: length,
            available,
        });
    }
    if kind != expected {
        return Err(GlbError::UnexpectedChunkType {
            chunk,
            expected,
            found: kind,
        });
    }

    let body = &data[CHUNK_HEADER_SIZE..];
    Ok((&body[..length], &body[length..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(json: &[u8], bin: Option<&[u8]>) -> Vec<u8> {
        let mut chunks = Vec::new();
        chunks.extend_from_slice(&(json.len() as u32).to_le_bytes());
        chunks.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        chunks.extend_from_slice(json);
        if let Some(bin) = bin {
            chunks.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            chunks.extend_from_slice(&CHUNK_BIN.to_le_bytes());
            chunks.extend_from_slice(bin);
        }

        let mut glb = Vec::new();
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&((12 + chunks.len()) as u32).to_le_bytes());
        glb.extend_from_slice(&chunks);
        glb
    }

    #[test]
    fn test_parse_json_and_bin() {
        let data = container(b"{}  ", Some(&[1, 2, 3, 4]));
        let glb = Glb::from_slice(&data).unwrap();
        assert_eq!(glb.json, b"{}  ");
        assert_eq!(glb.bin, Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_parse_json_only() {
        let data = container(b"{}  ", None);
        let glb = Glb::from_slice(&data).unwrap();
        assert!(glb.bin.is_none());
    }

    #[test]
    fn test_too_short() {
        assert_eq!(Glb::from_slice(b"glTF").unwrap_err(), GlbError::TooShort(4));
    }

    #[test]
    fn test_bad_magic() {
        let mut data = container(b"{}  ", None);
        data[0] = b'x';
        assert!(matches!(
            Glb::from_slice(&data),
            Err(GlbError::BadMagic(_))
        ));
    }

    #[test]
    fn test_wrong_version() {
        let mut data = container(b"{}  ", None);
        data[4] = 1;
        assert_eq!(
            Glb::from_slice(&data).unwrap_err(),
            GlbError::UnsupportedVersion(1)
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut data = container(b"{}  ", None);
        data.push(0);
        assert!(matches!(
            Glb::from_slice(&data),
            Err(GlbError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_bin_chunk() {
        let mut data = container(b"{}  ", Some(&[0; 8]));
        // Declare a BIN chunk longer than what follows it
        let bin_header = 12 + 8 + 4;
        data[bin_header..bin_header + 4].copy_from_slice(&64u32.to_le_bytes());
        assert_eq!(
            Glb::from_slice(&data).unwrap_err(),
            GlbError::ChunkOverrun {
                chunk: "BIN",
                declared: 64,
                available: 8,
            }
        );
    }

    #[test]
    fn test_json_chunk_must_come_first() {
        let mut data = container(b"{}  ", None);
        data[16..20].copy_from_slice(&CHUNK_BIN.to_le_bytes());
        assert!(matches!(
            Glb::from_slice(&data),
            Err(GlbError::UnexpectedChunkType { chunk: "JSON", .. })
        ));
    }

    #[test]
    fn test_is_glb() {
        assert!(is_glb(b"glTF...."));
        assert!(!is_glb(b"{\"asset\""));
    }
}
