//! On-disk frame layout.
//!
//! ```text
//! +----------+-------------+-----------------+-------------+-----
//! | NMSTORE1 | len: u32 LE | bincode payload | len: u32 LE | ...
//! +----------+-------------+-----------------+-------------+-----
//! ```
//!
//! A payload is a bincode-encoded [`StoredRecord`]. A frame is either fully
//! present or treated as absent: a short trailing frame left by a crash is
//! reported as torn and ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::warn;

use super::{io_error, Attributes, StoredRecord, VectorStoreError};
use crate::identity::EmbeddingKey;

pub const MAGIC: [u8; 8] = *b"NMSTORE1";
/// Upper bound on a single payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
const LEN_PREFIX: u64 = 4;

/// Where a record's payload lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameLocation {
    pub offset: u64,
    pub len: u32,
}

/// Borrowed view with the same encoding as [`StoredRecord`].
#[derive(Serialize)]
pub(crate) struct RecordRef<'a> {
    pub key: &'a EmbeddingKey,
    pub vector: &'a [f32],
    pub attributes: &'a Attributes,
}

/// Leading field of a payload, decoded without touching the rest.
#[derive(Deserialize)]
struct FrameKey {
    key: EmbeddingKey,
}

pub(crate) struct Scan {
    /// Last frame per key
    pub index: BTreeMap<EmbeddingKey, FrameLocation>,
    pub frames: usize,
    /// End of the last complete frame.
    pub end: u64,
    pub torn: bool,
}

pub(crate) fn encode_frame(record: &RecordRef<'_>) -> Result<Vec<u8>, VectorStoreError> {
    let payload = bincode::serialize(record).map_err(VectorStoreError::Encode)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or(VectorStoreError::FrameTooLarge(payload.len()))?;

    let mut frame = Vec::with_capacity(LEN_PREFIX as usize + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Walks every frame from the start of the file and indexes them by key.
pub(crate) fn scan<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<Scan, VectorStoreError> {
    reader.seek(SeekFrom::Start(0)).map_err(io_error(path))?;

    let mut magic = [0u8; MAGIC.len()];
    let read = read_full(reader, &mut magic).map_err(io_error(path))?;
    if read != MAGIC.len() || magic != MAGIC {
        return Err(VectorStoreError::NotAStore(path.to_path_buf()));
    }

    let mut index = BTreeMap::new();
    let mut frames = 0;
    let mut offset = MAGIC.len() as u64;
    let mut torn = false;
    let mut payload = Vec::new();
    loop {
        let mut len_buf = [0u8; LEN_PREFIX as usize];
        match read_full(reader, &mut len_buf).map_err(io_error(path))? {
            0 => break,
            n if n == len_buf.len() => {}
            _ => {
                torn = true;
                break;
            }
        }
        let len = u32::from_le_bytes(len_buf);
        if len as usize > MAX_FRAME_LEN {
            return Err(VectorStoreError::Corrupt {
                offset,
                reason: format!("frame length {len} exceeds maximum"),
            });
        }

        payload.resize(len as usize, 0);
        if read_full(reader, &mut payload).map_err(io_error(path))? != payload.len() {
            torn = true;
            break;
        }
        let FrameKey { key } =
            bincode::deserialize(&payload).map_err(|e| VectorStoreError::Corrupt {
                offset,
                reason: e.to_string(),
            })?;

        index.insert(
            key,
            FrameLocation {
                offset: offset + LEN_PREFIX,
                len,
            },
        );
        frames += 1;
        offset += LEN_PREFIX + u64::from(len);
    }

    if torn {
        warn!(path = %path.display(), offset, "ignoring torn trailing record");
    }
    Ok(Scan {
        index,
        frames,
        end: offset,
        torn,
    })
}

pub(crate) fn read_record<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    location: FrameLocation,
) -> Result<StoredRecord, VectorStoreError> {
    reader
        .seek(SeekFrom::Start(location.offset))
        .map_err(io_error(path))?;
    let mut payload = vec![0u8; location.len as usize];
    reader.read_exact(&mut payload).map_err(io_error(path))?;
    bincode::deserialize(&payload).map_err(|e| VectorStoreError::Corrupt {
        offset: location.offset - LEN_PREFIX,
        reason: e.to_string(),
    })
}

/// Reads until `buf` is full or EOF, returning the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
