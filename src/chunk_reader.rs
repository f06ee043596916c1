use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

use bytes::BytesMut;
use thiserror::Error;

use crate::shared_types::{ChunkPosition, ShortReadPolicy};

#[derive(Error, Debug)]
pub(crate) enum ReadChunkError {
    #[error("seek failed: {0}")]
    Seek(io::Error),
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("short read: got {actual} of {expected} bytes")]
    ShortRead { expected: usize, actual: usize },
}

/// Sum of one chunk's byte values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkSum {
    pub(crate) position: ChunkPosition,
    pub(crate) byte_sum: u64,
    pub(crate) bytes_read: usize,
}

/// Reads `chunk_size` bytes at `position.offset` and sums them.
///
/// The handle is always repositioned first; whatever it pointed at before is
/// irrelevant. Bytes past the end of the source count as zero unless `policy`
/// is [`ShortReadPolicy::Fail`].
pub(crate) fn read_chunk<H: Read + Seek>(
    handle: &mut H,
    position: ChunkPosition,
    chunk_size: usize,
    policy: ShortReadPolicy,
) -> Result<ChunkSum, ReadChunkError> {
    handle
        .seek(SeekFrom::Start(position.offset))
        .map_err(ReadChunkError::Seek)?;

    let mut buffer = BytesMut::zeroed(chunk_size);
    let bytes_read = fill(handle, &mut buffer).map_err(ReadChunkError::Read)?;
    if bytes_read < chunk_size && policy == ShortReadPolicy::Fail {
        return Err(ReadChunkError::ShortRead {
            expected: chunk_size,
            actual: bytes_read,
        });
    }

    Ok(ChunkSum {
        position,
        byte_sum: byte_sum(&buffer[..bytes_read]),
        bytes_read,
    })
}

fn fill<H: Read>(handle: &mut H, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match handle.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn byte_sum(bytes: &[u8]) -> u64 {
    bytes.iter().map(|&b| b as u64).sum()
}
