/// Number of equally spaced slots the file is split into.
pub(crate) const SLOT_COUNT: u64 = 10_000;

pub(crate) const MIN_CHUNK_SIZE: usize = 1024;
pub(crate) const MAX_CHUNK_SIZE: usize = 256 * 1024;
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 10_000;

pub(crate) type ByteCount = u64;

/// A single planned read: chunk index and the absolute offset it starts at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkPosition {
    pub(crate) index: u64,
    pub(crate) offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Sequential,
    Parallel,
}

impl std::fmt::Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadMode::Sequential => write!(f, "Sequential"),
            ReadMode::Parallel => write!(f, "Parallel"),
        }
    }
}

/// What to do when the source runs out of bytes before a chunk is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ShortReadPolicy {
    /// Missing bytes count as zero towards the checksum.
    #[default]
    ZeroFill,
    Fail,
}
