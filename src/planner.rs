use rand::Rng;

use crate::shared_types::{ChunkPosition, SLOT_COUNT};

/// Phase inside each slot, always in `[0, SLOT_COUNT)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OffsetSeed(u64);

impl OffsetSeed {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed % SLOT_COUNT)
    }

    pub(crate) fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..SLOT_COUNT))
    }

    /// Uses the explicit seed when given, otherwise draws one from `rng`.
    pub(crate) fn resolve<R: Rng + ?Sized>(explicit: Option<u64>, rng: &mut R) -> Self {
        match explicit {
            Some(seed) => Self::new(seed),
            None => Self::random(rng),
        }
    }

    pub(crate) fn value(&self) -> u64 {
        self.0
    }
}

/// Where each chunk of a run lands in the file.
///
/// Chunk `i` starts `i` strides of `SLOT_COUNT * chunk_size` bytes into the
/// file, shifted by `seed` whole chunks and wrapped around the file length.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OffsetPlan {
    file_length: u64,
    chunk_size: u64,
    seed: OffsetSeed,
}

impl OffsetPlan {
    pub(crate) fn new(file_length: u64, chunk_size: usize, seed: OffsetSeed) -> Self {
        Self {
            file_length,
            chunk_size: chunk_size as u64,
            seed,
        }
    }

    pub(crate) fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        let stride = SLOT_COUNT as u128 * self.chunk_size as u128;
        (self.file_length as u128 / stride) as u64
    }

    pub(crate) fn offset(&self, index: u64) -> u64 {
        if self.file_length == 0 {
            return 0;
        }
        let chunk_size = self.chunk_size as u128;
        let raw = SLOT_COUNT as u128 * index as u128 * chunk_size
            + chunk_size * self.seed.value() as u128;
        (raw % self.file_length as u128) as u64
    }

    pub(crate) fn position(&self, index: u64) -> ChunkPosition {
        ChunkPosition {
            index,
            offset: self.offset(index),
        }
    }

    pub(crate) fn positions(&self) -> impl Iterator<Item = ChunkPosition> + '_ {
        (0..self.chunk_count()).map(move |index| self.position(index))
    }

    pub(crate) fn seed(&self) -> OffsetSeed {
        self.seed
    }

    pub(crate) fn file_length(&self) -> u64 {
        self.file_length
    }
}
