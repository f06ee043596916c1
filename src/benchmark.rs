use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::Instant;

use crate::chunk_reader::{read_chunk, ChunkSum, ReadChunkError};
use crate::planner::{OffsetPlan, OffsetSeed};
use crate::shared_types::{
    ByteCount, ChunkPosition, ReadMode, ShortReadPolicy, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
use crate::source::ByteSource;

#[derive(Error, Debug)]
pub(crate) enum BenchError {
    #[error(
        "chunk size {chunk_size} is outside {min}..={max}",
        min = MIN_CHUNK_SIZE,
        max = MAX_CHUNK_SIZE
    )]
    InvalidChunkSize { chunk_size: usize },
    #[error("failed to query file length: {0}")]
    Metadata(std::io::Error),
    #[error("failed to open file for chunk {index}: {source}")]
    Open {
        index: u64,
        source: std::io::Error,
    },
    #[error("chunk {index} at offset {offset}: {source}")]
    Read {
        index: u64,
        offset: u64,
        source: ReadChunkError,
    },
    #[error("read worker failed: {0}")]
    Join(#[from] JoinError),
}

pub(crate) struct BenchmarkConfig<S> {
    pub(crate) source: Arc<S>,
    pub(crate) file_length: u64,
    pub(crate) chunk_size: usize,
    pub(crate) seed: OffsetSeed,
    pub(crate) mode: ReadMode,
    pub(crate) short_reads: ShortReadPolicy,
}

impl<S: ByteSource> BenchmarkConfig<S> {
    /// Queries the source length once and builds a config with default
    /// sequential mode and zero-filled short reads.
    pub(crate) fn for_source(
        source: S,
        chunk_size: usize,
        seed: OffsetSeed,
    ) -> Result<Self, BenchError> {
        let file_length = source.len().map_err(BenchError::Metadata)?;
        Ok(Self {
            source: Arc::new(source),
            file_length,
            chunk_size,
            seed,
            mode: ReadMode::Sequential,
            short_reads: ShortReadPolicy::default(),
        })
    }

    pub(crate) fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub(crate) fn with_short_reads(mut self, policy: ShortReadPolicy) -> Self {
        self.short_reads = policy;
        self
    }

    pub(crate) fn plan(&self) -> Result<OffsetPlan, BenchError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(BenchError::InvalidChunkSize {
                chunk_size: self.chunk_size,
            });
        }
        Ok(OffsetPlan::new(self.file_length, self.chunk_size, self.seed))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BenchmarkResult {
    pub(crate) checksum: u64,
    pub(crate) elapsed: Duration,
    pub(crate) chunk_size: usize,
    pub(crate) seed: OffsetSeed,
    pub(crate) mode: ReadMode,
    pub(crate) bytes_read: ByteCount,
    /// Chunks actually read, in index order.
    pub(crate) positions: Vec<ChunkPosition>,
}

impl BenchmarkResult {
    fn from_chunks(
        plan: &OffsetPlan,
        chunk_size: usize,
        mode: ReadMode,
        elapsed: Duration,
        chunks: &[ChunkSum],
    ) -> Self {
        Self {
            checksum: chunks.iter().map(|c| c.byte_sum).sum(),
            elapsed,
            chunk_size,
            seed: plan.seed(),
            mode,
            bytes_read: chunks.iter().map(|c| c.bytes_read as ByteCount).sum(),
            positions: chunks.iter().map(|c| c.position).collect(),
        }
    }

    pub(crate) fn chunk_count(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn throughput_mb_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_read as f64 / (1024.0 * 1024.0) / secs
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data chunk size: {} Checksum: {}   {} read operation took {} ms",
            self.chunk_size,
            self.checksum,
            self.mode,
            self.elapsed.as_millis()
        )
    }
}

pub(crate) async fn run_benchmark<S: ByteSource>(
    config: &BenchmarkConfig<S>,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<BenchmarkResult, BenchError> {
    match config.mode {
        ReadMode::Sequential => run_sequential(config, progress).await,
        ReadMode::Parallel => run_parallel(config, progress).await,
    }
}

/// Reads every planned chunk in index order through a single handle.
pub(crate) async fn run_sequential<S: ByteSource>(
    config: &BenchmarkConfig<S>,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<BenchmarkResult, BenchError> {
    let plan = config.plan()?;
    let source = Arc::clone(&config.source);
    let chunk_size = config.chunk_size;
    let policy = config.short_reads;
    debug!(
        "sequential read of {} chunks, seed {}",
        plan.chunk_count(),
        plan.seed().value()
    );

    if plan.chunk_count() == 0 {
        return Ok(BenchmarkResult::from_chunks(
            &plan,
            chunk_size,
            ReadMode::Sequential,
            Duration::ZERO,
            &[],
        ));
    }

    let started = Instant::now();
    let chunks = task::spawn_blocking(move || -> Result<Vec<ChunkSum>, BenchError> {
        let mut handle = source
            .open()
            .map_err(|source| BenchError::Open { index: 0, source })?;
        let mut chunks = Vec::with_capacity(plan.chunk_count() as usize);
        for position in plan.positions() {
            let chunk = read_chunk(&mut handle, position, chunk_size, policy)
                .map_err(|source| read_error(position, source))?;
            log_chunk(&plan, &chunk);
            report_progress(progress.as_ref(), &chunk);
            chunks.push(chunk);
        }
        Ok(chunks)
    })
    .await??;
    let elapsed = started.elapsed();

    Ok(BenchmarkResult::from_chunks(
        &plan,
        chunk_size,
        ReadMode::Sequential,
        elapsed,
        &chunks,
    ))
}

/// Reads every planned chunk concurrently, one task and one handle per chunk.
///
/// Each task returns its own sum; sums are placed into their slot only after
/// all tasks have been joined.
pub(crate) async fn run_parallel<S: ByteSource>(
    config: &BenchmarkConfig<S>,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<BenchmarkResult, BenchError> {
    let plan = config.plan()?;
    let chunk_size = config.chunk_size;
    let policy = config.short_reads;
    let chunk_count = plan.chunk_count() as usize;
    debug!(
        "parallel read of {} chunks, seed {}",
        chunk_count,
        plan.seed().value()
    );

    let started = Instant::now();
    let handles: Vec<JoinHandle<Result<ChunkSum, BenchError>>> = plan
        .positions()
        .map(|position| {
            spawn_chunk_reader(
                Arc::clone(&config.source),
                plan,
                position,
                chunk_size,
                policy,
                progress.clone(),
            )
        })
        .collect();
    drop(progress);

    let mut slots: Vec<Option<ChunkSum>> = vec![None; chunk_count];
    for joined in future::join_all(handles).await {
        let chunk = joined??;
        let slot = &mut slots[chunk.position.index as usize];
        debug_assert!(slot.is_none(), "chunk {} read twice", chunk.position.index);
        *slot = Some(chunk);
    }
    let elapsed = started.elapsed();

    let chunks: Vec<ChunkSum> = slots.into_iter().flatten().collect();
    Ok(BenchmarkResult::from_chunks(
        &plan,
        chunk_size,
        ReadMode::Parallel,
        elapsed,
        &chunks,
    ))
}

fn spawn_chunk_reader<S: ByteSource>(
    source: Arc<S>,
    plan: OffsetPlan,
    position: ChunkPosition,
    chunk_size: usize,
    policy: ShortReadPolicy,
    progress: Option<mpsc::Sender<ByteCount>>,
) -> JoinHandle<Result<ChunkSum, BenchError>> {
    task::spawn_blocking(move || {
        let chunk = {
            let mut handle = source.open().map_err(|source| BenchError::Open {
                index: position.index,
                source,
            })?;
            read_chunk(&mut handle, position, chunk_size, policy)
                .map_err(|source| read_error(position, source))?
        };
        log_chunk(&plan, &chunk);
        report_progress(progress.as_ref(), &chunk);
        Ok(chunk)
    })
}

fn read_error(position: ChunkPosition, source: ReadChunkError) -> BenchError {
    BenchError::Read {
        index: position.index,
        offset: position.offset,
        source,
    }
}

fn log_chunk(plan: &OffsetPlan, chunk: &ChunkSum) {
    debug!(
        "Offset value: {} Chunk Number: {} Position: {} Filelength: {}",
        plan.seed().value(),
        chunk.position.index,
        chunk.position.offset + chunk.bytes_read as u64,
        plan.file_length()
    );
}

fn report_progress(progress: Option<&mpsc::Sender<ByteCount>>, chunk: &ChunkSum) {
    if let Some(tx) = progress {
        tx.try_send(chunk.bytes_read as ByteCount).ok();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::NamedTempFile;

    use super::*;
    use crate::chunk_reader::byte_sum;
    use crate::shared_types::SLOT_COUNT;
    use crate::source::testing::{Fault, FaultySource, MemorySource};
    use crate::source::FileSource;

    const CHUNK: usize = 1024;
    const STRIDE: usize = SLOT_COUNT as usize * CHUNK;

    fn memory_config(len: usize, seed: u64) -> (MemorySource, BenchmarkConfig<MemorySource>) {
        let source = MemorySource::patterned(len);
        let config =
            BenchmarkConfig::for_source(source.clone(), CHUNK, OffsetSeed::new(seed)).unwrap();
        (source, config)
    }

    fn expected_checksum(source: &MemorySource, plan: &OffsetPlan) -> u64 {
        plan.positions()
            .map(|p| {
                let start = p.offset as usize;
                let end = (start + CHUNK).min(source.bytes().len());
                byte_sum(&source.bytes()[start..end])
            })
            .sum()
    }

    #[tokio::test]
    async fn sequential_checksum_matches_planned_bytes() {
        let (source, config) = memory_config(3 * STRIDE + 17, 4_321);
        let result = run_sequential(&config, None).await.unwrap();

        let plan = config.plan().unwrap();
        assert_eq!(result.chunk_count(), 3);
        assert_eq!(result.checksum, expected_checksum(&source, &plan));
        assert_eq!(result.bytes_read, 3 * CHUNK as u64);
        assert_eq!(result.mode, ReadMode::Sequential);
        assert_eq!(source.opened(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_and_sequential_agree() {
        let (_, config) = memory_config(5 * STRIDE + 999, 9_999);
        let sequential = run_sequential(&config, None).await.unwrap();
        let parallel = run_parallel(&config, None).await.unwrap();

        assert_eq!(parallel.checksum, sequential.checksum);
        assert_eq!(parallel.positions, sequential.positions);
        assert_eq!(parallel.mode, ReadMode::Parallel);
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let (_, config) = memory_config(2 * STRIDE, 17);
        let first = run_sequential(&config, None).await.unwrap();
        let second = run_sequential(&config, None).await.unwrap();
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.positions, second.positions);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_uses_one_handle_per_chunk_and_disjoint_slots() {
        let (source, config) = memory_config(6 * STRIDE, 250);
        let result = run_parallel(&config, None).await.unwrap();

        assert_eq!(source.opened(), 6);
        let indices: HashSet<u64> = result.positions.iter().map(|p| p.index).collect();
        assert_eq!(indices.len(), 6);
        let ordered: Vec<u64> = result.positions.iter().map(|p| p.index).collect();
        assert_eq!(ordered, (0..6).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn undersized_file_yields_empty_result() {
        for mode in [ReadMode::Sequential, ReadMode::Parallel] {
            let source = MemorySource::patterned(500_000);
            let config = BenchmarkConfig::for_source(source, CHUNK, OffsetSeed::new(5))
                .unwrap()
                .with_mode(mode);
            let result = run_benchmark(&config, None).await.unwrap();
            assert_eq!(result.checksum, 0);
            assert_eq!(result.chunk_count(), 0);
            assert_eq!(result.bytes_read, 0);
        }
    }

    #[tokio::test]
    async fn out_of_range_chunk_size_is_rejected() {
        for chunk_size in [MIN_CHUNK_SIZE - 1, MAX_CHUNK_SIZE + 1] {
            let source = MemorySource::patterned(10);
            let config =
                BenchmarkConfig::for_source(source, chunk_size, OffsetSeed::new(0)).unwrap();
            let err = run_sequential(&config, None).await.unwrap_err();
            assert!(matches!(err, BenchError::InvalidChunkSize { .. }));
        }
    }

    #[tokio::test]
    async fn truncated_source_fails_strict_runs() {
        let (_, mut config) = memory_config(STRIDE, 9_999);
        config = config.with_short_reads(ShortReadPolicy::Fail);
        // Plan against a longer file than the source really holds.
        config.file_length = 2 * STRIDE as u64;

        let err = run_sequential(&config, None).await.unwrap_err();
        assert!(matches!(
            err,
            BenchError::Read {
                index: 1,
                source: ReadChunkError::ShortRead { .. },
                ..
            }
        ));

        let err = run_parallel(&config, None).await.unwrap_err();
        assert!(matches!(
            err,
            BenchError::Read {
                source: ReadChunkError::ShortRead { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn truncated_source_zero_fills_by_default() {
        let (source, mut config) = memory_config(STRIDE, 9_999);
        config.file_length = 2 * STRIDE as u64;

        // Chunk 0 is the last CHUNK bytes of the source; chunk 1 lies past its end.
        let result = run_sequential(&config, None).await.unwrap();
        assert_eq!(result.chunk_count(), 2);
        assert_eq!(result.bytes_read, CHUNK as u64);
        assert_eq!(result.checksum, byte_sum(&source.bytes()[STRIDE - CHUNK..]));
    }

    #[tokio::test]
    async fn open_failure_names_the_chunk() {
        let source = FaultySource::new(3 * STRIDE as u64, Fault::Open);
        let config = BenchmarkConfig::for_source(source, CHUNK, OffsetSeed::new(0)).unwrap();

        let err = run_sequential(&config, None).await.unwrap_err();
        assert!(matches!(err, BenchError::Open { index: 0, .. }));

        let err = run_parallel(&config, None).await.unwrap_err();
        match err {
            BenchError::Open { index, source } => {
                assert!(index < 3);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn seek_failure_names_chunk_and_offset() {
        let source = FaultySource::new(3 * STRIDE as u64, Fault::Seek);
        let config = BenchmarkConfig::for_source(source, CHUNK, OffsetSeed::new(42)).unwrap();
        let plan = config.plan().unwrap();

        let err = run_sequential(&config, None).await.unwrap_err();
        assert!(matches!(
            err,
            BenchError::Read {
                index: 0,
                offset: 43_008,
                source: ReadChunkError::Seek(_),
            }
        ));

        let err = run_parallel(&config, None).await.unwrap_err();
        match err {
            BenchError::Read {
                index,
                offset,
                source: ReadChunkError::Seek(_),
            } => assert_eq!(offset, plan.offset(index)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn undersized_source_is_never_opened() {
        for mode in [ReadMode::Sequential, ReadMode::Parallel] {
            let source = FaultySource::new(500_000, Fault::Open);
            let config = BenchmarkConfig::for_source(source, CHUNK, OffsetSeed::new(5))
                .unwrap()
                .with_mode(mode);
            let result = run_benchmark(&config, None).await.unwrap();
            assert_eq!(result.checksum, 0);
            assert_eq!(result.chunk_count(), 0);
        }
    }

    #[tokio::test]
    async fn progress_receives_bytes_read() {
        let (_, config) = memory_config(3 * STRIDE, 1);
        let (tx, mut rx) = mpsc::channel::<ByteCount>(16);
        let result = run_sequential(&config, Some(tx)).await.unwrap();

        let mut total = 0;
        while let Some(n) = rx.recv().await {
            total += n;
        }
        assert_eq!(total, result.bytes_read);
    }

    #[tokio::test]
    async fn file_backed_runs_agree() {
        let mut tmp = NamedTempFile::new().unwrap();
        let len = 4 * STRIDE as u64;
        tmp.as_file().set_len(len).unwrap();

        let seed = OffsetSeed::new(1_234);
        let plan = OffsetPlan::new(len, CHUNK, seed);
        let mut expected = 0;
        for position in plan.positions() {
            let chunk: Vec<u8> = (0..CHUNK)
                .map(|i| ((i + position.index as usize) % 200) as u8)
                .collect();
            expected += byte_sum(&chunk);
            tmp.seek(SeekFrom::Start(position.offset)).unwrap();
            tmp.write_all(&chunk).unwrap();
        }
        tmp.flush().unwrap();

        let config =
            BenchmarkConfig::for_source(FileSource::new(tmp.path()), CHUNK, seed).unwrap();
        let sequential = run_sequential(&config, None).await.unwrap();
        let parallel = run_parallel(&config, None).await.unwrap();

        assert_eq!(sequential.checksum, expected);
        assert_eq!(parallel.checksum, expected);
        assert_eq!(sequential.chunk_count(), 4);
    }

    #[tokio::test]
    async fn missing_file_reports_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("nope"));
        let result = BenchmarkConfig::for_source(source, CHUNK, OffsetSeed::new(0));
        assert!(matches!(result, Err(BenchError::Metadata(_))));
    }

    #[test]
    fn summary_line_matches_console_format() {
        let result = BenchmarkResult {
            checksum: 42,
            elapsed: Duration::from_millis(1500),
            chunk_size: 10_000,
            seed: OffsetSeed::new(3),
            mode: ReadMode::Parallel,
            bytes_read: 0,
            positions: vec![],
        };
        assert_eq!(
            result.to_string(),
            "Data chunk size: 10000 Checksum: 42   Parallel read operation took 1500 ms"
        );
        assert_eq!(result.throughput_mb_per_sec(), 0.0);
    }
}
