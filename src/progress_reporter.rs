use std::sync::Arc;
use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const SPEED_WINDOW: usize = 50;

pub(crate) struct ProgressReporter {
    rx_progress: mpsc::Receiver<ByteCount>,
    total_size: ByteCount,
    multi_progress: MultiProgress,
}

impl ProgressReporter {
    pub(crate) fn new(
        rx_progress: mpsc::Receiver<ByteCount>,
        total_size: ByteCount,
        multi_progress: MultiProgress,
    ) -> Self {
        Self {
            rx_progress,
            total_size,
            multi_progress,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        spawn_progress_reporter(self.total_size, self.rx_progress, self.multi_progress)
    }
}

/// Renders read progress until every sender is dropped.
pub(crate) fn spawn_progress_reporter(
    total_size: ByteCount,
    mut rx_progress: mpsc::Receiver<ByteCount>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress: ByteCount = 0;
        type ProgressPoint = (ByteCount, Instant);
        let progress_q = Arc::new(RwLock::new(
            CircularBuffer::<SPEED_WINDOW, ProgressPoint>::new(),
        ));
        let pb = multi.add(ProgressBar::new(total_size));
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta}) ({msg})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                write!(w, "{:.1}s", state.eta().as_secs_f64()).ok();
            })
            .progress_chars("#>-"),
        );

        // Refresh the rolling read speed every 500ms
        let speed_task = {
            let progress_q = progress_q.clone();
            let pb = pb.clone();
            const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    let q = progress_q.read().await;
                    let back = q.back();
                    let front = q.front();
                    if let (
                        Some((latest_byte, latest_instant)),
                        Some((oldest_byte, oldest_instant)),
                    ) = (back, front)
                    {
                        if latest_byte == oldest_byte {
                            continue;
                        }
                        let speed = (latest_byte - oldest_byte) as f64
                            / latest_instant.duration_since(*oldest_instant).as_secs_f64();
                        pb.set_message(format_speed(speed));
                    }
                }
            })
        };

        while let Some(bytes) = rx_progress.recv().await {
            progress += bytes;
            pb.set_position(progress);
            let mut q = progress_q.write().await;
            q.push_back((progress, Instant::now()));
        }
        speed_task.abort();

        let elapsed = pb.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            pb.finish_with_message(format_speed(progress as f64 / elapsed));
        } else {
            pb.finish();
        }
    })
}

pub(crate) fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1024.0 * 1024.0 {
        format!("{:.1} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else {
        format!("{:.1} kB/s", bytes_per_sec / 1024.0)
    }
}
