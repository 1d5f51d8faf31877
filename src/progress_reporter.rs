use std::sync::Arc;
use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta}) ({msg})";

type ProgressPoint = (ByteCount, Instant);

/// Drives a byte progress bar from the counts scan tasks send while reading.
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

    /// Runs until every sender is dropped.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        spawn_progress_reporter(self.total_size, self.rx_progress, self.multi_progress)
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            write!(w, "{:.1}s", state.eta().as_secs_f64()).ok();
        })
        .progress_chars("#>-")
}

fn format_speed(bytes_per_sec: f64) -> String {
    let (unit, speed) = if bytes_per_sec > 1024.0 * 1024.0 {
        ("MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else {
        ("kB/s", bytes_per_sec / 1024.0)
    };
    format!("{:.1} {}", speed, unit)
}

/// Bytes per second between two samples, if both bytes and time moved.
fn throughput(oldest: ProgressPoint, latest: ProgressPoint) -> Option<f64> {
    let elapsed = latest.1.duration_since(oldest.1).as_secs_f64();
    if latest.0 <= oldest.0 || elapsed <= 0.0 {
        return None;
    }
    Some((latest.0 - oldest.0) as f64 / elapsed)
}

fn spawn_progress_reporter(
    total_size: ByteCount,
    mut rx_progress: mpsc::Receiver<ByteCount>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress: ByteCount = 0;
        let progress_q = Arc::new(RwLock::new(CircularBuffer::<50, ProgressPoint>::new()));
        let pb = multi.add(ProgressBar::new(total_size));
        pb.set_style(style());

        let ticker = {
            let progress_q = progress_q.clone();
            let pb = pb.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    let q = progress_q.read().await;
                    if let (Some((latest, latest_at)), Some((oldest, oldest_at))) =
                        (q.back(), q.front())
                    {
                        let speed = throughput((*oldest, *oldest_at), (*latest, *latest_at));
                        if let Some(speed) = speed {
                            pb.set_message(format_speed(speed));
                        }
                    }
                }
            })
        };

        while let Some(scanned) = rx_progress.recv().await {
            progress += scanned;
            pb.set_position(progress);
            progress_q.write().await.push_back((progress, Instant::now()));
        }
        ticker.abort();

        let speed = progress as f64 / pb.elapsed().as_secs_f64().max(f64::EPSILON);
        pb.finish_with_message(format_speed(speed));
        multi.remove(&pb);
    })
}
