use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::MultiProgress;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::compact_set::CompactSet;
use crate::error::{CountError, ScanFault};
use crate::planner;
use crate::progress_reporter::ProgressReporter;
use crate::scanner::{self, ScanOutcome};
use crate::shared_types::{ByteCount, ByteRange, FinalCount};

/// Handoff from one scan task to the aggregator.
#[derive(Debug)]
struct ChunkReport {
    index: usize,
    range: ByteRange,
    outcome: ScanOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CountSummary {
    pub(crate) unique: FinalCount,
    pub(crate) chunks: usize,
    /// Chunks that could not be fully read. Non-zero means `unique` may be
    /// an under-count.
    pub(crate) degraded_chunks: usize,
}

pub(crate) struct CountPreferences {
    pub(crate) path: PathBuf,
    pub(crate) chunk_size: NonZeroU64,
}

pub(crate) async fn count_unique(
    specs: CountPreferences,
) -> Result<CountSummary, CountError> {
    count_unique_with_progress(specs, None).await
}

/// Plans the file, scans every range on its own task and unions the
/// partial sets once all tasks are done.
pub(crate) async fn count_unique_with_progress(
    specs: CountPreferences,
    multi: Option<MultiProgress>,
) -> Result<CountSummary, CountError> {
    let file_size = tokio::fs::metadata(&specs.path)
        .await
        .map_err(|source| CountError::FileAccess {
            path: specs.path.clone(),
            source,
        })?
        .len();
    debug!("{} is {file_size} bytes", specs.path.display());

    let ranges = planner::plan(file_size, specs.chunk_size);
    let chunk_count = ranges.len();

    let (s_reports, r_reports) = mpsc::channel::<ChunkReport>(chunk_count);
    let (s_progress, progress_handle) = match multi {
        Some(multi) => {
            let (tx, rx) = mpsc::channel::<ByteCount>(chunk_count * 4);
            let handle = ProgressReporter::new(rx, file_size, multi).spawn();
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let path: Arc<Path> = Arc::from(specs.path.as_path());
    let handles: Vec<JoinHandle<()>> = ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            spawn_scan_worker(
                index,
                range,
                path.clone(),
                s_reports.clone(),
                s_progress.clone(),
            )
        })
        .collect();
    drop(s_reports);
    drop(s_progress);

    for result in futures::future::join_all(handles).await {
        result?;
    }

    let (merged, degraded_chunks) = merge_reports(r_reports).await;

    if let Some(handle) = progress_handle {
        handle.await?;
    }

    let summary = CountSummary {
        unique: merged.len(),
        chunks: chunk_count,
        degraded_chunks,
    };
    info!(
        "{} unique addresses across {} chunk(s), {} degraded",
        summary.unique, summary.chunks, summary.degraded_chunks
    );
    Ok(summary)
}

/// Unions every partial set until all senders are gone. Returns the merged
/// set and the number of chunks that reported a fault.
async fn merge_reports(mut r_reports: mpsc::Receiver<ChunkReport>) -> (CompactSet, usize) {
    let mut merged = CompactSet::new();
    let mut degraded_chunks = 0;
    while let Some(report) = r_reports.recv().await {
        if let Some(fault) = &report.outcome.fault {
            degraded_chunks += 1;
            log_fault(report.index, report.range, fault);
        }
        if !report.outcome.set.is_empty() {
            merged = merged.union(report.outcome.set);
        }
    }
    (merged, degraded_chunks)
}

fn spawn_scan_worker(
    index: usize,
    range: ByteRange,
    path: Arc<Path>,
    s_reports: mpsc::Sender<ChunkReport>,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = scanner::scan_chunk(&path, range, s_progress).await;
        s_reports
            .send(ChunkReport {
                index,
                range,
                outcome,
            })
            .await
            .ok();
    })
}

fn log_fault(index: usize, range: ByteRange, fault: &ScanFault) {
    match fault {
        ScanFault::Read { .. } => warn!(
            "chunk {index} ({range}) truncated, keys read so far are kept: {fault}"
        ),
        ScanFault::Open(_) | ScanFault::Seek { .. } => warn!(
            "chunk {index} ({range}) skipped, contributes nothing: {fault}"
        ),
    }
}
