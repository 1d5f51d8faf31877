use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;

use crate::address;
use crate::compact_set::CompactSet;
use crate::error::ScanFault;
use crate::shared_types::{ByteCount, ByteRange};

const READ_BUFFER_SIZE: usize = 1024 * 1024;
const PROGRESS_BATCH: ByteCount = 4 * 1024 * 1024;

/// What one chunk contributes to the run.
///
/// A fault does not void `set`: keys collected before a read error are kept,
/// and an open or seek failure simply leaves the set empty.
#[derive(Debug)]
pub(crate) struct ScanOutcome {
    pub(crate) set: CompactSet,
    pub(crate) fault: Option<ScanFault>,
}

impl ScanOutcome {
    fn degraded(fault: ScanFault) -> Self {
        Self {
            set: CompactSet::new(),
            fault: Some(fault),
        }
    }
}

/// Scans the lines owned by `range` in the file at `path` through a handle
/// private to this call.
pub(crate) async fn scan_chunk(
    path: &Path,
    range: ByteRange,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> ScanOutcome {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => return ScanOutcome::degraded(ScanFault::Open(e)),
    };

    let offset = range.start.saturating_sub(1);
    if let Err(source) = file.seek(SeekFrom::Start(offset)).await {
        return ScanOutcome::degraded(ScanFault::Seek { offset, source });
    }

    scan_lines(
        BufReader::with_capacity(READ_BUFFER_SIZE, file),
        range,
        s_progress,
    )
    .await
}

/// Core scan loop. `reader` must be positioned at `range.start - 1`
/// (or at 0 for the first chunk).
///
/// A chunk owns every line whose first byte lies in `range`, so it may read
/// past `range.end` to finish its last line and skips the tail of a line that
/// began before `range.start`.
pub(crate) async fn scan_lines<R>(
    mut reader: R,
    range: ByteRange,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> ScanOutcome
where
    R: AsyncBufRead + Unpin,
{
    let mut set = CompactSet::new();
    let mut line = Vec::with_capacity(64);
    let mut offset = range.start;
    let mut lines = 0u64;
    let mut invalid = 0u64;
    let mut unreported: ByteCount = 0;

    if range.start != 0 {
        match reader.read_until(b'\n', &mut line).await {
            Ok(n) => offset = range.start - 1 + n as u64,
            Err(source) => {
                return ScanOutcome {
                    set,
                    fault: Some(ScanFault::Read {
                        consumed: 0,
                        source,
                    }),
                }
            }
        }
    }

    let mut fault = None;
    loop {
        if matches!(range.end, Some(end) if offset >= end) {
            break;
        }

        line.clear();
        let n = match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(source) => {
                fault = Some(ScanFault::Read {
                    consumed: offset - range.start,
                    source,
                });
                break;
            }
        };
        offset += n as u64;
        lines += 1;

        let text = line.strip_suffix(b"\n").unwrap_or(&line[..]);
        match address::encode(text) {
            Ok(key) => {
                set.insert(key);
            }
            Err(_) => invalid += 1,
        }

        unreported += n as ByteCount;
        if unreported >= PROGRESS_BATCH {
            report(&s_progress, &mut unreported).await;
        }
    }
    report(&s_progress, &mut unreported).await;

    debug!(
        "chunk {}: {} lines, {} invalid, {} unique, {} heap bytes",
        range,
        lines,
        invalid,
        set.len(),
        set.heap_bytes()
    );

    ScanOutcome { set, fault }
}

async fn report(s_progress: &Option<mpsc::Sender<ByteCount>>, unreported: &mut ByteCount) {
    if let Some(tx) = s_progress {
        if *unreported > 0 {
            tx.send(*unreported).await.ok();
        }
    }
    *unreported = 0;
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tempfile::NamedTempFile;
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    use super::*;
    use crate::planner;

    async fn scan_slice(data: &[u8], range: ByteRange) -> ScanOutcome {
        let from = range.start.saturating_sub(1) as usize;
        scan_lines(&data[from..], range, None).await
    }

    fn keys(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .set
            .iter()
            .map(|k| std::net::Ipv4Addr::from(k).to_string())
            .collect()
    }

    fn range(start: u64, end: Option<u64>) -> ByteRange {
        ByteRange { start, end }
    }

    const DATA: &[u8] = b"1.1.1.1\n2.2.2.2\n3.3.3.3\n";

    #[tokio::test]
    async fn whole_file_as_one_chunk() {
        let outcome = scan_slice(DATA, range(0, None)).await;
        assert!(outcome.fault.is_none());
        assert_eq!(keys(&outcome), vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    }

    #[tokio::test]
    async fn split_inside_a_line_gives_it_to_the_earlier_chunk() {
        // Offset 10 falls inside "2.2.2.2\n" (bytes 8..16).
        let first = scan_slice(DATA, range(0, Some(10))).await;
        let second = scan_slice(DATA, range(10, None)).await;
        assert_eq!(keys(&first), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(keys(&second), vec!["3.3.3.3"]);
    }

    #[tokio::test]
    async fn split_at_line_start_gives_it_to_the_later_chunk() {
        // Offset 8 is the first byte of "2.2.2.2".
        let first = scan_slice(DATA, range(0, Some(8))).await;
        let second = scan_slice(DATA, range(8, None)).await;
        assert_eq!(keys(&first), vec!["1.1.1.1"]);
        assert_eq!(keys(&second), vec!["2.2.2.2", "3.3.3.3"]);
    }

    #[tokio::test]
    async fn split_on_a_newline_byte_loses_nothing() {
        // Offset 7 is the newline ending "1.1.1.1".
        let first = scan_slice(DATA, range(0, Some(7))).await;
        let second = scan_slice(DATA, range(7, None)).await;
        assert_eq!(keys(&first), vec!["1.1.1.1"]);
        assert_eq!(keys(&second), vec!["2.2.2.2", "3.3.3.3"]);
    }

    #[tokio::test]
    async fn every_split_point_partitions_the_lines() {
        for split in 0..=DATA.len() as u64 {
            let first = scan_slice(DATA, range(0, Some(split))).await;
            let second = scan_slice(DATA, range(split, None)).await;
            assert_eq!(first.set.len() + second.set.len(), 3, "split at {split}");
            assert_eq!(first.set.clone().union(second.set).len(), 3);
        }
    }

    #[tokio::test]
    async fn chunk_with_no_line_start_is_empty() {
        let data = b"100.100.100.100\n";
        let outcome = scan_slice(data, range(3, Some(6))).await;
        assert!(outcome.set.is_empty());
        assert!(outcome.fault.is_none());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let data = b"10.0.0.1\nnot-an-ip\n\n10.0.0.2\n 10.0.0.3\n";
        let outcome = scan_slice(data, range(0, None)).await;
        assert!(outcome.fault.is_none());
        assert_eq!(keys(&outcome), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn unterminated_last_line_is_counted() {
        let outcome = scan_slice(b"10.0.0.1\n10.0.0.2", range(0, None)).await;
        assert_eq!(keys(&outcome), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn progress_reports_consumed_bytes() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = scan_lines(DATA, range(0, None), Some(tx)).await;
        assert_eq!(outcome.set.len(), 3);
        let mut total = 0;
        while let Some(n) = rx.recv().await {
            total += n;
        }
        assert_eq!(total, DATA.len() as u64);
    }

    #[tokio::test]
    async fn scans_real_file_chunks() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..200u32 {
            writeln!(file, "192.168.{}.{}", i / 10, i % 10).unwrap();
        }
        file.flush().unwrap();
        let size = file.as_file().metadata().unwrap().len();

        let chunk_size = std::num::NonZeroU64::new(97).unwrap();
        let mut merged = CompactSet::new();
        let mut total = 0;
        for r in planner::plan(size, chunk_size) {
            let outcome = scan_chunk(file.path(), r, None).await;
            assert!(outcome.fault.is_none());
            total += outcome.set.len();
            merged = merged.union(outcome.set);
        }
        assert_eq!(total, 200);
        assert_eq!(merged.len(), 200);
    }

    #[tokio::test]
    async fn missing_file_degrades_to_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = scan_chunk(&dir.path().join("absent.txt"), range(0, None), None).await;
        assert!(outcome.set.is_empty());
        assert!(matches!(outcome.fault, Some(ScanFault::Open(_))));
    }

    struct FailingRead;

    impl AsyncRead for FailingRead {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "device gone")))
        }
    }

    #[tokio::test]
    async fn read_fault_keeps_keys_read_before_it() {
        let reader = BufReader::new((&b"1.1.1.1\n2.2.2.2\n"[..]).chain(FailingRead));
        let outcome = scan_lines(reader, range(0, None), None).await;
        assert_eq!(keys(&outcome), vec!["1.1.1.1", "2.2.2.2"]);
        assert!(matches!(
            outcome.fault,
            Some(ScanFault::Read { consumed: 16, .. })
        ));
    }

    #[tokio::test]
    async fn read_fault_while_aligning_yields_empty_set() {
        let reader = BufReader::new(FailingRead);
        let outcome = scan_lines(reader, range(10, None), None).await;
        assert!(outcome.set.is_empty());
        assert!(matches!(
            outcome.fault,
            Some(ScanFault::Read { consumed: 0, .. })
        ));
    }
}
