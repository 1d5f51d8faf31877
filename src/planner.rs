use std::num::NonZeroU64;

use crate::shared_types::ByteRange;

pub(crate) const MB_TO_BYTES: u64 = 1024 * 1024;
pub(crate) const DEFAULT_CHUNK_SIZE: u64 = 128 * MB_TO_BYTES;

/// Splits `[0, file_size)` into contiguous ranges of `chunk_size` bytes.
///
/// Always yields at least one range; the last one is unbounded so that
/// whatever lies past the final full chunk is read to EOF.
pub(crate) fn plan(file_size: u64, chunk_size: NonZeroU64) -> Vec<ByteRange> {
    let chunk_size = chunk_size.get();
    let chunk_count = file_size.div_ceil(chunk_size).max(1);
    debug!("planning {chunk_count} chunk(s) of {chunk_size} bytes over {file_size} bytes");

    (0..chunk_count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i + 1 == chunk_count {
                None
            } else {
                Some(start + chunk_size)
            };
            ByteRange { start, end }
        })
        .collect()
}
