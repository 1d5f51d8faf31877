use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid IPv4 address: {0:?}")]
pub(crate) struct InvalidAddress(pub(crate) String);

/// Failure local to one chunk. Never aborts the whole run.
#[derive(Error, Debug)]
pub(crate) enum ScanFault {
    #[error("failed to open file: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to seek to offset {offset}: {source}")]
    Seek {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("read failed after {consumed} bytes: {source}")]
    Read {
        consumed: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub(crate) enum CountError {
    #[error("cannot access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scan task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}
