use std::fmt;

/// Half-open `[start, end)` interval over file bytes. `end == None` reads to EOF.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) start: u64,
    pub(crate) end: Option<u64>,
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}..EOF", self.start),
        }
    }
}

pub(crate) type ByteCount = u64;

/// Big-endian integer form of an IPv4 address.
pub(crate) type AddressKey = u32;

pub(crate) type FinalCount = u64;
