//! Sparse, mergeable set of 32-bit keys.
//!
//! Keys are split into a 16-bit high part, which selects a container, and a
//! 16-bit low part stored inside it. Containers are kept in one vector sorted
//! by their high part. A container starts as a sorted array of low parts and
//! is promoted to a fixed 8 KiB bitmap once it holds more than [`ARRAY_MAX`]
//! values, so memory stays proportional to the number of occupied 64K blocks
//! rather than to the raw key count for dense ranges.

use std::cmp::Ordering;

use crate::shared_types::AddressKey;

const BITMAP_WORDS: usize = 1024;
const ARRAY_MAX: usize = 4096;

type Words = Box<[u64; BITMAP_WORDS]>;

// Representation is a function of content: `Array` iff len <= ARRAY_MAX.
// Derived equality therefore compares sets, not layouts.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Container {
    Array(Vec<u16>),
    Bitmap(Words),
}

fn split(key: AddressKey) -> (u16, u16) {
    ((key >> 16) as u16, key as u16)
}

#[cfg(test)]
fn combine(high: u16, low: u16) -> AddressKey {
    ((high as u32) << 16) | low as u32
}

fn set_bits(words: &mut Words, values: &[u16]) {
    for &value in values {
        words[value as usize >> 6] |= 1u64 << (value & 63);
    }
}

fn bitmap_from(values: &[u16]) -> Words {
    let mut words = Box::new([0u64; BITMAP_WORDS]);
    set_bits(&mut words, values);
    words
}

fn merge_sorted(ours: &[u16], theirs: &[u16]) -> Vec<u16> {
    let mut merged = Vec::with_capacity(ours.len() + theirs.len());
    let (mut i, mut j) = (0, 0);
    while i < ours.len() && j < theirs.len() {
        match ours[i].cmp(&theirs[j]) {
            Ordering::Less => {
                merged.push(ours[i]);
                i += 1;
            }
            Ordering::Greater => {
                merged.push(theirs[j]);
                j += 1;
            }
            Ordering::Equal => {
                merged.push(ours[i]);
                i += 1;
                j += 1;
            }
        }
    }
    merged.extend_from_slice(&ours[i..]);
    merged.extend_from_slice(&theirs[j..]);
    merged
}

impl Container {
    fn from_sorted(values: Vec<u16>) -> Self {
        if values.len() > ARRAY_MAX {
            Container::Bitmap(bitmap_from(&values))
        } else {
            Container::Array(values)
        }
    }

    fn insert(&mut self, low: u16) -> bool {
        match self {
            Container::Array(values) => match values.binary_search(&low) {
                Ok(_) => false,
                Err(pos) => {
                    values.insert(pos, low);
                    if values.len() > ARRAY_MAX {
                        let words = bitmap_from(values);
                        *self = Container::Bitmap(words);
                    }
                    true
                }
            },
            Container::Bitmap(words) => {
                let (word, mask) = (low as usize >> 6, 1u64 << (low & 63));
                let fresh = (words[word] & mask) == 0;
                words[word] |= mask;
                fresh
            }
        }
    }

    #[cfg(test)]
    fn contains(&self, low: u16) -> bool {
        match self {
            Container::Array(values) => values.binary_search(&low).is_ok(),
            Container::Bitmap(words) => (words[low as usize >> 6] >> (low & 63)) & 1 == 1,
        }
    }

    fn len(&self) -> u64 {
        match self {
            Container::Array(values) => values.len() as u64,
            Container::Bitmap(words) => words.iter().map(|w| w.count_ones() as u64).sum(),
        }
    }

    fn union_with(&mut self, other: &Container) {
        let replacement = match (&mut *self, other) {
            (Container::Bitmap(words), Container::Bitmap(theirs)) => {
                for (word, their) in words.iter_mut().zip(theirs.iter()) {
                    *word |= their;
                }
                None
            }
            (Container::Bitmap(words), Container::Array(theirs)) => {
                set_bits(words, theirs);
                None
            }
            (Container::Array(values), Container::Bitmap(theirs)) => {
                let mut words = theirs.clone();
                set_bits(&mut words, values);
                Some(Container::Bitmap(words))
            }
            (Container::Array(values), Container::Array(theirs)) => {
                Some(Container::from_sorted(merge_sorted(values, theirs)))
            }
        };
        if let Some(container) = replacement {
            *self = container;
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Container::Array(values) => values.capacity() * std::mem::size_of::<u16>(),
            Container::Bitmap(_) => BITMAP_WORDS * std::mem::size_of::<u64>(),
        }
    }

    #[cfg(test)]
    fn iter(&self) -> ContainerIter<'_> {
        match self {
            Container::Array(values) => ContainerIter::Array(values.iter()),
            Container::Bitmap(words) => ContainerIter::Bitmap {
                words,
                index: 0,
                current: words[0],
            },
        }
    }
}

#[cfg(test)]
enum ContainerIter<'a> {
    Array(std::slice::Iter<'a, u16>),
    Bitmap {
        words: &'a [u64; BITMAP_WORDS],
        index: usize,
        current: u64,
    },
}

#[cfg(test)]
impl Iterator for ContainerIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            ContainerIter::Array(values) => values.next().copied(),
            ContainerIter::Bitmap {
                words,
                index,
                current,
            } => loop {
                if *current != 0 {
                    let bit = current.trailing_zeros() as usize;
                    *current &= *current - 1;
                    return Some((*index * 64 + bit) as u16);
                }
                *index += 1;
                if *index >= BITMAP_WORDS {
                    return None;
                }
                *current = words[*index];
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CompactSet {
    containers: Vec<(u16, Container)>,
}

impl CompactSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn position(&self, high: u16) -> Result<usize, usize> {
        self.containers.binary_search_by_key(&high, |(h, _)| *h)
    }

    /// Adds `key`, returning whether it was absent before.
    pub(crate) fn insert(&mut self, key: AddressKey) -> bool {
        let (high, low) = split(key);
        match self.position(high) {
            Ok(pos) => self.containers[pos].1.insert(low),
            Err(pos) => {
                self.containers
                    .insert(pos, (high, Container::Array(vec![low])));
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: AddressKey) -> bool {
        let (high, low) = split(key);
        match self.position(high) {
            Ok(pos) => self.containers[pos].1.contains(low),
            Err(_) => false,
        }
    }

    /// Cardinality.
    pub(crate) fn len(&self) -> u64 {
        self.containers.iter().map(|(_, c)| c.len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Union that consumes both operands, reusing the containers of `other`
    /// wherever `self` has no block of its own.
    pub(crate) fn union(mut self, other: CompactSet) -> CompactSet {
        if self.containers.len() < other.containers.len() {
            return other.union(self);
        }
        for (high, theirs) in other.containers {
            match self.position(high) {
                Ok(pos) => self.containers[pos].1.union_with(&theirs),
                Err(pos) => self.containers.insert(pos, (high, theirs)),
            }
        }
        self
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.containers.capacity() * std::mem::size_of::<(u16, Container)>()
            + self
                .containers
                .iter()
                .map(|(_, c)| c.heap_bytes())
                .sum::<usize>()
    }

    /// Keys in ascending order.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = AddressKey> + '_ {
        self.containers
            .iter()
            .flat_map(|(high, c)| c.iter().map(move |low| combine(*high, low)))
    }
}

impl Extend<AddressKey> for CompactSet {
    fn extend<I: IntoIterator<Item = AddressKey>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl FromIterator<AddressKey> for CompactSet {
    fn from_iter<I: IntoIterator<Item = AddressKey>>(iter: I) -> Self {
        let mut set = CompactSet::new();
        set.extend(iter);
        set
    }
}
