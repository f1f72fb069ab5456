//! Piece-level cross reconciliation.
//!
//! Several copies of the same content, each chunked into pieces of its own
//! size, are reconciled against each other: a piece missing in one copy is
//! filled from another copy whenever the other copy's present pieces cover
//! the missing piece's byte range completely. Presence bits are trusted as
//! ground truth; nothing is hashed here.

use std::{fmt, io};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::{bitfield::Bitfield, storage::Backend};

#[derive(Debug, Error)]
pub enum Error {
    #[error("need at least two items to reconcile, got {0}")]
    TooFewItems(usize),
    #[error("invalid item {id}: {reason}")]
    Input { id: String, reason: String },
    #[error("failed to read {length} bytes at offset {offset} from {id}")]
    Read {
        id: String,
        offset: u64,
        length: u64,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {length} bytes at offset {offset} to {id}")]
    Write {
        id: String,
        offset: u64,
        length: u64,
        #[source]
        source: io::Error,
    },
}

/// One participating copy of the content.
#[derive(Debug)]
pub struct ContentItem<B> {
    pub id: String,
    pub piece_length: u64,
    pub content_length: u64,
    pub bitfield: Bitfield,
    pub backend: B,
}

impl<B> ContentItem<B> {
    pub fn new(
        id: impl Into<String>,
        piece_length: u64,
        content_length: u64,
        bitfield: Bitfield,
        backend: B,
    ) -> Self {
        Self {
            id: id.into(),
            piece_length,
            content_length,
            bitfield,
            backend,
        }
    }

    /// Swaps the backend, keeping id, lengths and presence state.
    pub fn map_backend<C>(self, f: impl FnOnce(B) -> C) -> ContentItem<C> {
        ContentItem {
            id: self.id,
            piece_length: self.piece_length,
            content_length: self.content_length,
            bitfield: self.bitfield,
            backend: f(self.backend),
        }
    }

    /// Number of pieces implied by the lengths, i.e. the required bitfield length.
    pub fn expected_pieces(&self) -> u64 {
        self.content_length.div_ceil(self.piece_length)
    }

    /// Byte span `[start, end)` of piece `index`, clamped to the content length.
    pub fn piece_span(&self, index: usize) -> (u64, u64) {
        let start = index as u64 * self.piece_length;
        let end = (start + self.piece_length).min(self.content_length);
        (start, end)
    }

    fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Error::Input {
            id: self.id.clone(),
            reason,
        };
        if self.piece_length == 0 {
            return Err(invalid("piece length is zero".into()));
        }
        let expected = self.expected_pieces();
        if self.bitfield.len() as u64 != expected {
            return Err(invalid(format!(
                "bitfield has {} entries, {} bytes in pieces of {} need {}",
                self.bitfield.len(),
                self.content_length,
                self.piece_length,
                expected
            )));
        }
        Ok(())
    }
}

/// A target piece that was filled from a donor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    pub target: String,
    pub piece: usize,
    pub donor: String,
}

impl fmt::Display for FillEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: filled piece {} <- {}", self.target, self.piece, self.donor)
    }
}

/// Runs one reconciliation pass over `items`.
///
/// The slice is sorted in place by ascending piece length, then every item is
/// used as a donor for every other item in that order. Bits set while filling
/// are visible to the rest of the pass, so a freshly repaired item can donate
/// to items visited after it. Only one pass is made.
///
/// Validation happens before anything is touched. A backend failure aborts the
/// pass; pieces written before the failure stay written and marked.
pub fn reconcile<B: Backend>(items: &mut [ContentItem<B>]) -> Result<Vec<FillEvent>, Error> {
    if items.len() < 2 {
        return Err(Error::TooFewItems(items.len()));
    }
    for item in items.iter() {
        item.validate()?;
    }
    let content_length = items[0].content_length;
    if let Some(other) = items.iter().find(|it| it.content_length != content_length) {
        return Err(Error::Input {
            id: other.id.clone(),
            reason: format!(
                "content length {} differs from {} ({} bytes)",
                other.content_length, items[0].id, content_length
            ),
        });
    }

    items.sort_by_key(|it| it.piece_length);

    info!(
        items = items.len(),
        content_length,
        missing = items
            .iter()
            .map(|it| it.bitfield.len() - it.bitfield.count_ones())
            .sum::<usize>(),
        "starting reconciliation"
    );

    let mut events = Vec::new();
    for donor_idx in 0..items.len() {
        for target_idx in 0..items.len() {
            if donor_idx == target_idx {
                continue;
            }
            let (target, donor) = pair_mut(items, target_idx, donor_idx);
            fill_from(target, donor, &mut events)?;
        }
    }

    info!(filled = events.len(), "reconciliation finished");
    Ok(events)
}

/// Fills every missing piece of `target` that `donor` fully covers.
fn fill_from<B: Backend>(
    target: &mut ContentItem<B>,
    donor: &mut ContentItem<B>,
    events: &mut Vec<FillEvent>,
) -> Result<(), Error> {
    for piece in 0..target.bitfield.len() {
        if target.bitfield.get(piece) {
            continue;
        }

        let (start, end) = target.piece_span(piece);
        if !covers(donor, start, end) {
            trace!(item = %target.id, piece, donor = %donor.id, "donor does not cover piece");
            continue;
        }

        let mut buf = vec![0u8; (end - start) as usize];
        copy_range(donor, start, end, &mut buf)?;

        target
            .backend
            .write_at(start, &buf)
            .map_err(|source| Error::Write {
                id: target.id.clone(),
                offset: start,
                length: end - start,
                source,
            })?;
        target.bitfield.set(piece, true);

        debug!(item = %target.id, piece, donor = %donor.id, start, end, "filled piece");
        events.push(FillEvent {
            target: target.id.clone(),
            piece,
            donor: donor.id.clone(),
        });
    }
    Ok(())
}

/// Walks the donor's piece grid across `[start, end)` and reports whether
/// every touched donor piece exists and is present.
fn covers<B>(donor: &ContentItem<B>, start: u64, end: u64) -> bool {
    let mut pos = start;
    while pos < end {
        let j = pos / donor.piece_length;
        if j >= donor.bitfield.len() as u64 || !donor.bitfield.get(j as usize) {
            return false;
        }
        pos = (j + 1) * donor.piece_length;
    }
    true
}

/// Reads `[start, end)` from the donor into `buf`, one donor piece overlap at
/// a time. `buf` must be exactly `end - start` bytes long.
fn copy_range<B: Backend>(
    donor: &mut ContentItem<B>,
    start: u64,
    end: u64,
    buf: &mut [u8],
) -> Result<(), Error> {
    let mut pos = start;
    while pos < end {
        let j = pos / donor.piece_length;
        let j_end = ((j + 1) * donor.piece_length).min(donor.content_length);
        let overlap_end = j_end.min(end);

        let slot = &mut buf[(pos - start) as usize..(overlap_end - start) as usize];
        donor
            .backend
            .read_at(pos, slot)
            .map_err(|source| Error::Read {
                id: donor.id.clone(),
                offset: pos,
                length: overlap_end - pos,
                source,
            })?;

        pos = overlap_end;
    }
    Ok(())
}

/// Mutable references to two distinct elements.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert!(a != b, "pair_mut needs distinct indices");
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
