//! Compact journaling of bin increment batches.
//!
//! The accumulating histogram must be able to undo increments already
//! applied in the current cycle, so every applied batch is journaled. To
//! keep the journal in a single contiguous buffer regardless of batch size
//! distribution, each batch is stored with a size prefix: one element when
//! the size is below the bin-index type's maximum, otherwise a sentinel
//! element followed by the raw bytes of a `usize` spread over bin-index
//! elements. Decoding walks the buffer with an input-iterator.

use crate::events::BinIndex;

const SENTINEL: BinIndex = BinIndex::MAX;
const SIZE_ELEMENTS: usize = std::mem::size_of::<usize>() / std::mem::size_of::<BinIndex>();

/// Number of journal elements an encoded batch of `len` indices occupies.
pub fn encoded_batch_len(len: usize) -> usize {
    if len >= SENTINEL as usize {
        1 + SIZE_ELEMENTS + len
    } else {
        1 + len
    }
}

fn encode_batch(dest: &mut Vec<BinIndex>, batch: &[BinIndex]) {
    if batch.len() >= SENTINEL as usize {
        dest.push(SENTINEL);
        for chunk in batch.len().to_le_bytes().chunks_exact(2) {
            dest.push(BinIndex::from_le_bytes([chunk[0], chunk[1]]));
        }
    } else {
        dest.push(batch.len() as BinIndex);
    }
    dest.extend_from_slice(batch);
}

/// A journal of bin increment batches for one accumulation cycle.
///
/// Batch `i` of the journal corresponds to element `i` of the histogram
/// array; empty batches are stored (as a zero prefix) so positions stay
/// aligned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BinIncrementJournal {
    encoded: Vec<BinIndex>,
    n_batches: usize,
}

impl BinIncrementJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_batches(&self) -> usize {
        self.n_batches
    }

    pub fn is_empty(&self) -> bool {
        self.n_batches == 0
    }

    pub fn clear(&mut self) {
        self.encoded.clear();
        self.n_batches = 0;
    }

    /// Append one batch of bin indices.
    pub fn append_batch(&mut self, batch: &[BinIndex]) {
        encode_batch(&mut self.encoded, batch);
        self.n_batches += 1;
    }

    /// Iterate `(batch_index, indices)` in append order.
    pub fn iter(&self) -> JournalIter<'_> {
        JournalIter {
            encoded: &self.encoded,
            pos: 0,
            batch_index: 0,
        }
    }
}

/// Input iterator over an encoded journal.
pub struct JournalIter<'a> {
    encoded: &'a [BinIndex],
    pos: usize,
    batch_index: usize,
}

impl<'a> Iterator for JournalIter<'a> {
    type Item = (usize, &'a [BinIndex]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.encoded.len() {
            return None;
        }
        let prefix = self.encoded[self.pos];
        self.pos += 1;
        let len = if prefix == SENTINEL {
            let mut bytes = [0u8; std::mem::size_of::<usize>()];
            for (chunk, &element) in bytes
                .chunks_exact_mut(2)
                .zip(&self.encoded[self.pos..self.pos + SIZE_ELEMENTS])
            {
                chunk.copy_from_slice(&element.to_le_bytes());
            }
            self.pos += SIZE_ELEMENTS;
            usize::from_le_bytes(bytes)
        } else {
            prefix as usize
        };
        let indices = &self.encoded[self.pos..self.pos + len];
        self.pos += len;
        let batch_index = self.batch_index;
        self.batch_index += 1;
        Some((batch_index, indices))
    }
}
