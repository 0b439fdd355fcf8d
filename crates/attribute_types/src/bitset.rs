//! Packed bit array used for dirty masks and dependency masks.
//!
//! Bits live in 32-bit words. The logical length is fixed at construction
//! and only changes through [`BitSet::resize`] or the combining operators
//! (`&=`, `|=`), which widen the left side to the larger of the two lengths.
//! Bits at positions `>= len` are never set.

use std::ops::{BitAndAssign, BitOrAssign};

use crate::wire::{WireError, WireReader, WireWriter};

pub type Word = u32;

pub const WORD_BITS: usize = Word::BITS as usize;

const DE_BRUIJN: Word = 0x077C_B531;

const DE_BRUIJN_POSITION: [u8; 32] = [
    0, 1, 28, 2, 29, 14, 24, 3, 30, 22, 20, 15, 25, 17, 4, 8, 31, 27, 13, 23, 21, 19, 16, 7, 26,
    12, 18, 6, 11, 5, 10, 9,
];

fn words_for(len: usize) -> usize {
    len.div_ceil(WORD_BITS)
}

/// Mask of the valid bits in the final word of a set of `len` bits.
fn tail_mask(len: usize) -> Word {
    match len % WORD_BITS {
        0 => Word::MAX,
        rem => (1 << rem) - 1,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitSet {
    len: usize,
    words: Vec<Word>,
}

impl BitSet {
    /// Create an all-clear set of `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; words_for(len)],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    fn in_range(&self, index: usize) -> bool {
        debug_assert!(
            index < self.len,
            "bit index {index} out of range for BitSet of len {}",
            self.len
        );
        index < self.len
    }

    pub fn add(&mut self, index: usize) {
        if self.in_range(index) {
            self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        }
    }

    pub fn remove(&mut self, index: usize) {
        if self.in_range(index) {
            self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        }
    }

    pub fn test(&self, index: usize) -> bool {
        self.in_range(index) && self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.test(index)
    }

    /// Set every bit in `begin..=end`.
    pub fn add_range(&mut self, begin: usize, end: usize) {
        self.apply_range(begin, end, true);
    }

    /// Clear every bit in `begin..=end`.
    pub fn remove_range(&mut self, begin: usize, end: usize) {
        self.apply_range(begin, end, false);
    }

    fn apply_range(&mut self, begin: usize, end: usize, set: bool) {
        debug_assert!(begin <= end, "inverted bit range {begin}..={end}");
        if begin > end || !self.in_range(end) {
            return;
        }

        let first = begin / WORD_BITS;
        let last = end / WORD_BITS;
        let head = Word::MAX << (begin % WORD_BITS);
        let tail = Word::MAX >> (WORD_BITS - 1 - end % WORD_BITS);

        let assign = |word: &mut Word, mask: Word| {
            if set {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        };

        if first == last {
            assign(&mut self.words[first], head & tail);
            return;
        }

        assign(&mut self.words[first], head);
        for word in &mut self.words[first + 1..last] {
            *word = if set { Word::MAX } else { 0 };
        }
        assign(&mut self.words[last], tail);
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn mark_all(&mut self) {
        self.words.fill(Word::MAX);
        self.mask_tail();
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Change the logical length, keeping the bits that still fit.
    pub fn resize(&mut self, len: usize) {
        self.len = len;
        self.words.resize(words_for(len), 0);
        self.mask_tail();
    }

    fn mask_tail(&mut self) {
        let mask = tail_mask(self.len);
        if let Some(last) = self.words.last_mut() {
            *last &= mask;
        }
    }

    fn widen_to(&mut self, other: &BitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        self.len = self.len.max(other.len);
    }

    /// Iterate over the indices of set bits only.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Visit every index in `0..len`, reporting whether it is marked.
    pub fn full_iter(&self) -> FullIter<'_> {
        FullIter {
            set: self,
            index: 0,
        }
    }

    /// Write the words up to and including the highest nonzero one.
    pub fn encode<W: WireWriter + ?Sized>(&self, writer: &mut W) {
        let used = self
            .words
            .iter()
            .rposition(|w| *w != 0)
            .map_or(0, |i| i + 1);
        writer.write_varint(used as u64);
        for word in &self.words[..used] {
            writer.write_u32(*word);
        }
    }

    /// Overwrite this set with an encoded one.
    ///
    /// Words beyond this set's capacity are consumed and dropped, and the
    /// result is masked to `len`, so decoding into a smaller set truncates.
    pub fn decode_into<R: WireReader + ?Sized>(&mut self, reader: &mut R) -> Result<(), WireError> {
        self.clear();
        let count = reader.read_varint()?;
        let max = reader.remaining();
        if count.saturating_mul(4) > max as u64 {
            return Err(WireError::LengthTooLarge {
                len: count.saturating_mul(4),
                max,
            });
        }

        let capacity = self.words.len();
        let mut dropped = 0usize;
        for i in 0..count as usize {
            let word = reader.read_u32()?;
            if i < capacity {
                self.words[i] = word;
            } else if word != 0 {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::trace!(dropped, capacity, "bitset decode truncated nonzero words");
        }

        self.mask_tail();
        Ok(())
    }
}

impl BitAndAssign<&BitSet> for BitSet {
    fn bitand_assign(&mut self, rhs: &BitSet) {
        self.widen_to(rhs);
        for (i, word) in self.words.iter_mut().enumerate() {
            *word &= rhs.words.get(i).copied().unwrap_or(0);
        }
    }
}

impl BitOrAssign<&BitSet> for BitSet {
    fn bitor_assign(&mut self, rhs: &BitSet) {
        self.widen_to(rhs);
        for (word, other) in self.words.iter_mut().zip(&rhs.words) {
            *word |= *other;
        }
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = usize;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Iterators
// ─────────────────────────────────────────────────────────────────────────────

/// Sparse iterator: zero words are skipped whole, set bits are found by
/// isolating the lowest one and looking its position up in a de Bruijn table.
pub struct Iter<'a> {
    words: &'a [Word],
    word_index: usize,
    current: Word,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.current == 0 {
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }

        let word = self.current;
        let lowest = word ^ (word & word.wrapping_sub(1));
        self.current = word & !lowest;
        let bit = DE_BRUIJN_POSITION[(lowest.wrapping_mul(DE_BRUIJN) >> 27) as usize];
        Some(self.word_index * WORD_BITS + bit as usize)
    }
}

/// One position visited by [`FullIter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub index: usize,
    pub marked: bool,
}

impl Mark {
    pub fn is_marked(&self) -> bool {
        self.marked
    }
}

pub struct FullIter<'a> {
    set: &'a BitSet,
    index: usize,
}

impl Iterator for FullIter<'_> {
    type Item = Mark;

    fn next(&mut self) -> Option<Mark> {
        if self.index >= self.set.len {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some(Mark {
            index,
            marked: self.set.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.set.len - self.index.min(self.set.len);
        (left, Some(left))
    }
}

impl ExactSizeIterator for FullIter<'_> {}
