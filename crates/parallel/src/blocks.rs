//! Blocked processing over flat pixel ranges

use std::ops::Range;

/// A contiguous run of pixels `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Index of the block in iteration order
    pub index: usize,
    /// First pixel of the block
    pub start: usize,
    /// Number of pixels in the block
    pub len: usize,
}

impl Block {
    /// Pixel range covered by this block
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

/// Iterator over blocks covering `0..total`.
///
/// Every block but the last holds exactly `block_size` pixels. Blocks never
/// overlap, so per-block partial results can be combined by any associative
/// reduction.
pub struct BlockIterator {
    total: usize,
    block_size: usize,
    next_start: usize,
    next_index: usize,
}

impl BlockIterator {
    /// Create a new block iterator; a zero block size is treated as 1
    pub fn new(total: usize, block_size: usize) -> Self {
        Self {
            total,
            block_size: block_size.max(1),
            next_start: 0,
            next_index: 0,
        }
    }

    /// Number of blocks this iterator yields in total
    pub fn block_count(&self) -> usize {
        self.total.div_ceil(self.block_size)
    }
}

impl Iterator for BlockIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.total {
            return None;
        }
        let len = self.block_size.min(self.total - self.next_start);
        let block = Block {
            index: self.next_index,
            start: self.next_start,
            len,
        };
        self.next_start += len;
        self.next_index += 1;
        Some(block)
    }
}
