use std::fmt;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment > 0);
    value
        .checked_add(alignment - 1)
        .map(|v| v / alignment * alignment)
}

/// Region allocator over a fixed byte range.
///
/// Allocation is first-fit over released regions, falling back to a bump cursor. Released
/// regions are coalesced with their neighbours, and a free region touching the cursor is
/// folded back into it. This only tracks offsets; the bytes live elsewhere.
#[derive(Clone)]
pub struct RegionAllocator {
    base: u64,
    capacity: u64,
    cursor: u64,
    /// Released `(offset, size)` regions below the cursor, sorted by offset, never adjacent.
    free: Vec<(u64, u64)>,
}

impl RegionAllocator {
    /// Create an allocator handing out offsets in `[base, base + capacity)`.
    pub fn new(base: u64, capacity: u64) -> Self {
        Self {
            base,
            capacity,
            cursor: base,
            free: Vec::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Bytes between the cursor and the end of the range.
    pub fn remaining(&self) -> u64 {
        self.end().saturating_sub(self.cursor)
    }

    /// Bytes available for allocation, released regions included.
    pub fn available(&self) -> u64 {
        self.remaining() + self.free.iter().map(|(_, size)| size).sum::<u64>()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn end(&self) -> u64 {
        self.base + self.capacity
    }

    /// Allocate `size` bytes with `alignment`, returning the absolute offset.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let alignment = alignment.max(1);

        for i in 0..self.free.len() {
            let (start, len) = self.free[i];
            let Some(aligned) = align_up(start, alignment) else {
                continue;
            };
            let Some(end) = aligned.checked_add(size) else {
                continue;
            };
            if end > start + len {
                continue;
            }

            self.free.remove(i);
            if end < start + len {
                self.free.insert(i, (end, start + len - end));
            }
            if aligned > start {
                self.free.insert(i, (start, aligned - start));
            }
            return Some(aligned);
        }

        let aligned = align_up(self.cursor, alignment)?;
        let end = aligned.checked_add(size)?;
        if end > self.end() {
            return None;
        }
        if aligned > self.cursor {
            self.insert_free(self.cursor, aligned - self.cursor);
        }
        self.cursor = end;
        Some(aligned)
    }

    /// Return a region previously handed out by [`RegionAllocator::alloc`].
    pub fn free(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.insert_free(offset, size);

        // Fold a trailing free region back into the cursor.
        if let Some(&(start, len)) = self.free.last() {
            if start + len == self.cursor {
                self.free.pop();
                self.cursor = start;
            }
        }
    }

    /// Drop every allocation.
    pub fn reset(&mut self) {
        self.cursor = self.base;
        self.free.clear();
    }

    fn insert_free(&mut self, offset: u64, size: u64) {
        let pos = self.free.partition_point(|&(start, _)| start < offset);
        self.free.insert(pos, (offset, size));

        // Merge with the following region.
        if pos + 1 < self.free.len() {
            let (start, len) = self.free[pos];
            let (next_start, next_len) = self.free[pos + 1];
            if start + len == next_start {
                self.free[pos] = (start, len + next_len);
                self.free.remove(pos + 1);
            }
        }
        // Merge with the preceding region.
        if pos > 0 {
            let (prev_start, prev_len) = self.free[pos - 1];
            let (start, len) = self.free[pos];
            if prev_start + prev_len == start {
                self.free[pos - 1] = (prev_start, prev_len + len);
                self.free.remove(pos);
            }
        }
    }
}

impl fmt::Debug for RegionAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionAllocator")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .field("free_regions", &self.free.len())
            .finish()
    }
}
