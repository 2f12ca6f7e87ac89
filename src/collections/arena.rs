use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

const DEFAULT_SEGMENT_BYTES: usize = 8192;

struct Segment {
    bytes: Box<[u8]>,
    used: usize,
}

/// A forward-only allocator backed by a linked list of growable segments.
///
/// Allocation only moves forward; freeing happens wholesale by restoring a
/// [`ArenaMark`] or dropping the arena. Intended for scope-bounded scratch
/// data, not for long-lived objects.
pub struct Arena {
    segments: Vec<Segment>,
    total_allocated: usize,
    total_wasted: usize,
}

/// A snapshot of an [`Arena`]'s allocation state.
#[derive(Debug, Clone, Copy)]
pub struct ArenaMark {
    segment_index: usize,
    bytes_used_in_segment: usize,
    total_allocated: usize,
    total_wasted: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            total_allocated: 0,
            total_wasted: 0,
        }
    }

    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    /// Bytes left unused at the end of non-current segments.
    pub fn total_wasted(&self) -> usize {
        self.total_wasted
    }

    /// Allocates `len` zeroed bytes.
    pub fn allocate(&mut self, len: usize) -> &mut [u8] {
        if self
            .segments
            .last()
            .map_or(true, |segment| segment.bytes.len() - segment.used < len)
        {
            let wasted = self
                .segments
                .last()
                .map_or(0, |segment| segment.bytes.len() - segment.used);
            self.total_wasted += wasted;
            let capacity = len.max(DEFAULT_SEGMENT_BYTES);
            self.segments.push(Segment {
                bytes: vec![0u8; capacity].into_boxed_slice(),
                used: 0,
            });
        }
        let segment = self.segments.last_mut().unwrap();
        let start = segment.used;
        segment.used += len;
        self.total_allocated += len;
        &mut segment.bytes[start..start + len]
    }

    /// Grows the most recent allocation in place if it is the last one in the
    /// current segment and the segment has room; returns `false` otherwise,
    /// in which case the caller must allocate anew and copy.
    pub fn grow_last(&mut self, old_len: usize, new_len: usize) -> bool {
        debug_assert!(new_len >= old_len);
        let Some(segment) = self.segments.last_mut() else {
            return false;
        };
        if segment.used < old_len {
            return false;
        }
        let start = segment.used - old_len;
        if start + new_len > segment.bytes.len() {
            return false;
        }
        segment.used = start + new_len;
        self.total_allocated += new_len - old_len;
        true
    }

    /// Captures the current allocation state.
    pub fn mark(&self) -> ArenaMark {
        ArenaMark {
            segment_index: self.segments.len(),
            bytes_used_in_segment: self.segments.last().map_or(0, |segment| segment.used),
            total_allocated: self.total_allocated,
            total_wasted: self.total_wasted,
        }
    }

    /// Frees every segment allocated after `mark` was taken and rewinds the
    /// segment offset.
    pub fn restore(&mut self, mark: ArenaMark) {
        self.segments.truncate(mark.segment_index);
        if let Some(segment) = self.segments.last_mut() {
            segment.used = mark.bytes_used_in_segment;
        }
        self.total_allocated = mark.total_allocated;
        self.total_wasted = mark.total_wasted;
    }

    /// Runs `body` with a scope that restores the arena on exit.
    pub fn scoped<R>(&mut self, body: impl FnOnce(&mut Arena) -> R) -> R {
        let mark = self.mark();
        let result = body(self);
        self.restore(mark);
        result
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

std::thread_local! {
    static SCRATCH_ARENA: RefCell<Arena> = RefCell::new(Arena::new());
}

/// A handle to the thread-local scratch arena; the scope it covers is
/// restored when the closure returns.
pub struct ScopedArena;

impl ScopedArena {
    /// Runs `body` against the thread-local scratch arena, restoring it
    /// afterwards.
    pub fn with<R>(body: impl FnOnce(&mut Arena) -> R) -> R {
        SCRATCH_ARENA.with(|arena| {
            let arena = &mut *arena.borrow_mut();
            arena.scoped(body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_restore() {
        let mut arena = Arena::new();
        let mark = arena.mark();
        {
            let bytes = arena.allocate(100);
            assert_eq!(bytes.len(), 100);
            bytes.fill(0xAB);
        }
        assert_eq!(arena.total_allocated(), 100);
        arena.allocate(DEFAULT_SEGMENT_BYTES * 2);
        assert_eq!(arena.total_allocated(), 100 + DEFAULT_SEGMENT_BYTES * 2);
        arena.restore(mark);
        assert_eq!(arena.total_allocated(), 0);
    }

    #[test]
    fn grow_last_extends_the_tail_allocation() {
        let mut arena = Arena::new();
        arena.allocate(16);
        assert!(arena.grow_last(16, 64));
        assert_eq!(arena.total_allocated(), 64);
        // A request that exceeds the segment cannot grow in place.
        assert!(!arena.grow_last(64, DEFAULT_SEGMENT_BYTES * 4));
    }

    #[test]
    fn scoped_resets() {
        ScopedArena::with(|arena| {
            arena.allocate(32);
            assert!(arena.total_allocated() >= 32);
        });
        ScopedArena::with(|arena| {
            assert_eq!(arena.total_allocated(), 0);
        });
    }
}
