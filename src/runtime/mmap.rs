use crate::utils::usize_is_multiple_of_host_page_size;
use core::ptr::NonNull;
use core::{ptr, slice};
use rustix::mm::MprotectFlags;

cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("linear memories need a unix host: reservation and \
                        commit are built on mmap/mprotect");
    }
}

/// An anonymous virtual-memory reservation. Pages start inaccessible and
/// are committed with [`Mmap::make_accessible`]; the reservation itself
/// guarantees the range aliases no other allocation.
#[derive(Debug)]
pub(crate) struct Mmap {
    memory: NonNull<[u8]>,
}

// SAFETY: the mapping is owned and access is coordinated by the caller's
// locks.
unsafe impl Send for Mmap {}
// SAFETY: see above.
unsafe impl Sync for Mmap {}

impl Mmap {
    pub fn new_empty() -> Self {
        Self {
            memory: NonNull::from(&mut []),
        }
    }

    /// Reserves `size` bytes of address space with no access rights.
    pub fn with_reserve(size: usize) -> Option<Self> {
        assert!(usize_is_multiple_of_host_page_size(size));
        if size == 0 {
            return Some(Self::new_empty());
        }
        // SAFETY: anonymous mapping with no placement constraints.
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                rustix::mm::ProtFlags::empty(),
                rustix::mm::MapFlags::PRIVATE,
            )
            .ok()?
        };
        // SAFETY: mmap returned `size` bytes at `ptr`.
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Some(Mmap {
            memory: NonNull::new(memory)?,
        })
    }

    /// Commits `[start, start+len)` as readable and writable.
    pub fn make_accessible(&mut self, start: usize, len: usize) -> bool {
        assert!(usize_is_multiple_of_host_page_size(start));
        assert!(usize_is_multiple_of_host_page_size(len));
        assert!(start + len <= self.len());
        if len == 0 {
            return true;
        }
        let ptr = self.memory.as_ptr();
        // SAFETY: the range lies within this mapping.
        unsafe {
            rustix::mm::mprotect(
                ptr.cast::<u8>().add(start).cast(),
                len,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
            .is_ok()
        }
    }

    /// Revokes access to `[start, start+len)`.
    pub fn make_inaccessible(&mut self, start: usize, len: usize) -> bool {
        assert!(usize_is_multiple_of_host_page_size(start));
        assert!(usize_is_multiple_of_host_page_size(len));
        assert!(start + len <= self.len());
        if len == 0 {
            return true;
        }
        let ptr = self.memory.as_ptr();
        // SAFETY: the range lies within this mapping.
        unsafe {
            rustix::mm::mprotect(
                ptr.cast::<u8>().add(start).cast(),
                len,
                MprotectFlags::empty(),
            )
            .is_ok()
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn len(&self) -> usize {
        // SAFETY: the pointer metadata is valid for the mapping's lifetime.
        unsafe { (&*self.memory.as_ptr()).len() }
    }

    /// # Safety
    ///
    /// The range must lie within committed pages, and the caller must hold
    /// whatever lock guards concurrent mutation.
    #[inline]
    pub unsafe fn slice(&self, start: usize, len: usize) -> &[u8] {
        debug_assert!(start + len <= self.len());
        slice::from_raw_parts(self.as_ptr().add(start), len)
    }

    /// # Safety
    ///
    /// See [`Mmap::slice`].
    #[inline]
    pub unsafe fn slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        debug_assert!(start + len <= self.len());
        slice::from_raw_parts_mut(self.as_mut_ptr().add(start), len)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if self.len() == 0 {
            return;
        }
        // SAFETY: the mapping was created by mmap with this length.
        unsafe {
            let _ = rustix::mm::munmap(self.memory.as_ptr().cast(), self.len());
        }
    }
}
