use super::compartment::{define_gc_handle, Compartment};
use super::mmap::Mmap;
use super::object::ObjectHeader;
use crate::collections::HashMap;
use crate::indices::MemoryId;
use crate::types::MemoryType;
use crate::utils::round_u64_up_to_host_pages;
use crate::{Trap, MEMORY_RESERVE_MAX, WASM32_MAX_PAGES, WASM64_MAX_PAGES, WASM_PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

struct Waiter {
    thread: Thread,
    woken: AtomicBool,
}

pub(crate) struct MemoryInner {
    mmap: Mmap,
    num_pages: u64,
    /// Hard bound on growth: the type's maximum clamped to the reservation.
    max_pages: u64,
}

pub(crate) struct MemoryObject {
    pub header: ObjectHeader,
    pub ty: MemoryType,
    /// Per-memory lock; committed pages may be read concurrently, growth
    /// and shrinking serialize here rather than on the compartment lock.
    pub inner: Mutex<MemoryInner>,
    /// Waiters parked by `memory.atomic.wait`, keyed by byte address.
    waiters: Mutex<HashMap<u64, Vec<Arc<Waiter>>>>,
}

impl MemoryObject {
    pub fn new(ty: MemoryType) -> Option<MemoryObject> {
        let index_max = match ty.index_type {
            crate::types::IndexType::I32 => WASM32_MAX_PAGES,
            crate::types::IndexType::I64 => WASM64_MAX_PAGES,
        };
        let max_pages = ty.size.max.min(index_max);

        let reserve_bytes = max_pages
            .saturating_mul(WASM_PAGE_SIZE)
            .min(u64::try_from(MEMORY_RESERVE_MAX).unwrap());
        let reserve_bytes =
            usize::try_from(round_u64_up_to_host_pages(reserve_bytes)).ok()?;
        let mut mmap = Mmap::with_reserve(reserve_bytes)?;

        let committed_bytes = ty.size.min.checked_mul(WASM_PAGE_SIZE)?;
        let committed_bytes = usize::try_from(round_u64_up_to_host_pages(committed_bytes)).ok()?;
        if committed_bytes > mmap.len() || !mmap.make_accessible(0, committed_bytes) {
            return None;
        }

        let max_pages = max_pages.min(u64::try_from(mmap.len()).unwrap() / WASM_PAGE_SIZE);
        Some(MemoryObject {
            header: ObjectHeader::new("memory"),
            ty,
            inner: Mutex::new(MemoryInner {
                mmap,
                num_pages: ty.size.min,
                max_pages,
            }),
            waiters: Mutex::new(HashMap::new()),
        })
    }

    /// A bit-identical copy with a fresh reservation and no waiters.
    pub fn deep_clone(&self) -> MemoryObject {
        let inner = self.inner.lock();
        let mut mmap = Mmap::with_reserve(inner.mmap.len()).expect("memory reservation failed");
        let committed = usize::try_from(round_u64_up_to_host_pages(
            inner.num_pages * WASM_PAGE_SIZE,
        ))
        .unwrap();
        assert!(mmap.make_accessible(0, committed));
        if committed > 0 {
            let len = usize::try_from(inner.num_pages * WASM_PAGE_SIZE).unwrap();
            // SAFETY: both ranges are committed and we hold the source lock.
            unsafe {
                mmap.slice_mut(0, len).copy_from_slice(inner.mmap.slice(0, len));
            }
        }
        MemoryObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            ty: self.ty,
            inner: Mutex::new(MemoryInner {
                mmap,
                num_pages: inner.num_pages,
                max_pages: inner.max_pages,
            }),
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryInner {
    fn byte_size(&self) -> u64 {
        self.num_pages * WASM_PAGE_SIZE
    }
}

/// The result of a `memory.atomic.wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A notify woke this waiter.
    Woken,
    /// The value at the address did not match the expected value.
    NotEqual,
    /// The timeout expired before a notify arrived.
    TimedOut,
}

impl WaitResult {
    /// The numeric code the wait instructions return to the guest.
    pub fn as_i32(self) -> i32 {
        match self {
            WaitResult::Woken => 0,
            WaitResult::NotEqual => 1,
            WaitResult::TimedOut => 2,
        }
    }
}

define_gc_handle!(
    /// A root reference to a linear memory, sized in 64KiB pages.
    Memory,
    MemoryId,
    memories,
    MemoryObject
);

impl Memory {
    /// Creates a memory in `compartment`; returns `None` if the reservation
    /// or initial commit fails.
    pub fn new(compartment: &Compartment, ty: MemoryType) -> Option<Memory> {
        let object = MemoryObject::new(ty)?;
        let id = {
            let mut state = compartment.inner.state.write();
            state.memories.alloc(object)
        };
        Some(Memory::from_id(compartment.inner.clone(), id))
    }

    pub fn ty(&self) -> MemoryType {
        self.with_object(|object| object.ty)
    }

    /// The current size in pages.
    pub fn size(&self) -> u64 {
        self.with_object(|object| object.inner.lock().num_pages)
    }

    /// Grows by `delta` pages, returning the previous size, or `None` if
    /// the new size would exceed the maximum or cannot be committed.
    pub fn grow(&self, delta: u64) -> Option<u64> {
        self.with_object(|object| {
            let mut inner = object.inner.lock();
            let old_pages = inner.num_pages;
            let new_pages = old_pages.checked_add(delta)?;
            if new_pages > inner.max_pages {
                return None;
            }
            let old_committed =
                usize::try_from(round_u64_up_to_host_pages(old_pages * WASM_PAGE_SIZE)).ok()?;
            let new_committed =
                usize::try_from(round_u64_up_to_host_pages(new_pages * WASM_PAGE_SIZE)).ok()?;
            if new_committed > old_committed
                && !inner
                    .mmap
                    .make_accessible(old_committed, new_committed - old_committed)
            {
                return None;
            }
            inner.num_pages = new_pages;
            Some(old_pages)
        })
    }

    /// Shrinks by `delta` pages, returning the previous size, or `None` if
    /// the memory would drop below its minimum size.
    pub fn shrink(&self, delta: u64) -> Option<u64> {
        self.with_object(|object| {
            let mut inner = object.inner.lock();
            let old_pages = inner.num_pages;
            let new_pages = old_pages.checked_sub(delta)?;
            if new_pages < object.ty.size.min {
                return None;
            }
            let old_committed =
                usize::try_from(round_u64_up_to_host_pages(old_pages * WASM_PAGE_SIZE)).ok()?;
            let new_committed =
                usize::try_from(round_u64_up_to_host_pages(new_pages * WASM_PAGE_SIZE)).ok()?;
            if new_committed < old_committed {
                inner
                    .mmap
                    .make_inaccessible(new_committed, old_committed - new_committed);
            }
            inner.num_pages = new_pages;
            Some(old_pages)
        })
    }

    fn check_bounds(inner: &MemoryInner, offset: u64, len: u64) -> Result<usize, Trap> {
        let end = offset
            .checked_add(len)
            .ok_or(Trap::MemoryAddressOutOfBounds)?;
        if end > inner.byte_size() {
            return Err(Trap::MemoryAddressOutOfBounds);
        }
        usize::try_from(offset).map_err(|_| Trap::MemoryAddressOutOfBounds)
    }

    /// Runs `f` over the committed bytes `[offset, offset+len)`.
    pub fn with_validated_range<R>(
        &self,
        offset: u64,
        len: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, Trap> {
        self.with_object(|object| {
            let mut inner = object.inner.lock();
            let start = Self::check_bounds(&inner, offset, len)?;
            let len = usize::try_from(len).map_err(|_| Trap::MemoryAddressOutOfBounds)?;
            // SAFETY: the range was just validated against the committed
            // size, and the inner lock is held.
            Ok(f(unsafe { inner.mmap.slice_mut(start, len) }))
        })
    }

    /// Returns a pointer to `[offset, offset+len)` after verifying it lies
    /// within committed pages.
    ///
    /// The pointer stays valid while the memory object lives; writes must
    /// be externally synchronized.
    pub fn validated_range_ptr(&self, offset: u64, len: u64) -> Result<*mut u8, Trap> {
        self.with_object(|object| {
            let mut inner = object.inner.lock();
            let start = Self::check_bounds(&inner, offset, len)?;
            // SAFETY: in-bounds offset of the mapping base.
            Ok(unsafe { inner.mmap.as_mut_ptr().add(start) })
        })
    }

    /// Returns a pointer to `[offset, offset+len)` verifying only the
    /// memory's reserved virtual range: accesses may fault, but the range
    /// is guaranteed not to alias any other memory.
    pub fn reserved_range_ptr(&self, offset: u64, len: u64) -> Result<*mut u8, Trap> {
        self.with_object(|object| {
            let mut inner = object.inner.lock();
            let end = offset
                .checked_add(len)
                .ok_or(Trap::MemoryAddressOutOfBounds)?;
            if end > u64::try_from(inner.mmap.len()).unwrap() {
                return Err(Trap::MemoryAddressOutOfBounds);
            }
            let start = usize::try_from(offset).map_err(|_| Trap::MemoryAddressOutOfBounds)?;
            // SAFETY: in-bounds offset of the reservation.
            Ok(unsafe { inner.mmap.as_mut_ptr().add(start) })
        })
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Trap> {
        self.with_validated_range(offset, u64::try_from(buf.len()).unwrap(), |bytes| {
            buf.copy_from_slice(bytes);
        })
    }

    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), Trap> {
        self.with_validated_range(offset, u64::try_from(bytes.len()).unwrap(), |dest| {
            dest.copy_from_slice(bytes);
        })
    }

    fn check_atomic_access(&self, address: u64, width: u64) -> Result<(), Trap> {
        if !self.ty().shared {
            return Err(Trap::InvalidArgument);
        }
        if address % width != 0 {
            return Err(Trap::MisalignedAtomicMemoryAccess);
        }
        Ok(())
    }

    /// Blocks the current thread until another thread notifies `address`,
    /// the 32-bit value there no longer equals `expected`, or the timeout
    /// (in nanoseconds, `None` meaning unbounded) expires.
    pub fn atomic_wait32(
        &self,
        address: u64,
        expected: u32,
        timeout_ns: Option<u64>,
    ) -> Result<WaitResult, Trap> {
        self.check_atomic_access(address, 4)?;
        // Register before comparing, so a store+notify between the
        // comparison and the park cannot be lost.
        let waiter = self.register_waiter(address);
        let mut current = [0u8; 4];
        match self.read(address, &mut current) {
            Ok(()) => {}
            Err(trap) => {
                self.deregister_waiter(address, &waiter);
                return Err(trap);
            }
        }
        if u32::from_le_bytes(current) != expected {
            self.deregister_waiter(address, &waiter);
            return Ok(WaitResult::NotEqual);
        }
        self.park_on(address, waiter, timeout_ns)
    }

    /// 64-bit variant of [`Memory::atomic_wait32`].
    pub fn atomic_wait64(
        &self,
        address: u64,
        expected: u64,
        timeout_ns: Option<u64>,
    ) -> Result<WaitResult, Trap> {
        self.check_atomic_access(address, 8)?;
        let waiter = self.register_waiter(address);
        let mut current = [0u8; 8];
        match self.read(address, &mut current) {
            Ok(()) => {}
            Err(trap) => {
                self.deregister_waiter(address, &waiter);
                return Err(trap);
            }
        }
        if u64::from_le_bytes(current) != expected {
            self.deregister_waiter(address, &waiter);
            return Ok(WaitResult::NotEqual);
        }
        self.park_on(address, waiter, timeout_ns)
    }

    fn register_waiter(&self, address: u64) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            woken: AtomicBool::new(false),
        });
        self.with_object(|object| {
            object
                .waiters
                .lock()
                .get_or_insert_with(address, Vec::new)
                .push(waiter.clone());
        });
        waiter
    }

    fn deregister_waiter(&self, address: u64, waiter: &Arc<Waiter>) {
        self.with_object(|object| {
            let mut waiters = object.waiters.lock();
            if let Some(list) = waiters.get_mut(&address) {
                list.retain(|other| !Arc::ptr_eq(other, waiter));
                if list.is_empty() {
                    waiters.remove(&address);
                }
            }
        });
    }

    fn park_on(
        &self,
        address: u64,
        waiter: Arc<Waiter>,
        timeout_ns: Option<u64>,
    ) -> Result<WaitResult, Trap> {
        let deadline = timeout_ns.map(|ns| Instant::now() + Duration::from_nanos(ns));
        let result = loop {
            if waiter.woken.load(Ordering::Acquire) {
                break WaitResult::Woken;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitResult::TimedOut;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        };

        if result == WaitResult::TimedOut {
            // Deregister; a racing notify may have woken us anyway.
            let woken = self.with_object(|object| {
                let mut waiters = object.waiters.lock();
                if let Some(list) = waiters.get_mut(&address) {
                    list.retain(|other| !Arc::ptr_eq(other, &waiter));
                }
                waiter.woken.load(Ordering::Acquire)
            });
            if woken {
                return Ok(WaitResult::Woken);
            }
        }
        Ok(result)
    }

    /// Wakes up to `count` waiters parked on `address`, returning the
    /// number woken. A woken waiter observes every store made before the
    /// notify.
    pub fn atomic_notify(&self, address: u64, count: u32) -> Result<u32, Trap> {
        if !self.ty().shared {
            return Ok(0);
        }
        if address % 4 != 0 {
            return Err(Trap::MisalignedAtomicMemoryAccess);
        }
        self.with_object(|object| {
            let mut waiters = object.waiters.lock();
            let Some(list) = waiters.get_mut(&address) else {
                return Ok(0);
            };
            let mut woken = 0u32;
            while woken < count {
                let Some(waiter) = list.pop() else { break };
                waiter.woken.store(true, Ordering::Release);
                waiter.thread.unpark();
                woken += 1;
            }
            if list.is_empty() {
                waiters.remove(&address);
            }
            Ok(woken)
        })
    }
}
