//! The lock-guarded facade over `ChunkAllocator`: the thing a caller
//! actually holds a reference to, whether driving it directly or plugging
//! it in as `#[global_allocator]`.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::chunk::header_align;
use crate::error::InitError;
use crate::heap::{ChunkAllocator, HeapConfig};

/// A `ChunkAllocator` behind a spinlock, with allocate/release call
/// counters for diagnostics. Safe to share across threads; `init` must
/// still only be called once per region.
pub struct Heap {
    inner: Mutex<ChunkAllocator>,
    allocate_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl Heap {
    pub const fn new(config: HeapConfig) -> Self {
        Heap {
            inner: Mutex::new(ChunkAllocator::new(config)),
            allocate_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    /// Registers `len` bytes starting at `region` for management. See
    /// `ChunkAllocator::init` for the safety contract. Blocks for the lock:
    /// `init` is one-time setup, never called from a context that could
    /// already be holding it.
    ///
    /// # Safety
    ///
    /// Same as `ChunkAllocator::init`.
    pub unsafe fn init(&self, region: NonNull<u8>, len: usize) -> Result<(), InitError> {
        self.inner.lock().init(region, len)
    }

    /// `None` on an empty heap or on lock contention (a reentrant call, or
    /// another thread mid-operation) rather than blocking: the core has no
    /// suspension points, so the only way in is to fail the call rather than
    /// spin waiting for a caller that can't be running concurrently with
    /// itself on a single core.
    pub fn allocate(&self, requested: usize) -> Option<NonNull<u8>> {
        self.allocate_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.try_lock()?.allocate(requested)
    }

    /// No-op under lock contention, same reasoning as `allocate`.
    pub fn release(&self, ptr: Option<NonNull<u8>>) {
        self.release_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(mut guard) = self.inner.try_lock() {
            guard.release(ptr);
        }
    }

    pub fn allocate_call_count(&self) -> usize {
        self.allocate_calls.load(Ordering::Relaxed)
    }

    pub fn release_call_count(&self) -> usize {
        self.release_calls.load(Ordering::Relaxed)
    }

    /// Logs the current contents of both indices at `log::info!`. Skipped
    /// under lock contention rather than blocking, same as `allocate`.
    pub fn dump(&self) {
        if let Some(guard) = self.inner.try_lock() {
            crate::diagnostics::dump(&guard);
        }
    }
}

unsafe impl GlobalAlloc for Heap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // This allocator makes no alignment guarantee beyond `header_align`;
        // a request for anything stricter can't be serviced correctly, so
        // it's refused rather than silently under-aligned.
        if layout.align() > header_align() {
            return core::ptr::null_mut();
        }
        match self.allocate(layout.size()) {
            Some(p) => p.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.release(NonNull::new(ptr));
    }
}
