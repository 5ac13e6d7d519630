//! `ChunkAllocator`: the four core operations (init, allocate, release,
//! display) tying the chunk layout and the two indices together.

use core::ptr::NonNull;

use crate::addr_index::AddrIndex;
use crate::chunk::{
    addr_key, header_from_payload, header_size, is_allocated, magic_of, payload_ptr,
    physical_successor, size_of_chunk, write_header, MAGIC,
};
use crate::error::{Diagnostic, InitError};
use crate::size_index::SizeIndex;

/// Lets a deployment turn diagnostic-only events (see `error::Diagnostic`)
/// into a hard panic instead of a logged, best-effort recovery. Default is
/// `false`: log and keep going, the behavior every invariant documented on
/// `ChunkAllocator`'s operations assumes.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    pub escalate_corruption: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            escalate_corruption: false,
        }
    }
}

/// The free-chunk index core: two ordered indices over the chunks of every
/// region registered with `init`. Single-threaded; see `allocator::Heap`
/// for a lock-guarded facade suitable for sharing across call sites.
pub struct ChunkAllocator {
    size_index: SizeIndex,
    addr_index: AddrIndex,
    config: HeapConfig,
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl ChunkAllocator {
    pub const fn new(config: HeapConfig) -> Self {
        ChunkAllocator {
            size_index: SizeIndex::new(),
            addr_index: AddrIndex::new(),
            config,
        }
    }

    fn report(&self, diag: Diagnostic) {
        diag.report(self.config.escalate_corruption);
    }

    /// Registers `len` bytes starting at `region` for management: plants a
    /// sentinel at the tail and publishes the remainder as one free chunk.
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes of `len` bytes, suitably
    /// aligned for `ChunkHeader`, and must not overlap any region
    /// previously passed to `init` on this (or any other) `ChunkAllocator`
    /// sharing its indices. Violating this is undefined behavior.
    pub unsafe fn init(&mut self, region: NonNull<u8>, len: usize) -> Result<(), InitError> {
        let hs = header_size();
        let min_len = hs
            .checked_mul(2)
            .and_then(|twice| twice.checked_add(1))
            .ok_or(InitError::RegionTooSmall)?;
        if len < min_len {
            return Err(InitError::RegionTooSmall);
        }

        let sentinel_addr = NonNull::new_unchecked(region.as_ptr().add(len - hs));
        let sentinel = write_header(sentinel_addr, 0, true);
        // Sentinel goes in the Address Index only; `find_best_fit` must
        // never be able to return it, and `find_predecessor` skips it
        // outright so coalescing never has to special-case it.
        self.addr_index.insert(sentinel);

        let first_payload = len - 2 * hs;
        let first = write_header(region, first_payload, true);
        self.free_raw(payload_ptr(first));

        Ok(())
    }

    /// Returns a pointer to `requested` writable bytes from some registered
    /// region, or `None` if no free chunk is large enough. A zero-size
    /// request is also rejected with `None` rather than silently bumped to
    /// a 1-byte allocation: it conveys no allocation intent, and `None` is
    /// simpler for callers to reason about than a pointer that must never
    /// be dereferenced.
    pub fn allocate(&mut self, requested: usize) -> Option<NonNull<u8>> {
        if requested == 0 {
            return None;
        }
        let hs = header_size();
        let total = hs.checked_add(requested)?;

        // SAFETY: every chunk reachable from either index was written by
        // `write_header` and is still alive in its region.
        let found = unsafe { self.size_index.find_best_fit(total)? };
        unsafe {
            self.size_index.remove(found, &mut |d| self.report(d));
            self.addr_index.remove(found, &mut |d| self.report(d));
        }

        let found_size = unsafe { size_of_chunk(found) };
        // `find_best_fit` only returns chunks with payload size >= total,
        // so this can never underflow.
        let extra = found_size - requested;
        debug_assert!(extra >= hs);

        // Only a split shrinks the returned chunk's recorded size to
        // `requested`: its header's `size` field doubles as the physical
        // distance to the next chunk, so on an exact-total match (`extra ==
        // hs`, no tail carved) it must keep tracking the full original
        // span: otherwise `physical_successor` would land inside what is
        // now unaccounted, headerless memory.
        let final_size = if extra > hs {
            let tail_payload = extra - hs;
            unsafe {
                let tail_header_ptr = NonNull::new_unchecked(
                    found.as_ptr().cast::<u8>().add(hs + requested),
                );
                let tail = write_header(tail_header_ptr, tail_payload, true);
                self.free_raw(payload_ptr(tail));
            }
            requested
        } else {
            found_size
        };

        unsafe {
            let header_ptr = found.cast::<u8>();
            write_header(header_ptr, final_size, true);
        }

        Some(payload_ptr(found))
    }

    /// Releases a pointer previously returned by `allocate`. `None` is a
    /// no-op. A pointer whose recovered header lacks the magic tag, or
    /// whose chunk is already free (a repeat release), is rejected
    /// (reported as `Diagnostic::BadPointer`) without mutating any state.
    pub fn release(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        unsafe { self.free_raw(ptr) };
    }

    /// The internal free path shared by `release`, by the carved tail in
    /// `allocate`, and by `init`'s initial publish.
    ///
    /// # Safety
    ///
    /// `payload` must be a payload pointer recovered from a header written
    /// by `write_header` in a region still managed by this allocator.
    unsafe fn free_raw(&mut self, payload: NonNull<u8>) {
        let header_ptr = header_from_payload(payload);
        if magic_of(header_ptr) != MAGIC {
            self.report(Diagnostic::BadPointer);
            return;
        }
        // A chunk that's already free can't be the target of a fresh
        // release: either it was never allocated, or this is a repeat
        // release of a pointer whose chunk (still holding a valid magic
        // tag) was already published back into both indices. Catching
        // this here is what makes a double `release` of the same pointer
        // rejected rather than silently corrupting both trees.
        if !is_allocated(header_ptr) {
            self.report(Diagnostic::BadPointer);
            return;
        }

        let mut this = header_ptr;

        // Step: forward-coalesce with the physical successor.
        let succ = physical_successor(this);
        if magic_of(succ) != MAGIC {
            self.report(Diagnostic::CorruptNeighbor);
        } else if !is_allocated(succ) {
            self.size_index.remove(succ, &mut |d| self.report(d));
            self.addr_index.remove(succ, &mut |d| self.report(d));
            (*this.as_ptr()).size += header_size() + size_of_chunk(succ);
        }

        // Step: backward-coalesce with the free address-predecessor, if
        // one is physically adjacent.
        if let Some(pred) = self.addr_index.find_predecessor(addr_key(this)) {
            let pred_succ = physical_successor(pred);
            if pred_succ == this {
                self.size_index.remove(pred, &mut |d| self.report(d));
                self.addr_index.remove(pred, &mut |d| self.report(d));
                (*pred.as_ptr()).size += header_size() + size_of_chunk(this);
                this = pred;
            }
        }

        // Step: publish.
        (*this.as_ptr()).allocated = false;
        self.size_index.insert(this);
        self.addr_index.insert(this);
    }

    pub(crate) fn size_index(&self) -> &SizeIndex {
        &self.size_index
    }

    pub(crate) fn addr_index(&self) -> &AddrIndex {
        &self.addr_index
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::alloc::{alloc, dealloc, Layout};

    use super::*;
    use crate::chunk::header_align;

    struct Region {
        ptr: NonNull<u8>,
        layout: Layout,
    }

    impl Region {
        fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, header_align()).unwrap();
            let ptr = unsafe { alloc(layout) };
            assert!(!ptr.is_null());
            Region {
                ptr: NonNull::new(ptr).unwrap(),
                layout,
            }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }

    #[test]
    fn init_too_small_is_rejected() {
        let mut heap = ChunkAllocator::default();
        let region = Region::new(8);
        let err = unsafe { heap.init(region.ptr, 8) }.unwrap_err();
        assert_eq!(err, InitError::RegionTooSmall);
    }

    #[test]
    fn allocate_zero_is_rejected() {
        let mut heap = ChunkAllocator::default();
        let region = Region::new(4096);
        unsafe { heap.init(region.ptr, 4096) }.unwrap();
        assert!(heap.allocate(0).is_none());
    }

    #[test]
    fn split_then_best_fit_adjacent_allocation() {
        let mut heap = ChunkAllocator::default();
        let region = Region::new(4000);
        unsafe { heap.init(region.ptr, 4000) }.unwrap();

        let p1 = heap.allocate(50).unwrap();
        let p2 = heap.allocate(50).unwrap();

        let hs = header_size();
        assert_eq!(p2.as_ptr() as usize, p1.as_ptr() as usize + hs + 50);
    }

    #[test]
    fn forward_then_backward_coalesce_restores_single_chunk() {
        let mut heap = ChunkAllocator::default();
        let region = Region::new(4000);
        unsafe { heap.init(region.ptr, 4000) }.unwrap();

        let p1 = heap.allocate(50).unwrap();
        let p2 = heap.allocate(50).unwrap();

        heap.release(Some(p1));
        heap.release(Some(p2));

        // After releasing both, the region should be back to a single free
        // chunk: the same size that was available right after init.
        let all = heap.allocate(3000).unwrap();
        heap.release(Some(all));
    }

    #[test]
    fn double_release_is_rejected_as_bad_pointer() {
        let mut heap = ChunkAllocator::default();
        let region = Region::new(4096);
        unsafe { heap.init(region.ptr, 4096) }.unwrap();

        let p = heap.allocate(64).unwrap();
        heap.release(Some(p));
        // Second release targets a header that's now either absorbed into
        // a neighbor or re-tagged; either way it must not silently succeed
        // again. We can't always detect this from the outside without a
        // log subscriber, but it must not panic or corrupt state: a
        // subsequent allocate of the whole region must still succeed.
        heap.release(Some(p));
        let big = heap.allocate(4096 - 4 * header_size());
        assert!(big.is_some());
    }

    #[test]
    fn exact_out_of_memory_boundary() {
        let hs = header_size();
        let mut heap = ChunkAllocator::default();
        let len = 3 * hs + 10;
        let region = Region::new(len);
        unsafe { heap.init(region.ptr, len) }.unwrap();

        assert!(heap.allocate(10).is_some());
        assert!(heap.allocate(1).is_none());
    }

    #[test]
    fn release_null_is_noop() {
        let mut heap = ChunkAllocator::default();
        heap.release(None);
    }
}
