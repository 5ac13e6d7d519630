//! The Address Index: an ordered index of free chunks (plus each region's
//! permanent sentinel) keyed by header address, used to find the physical
//! predecessor of a chunk being freed.

use core::ptr::NonNull;

use crate::chunk::{addr_key, is_allocated, ChunkHeader};
use crate::error::Diagnostic;

/// The Address Index. Like `SizeIndex`, owns no memory: every node lives
/// embedded in some region's chunk header.
#[derive(Default)]
pub(crate) struct AddrIndex {
    root: Option<NonNull<ChunkHeader>>,
}

impl AddrIndex {
    pub const fn new() -> Self {
        AddrIndex { root: None }
    }

    /// Returns the largest-addressed **free** chunk with an address
    /// strictly less than `key`, skipping over any sentinel encountered
    /// along the way; the result is always safe to coalesce with.
    pub unsafe fn find_predecessor(&self, key: usize) -> Option<NonNull<ChunkHeader>> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(c) = cur {
            let ck = addr_key(c);
            if ck < key {
                if !is_allocated(c) {
                    best = Some(c);
                }
                cur = (*c.as_ptr()).addr_node.right;
            } else {
                cur = (*c.as_ptr()).addr_node.left;
            }
        }
        best
    }

    /// Inserts `node`, whose address must not already be present.
    pub unsafe fn insert(&mut self, node: NonNull<ChunkHeader>) {
        (*node.as_ptr()).addr_node.left = None;
        (*node.as_ptr()).addr_node.right = None;

        let target_key = addr_key(node);

        let mut cur = self.root;
        let mut parent: Option<NonNull<ChunkHeader>> = None;
        let mut parent_is_left = false;
        while let Some(c) = cur {
            let ck = addr_key(c);
            debug_assert_ne!(ck, target_key, "address key must be unique");
            parent = Some(c);
            parent_is_left = target_key < ck;
            cur = if parent_is_left {
                (*c.as_ptr()).addr_node.left
            } else {
                (*c.as_ptr()).addr_node.right
            };
        }

        match parent {
            None => self.root = Some(node),
            Some(p) if parent_is_left => (*p.as_ptr()).addr_node.left = Some(node),
            Some(p) => (*p.as_ptr()).addr_node.right = Some(node),
        }
    }

    /// Removes `target` from the index. `target` must currently be present
    /// (free chunks only; sentinels are never removed).
    pub unsafe fn remove(&mut self, target: NonNull<ChunkHeader>, diag: &mut impl FnMut(Diagnostic)) {
        let target_key = addr_key(target);

        let mut parent: Option<NonNull<ChunkHeader>> = None;
        let mut parent_is_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            if c == target {
                break;
            }
            let ck = addr_key(c);
            parent = Some(c);
            parent_is_left = target_key < ck;
            cur = if parent_is_left {
                (*c.as_ptr()).addr_node.left
            } else {
                (*c.as_ptr()).addr_node.right
            };
        }

        if cur.is_none() {
            diag(Diagnostic::IndexInconsistency);
            return;
        }

        let left = (*target.as_ptr()).addr_node.left;
        let right = (*target.as_ptr()).addr_node.right;
        let replacement = match (left, right) {
            (None, r) => r,
            (Some(l), None) => Some(l),
            (Some(l), Some(r)) => {
                let mut rightmost = l;
                while let Some(rr) = (*rightmost.as_ptr()).addr_node.right {
                    rightmost = rr;
                }
                (*rightmost.as_ptr()).addr_node.right = Some(r);
                Some(l)
            }
        };

        match parent {
            None => self.root = replacement,
            Some(p) if parent_is_left => (*p.as_ptr()).addr_node.left = replacement,
            Some(p) => (*p.as_ptr()).addr_node.right = replacement,
        }
    }

    pub(crate) fn root(&self) -> Option<NonNull<ChunkHeader>> {
        self.root
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::alloc::{alloc, dealloc, Layout};
    use std::vec::Vec;

    use super::*;
    use crate::chunk::write_header;

    struct Region {
        ptr: *mut u8,
        layout: Layout,
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }

    fn make_chunk(
        regions: &mut Vec<Region>,
        payload: usize,
        allocated: bool,
    ) -> NonNull<ChunkHeader> {
        let total = crate::chunk::header_size() + payload;
        let layout = Layout::from_size_align(total, crate::chunk::header_align()).unwrap();
        let ptr = unsafe { alloc(layout) };
        assert!(!ptr.is_null());
        regions.push(Region { ptr, layout });
        unsafe { write_header(NonNull::new_unchecked(ptr), payload, allocated) }
    }

    fn noop_diag(_: Diagnostic) {}

    #[test]
    fn find_predecessor_skips_allocated_sentinels() {
        let mut regions = Vec::new();
        let mut chunks: Vec<NonNull<ChunkHeader>> = (0..5)
            .map(|_| make_chunk(&mut regions, 8, false))
            .collect();
        chunks.sort_by_key(|c| addr_key(*c));

        let mut index = AddrIndex::new();
        unsafe {
            for &c in &chunks {
                index.insert(c);
            }
            // Mark the middle entry allocated, as a sentinel would be.
            (*chunks[2].as_ptr()).allocated = true;

            let pred = index.find_predecessor(addr_key(chunks[3]));
            assert_eq!(pred, Some(chunks[1]));

            let pred_of_last = index.find_predecessor(addr_key(chunks[4]));
            assert_eq!(pred_of_last, Some(chunks[3]));
        }
    }

    #[test]
    fn insert_remove_round_trip() {
        let mut regions = Vec::new();
        let mut chunks: Vec<NonNull<ChunkHeader>> = (0..7)
            .map(|_| make_chunk(&mut regions, 8, false))
            .collect();
        chunks.sort_by_key(|c| addr_key(*c));

        let mut index = AddrIndex::new();
        let mut diag = noop_diag;
        unsafe {
            for &c in &chunks {
                index.insert(c);
            }
            // Remove from the middle outward so both one- and two-child
            // splice cases get exercised.
            let removal_order = [3, 1, 5, 0, 2, 4, 6];
            for &i in &removal_order {
                let target = chunks[i];
                index.remove(target, &mut diag);
                // The removed chunk must no longer be reachable as anyone's
                // predecessor.
                assert_ne!(index.find_predecessor(usize::MAX), Some(target));
            }
            assert_eq!(index.root(), None);
        }
    }
}
