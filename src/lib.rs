//! A `malloc`/`free` style heap allocator over caller-supplied byte regions.
//!
//! The hard part lives in [`size_index`] and [`addr_index`]: a pair of
//! cooperating ordered indices over free chunks, kept consistent with the
//! physical chunk chain embedded in each region on every allocate, free,
//! split, and coalesce. [`heap::ChunkAllocator`] ties the indices and the
//! chunk layout ([`chunk`]) together into the four core operations
//! (init/allocate/release/display); [`allocator::Heap`] is a thin,
//! `spin`-locked facade over it suitable for use as a `#[global_allocator]`.
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod addr_index;
pub mod allocator;
pub mod chunk;
pub mod diagnostics;
pub mod error;
pub mod heap;
pub mod size_index;

pub use allocator::Heap;
pub use chunk::MAGIC;
pub use error::{Diagnostic, InitError};
pub use heap::{ChunkAllocator, HeapConfig};
