//! The error taxonomy: one in-band failure (`OutOfMemory`, signalled by
//! `allocate` returning `None`) and three diagnostic-only classes that are
//! surfaced through `log` rather than changing a caller's control flow.

use core::fmt;

/// Region registration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `len < 2 * header_size() + 1`: too small to hold a sentinel and a
    /// single free chunk with at least one payload byte.
    RegionTooSmall,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::RegionTooSmall => write!(f, "region too small to hold a sentinel and a free chunk"),
        }
    }
}

/// A diagnostic-only event detected while servicing `release`. None of
/// these abort the caller's operation; they are reported through `log` (or,
/// if `HeapConfig::escalate_corruption` is set, escalated to a panic) and
/// the allocator does its best to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// `release` was given a pointer whose recovered header either doesn't
    /// carry the magic tag, or is already marked free (a double release).
    /// The release is refused; no state is mutated.
    BadPointer,
    /// While coalescing, a neighboring header's magic tag was wrong. That
    /// one coalesce is skipped, but `release` otherwise proceeds.
    CorruptNeighbor,
    /// A `remove` call couldn't find the identity it was given. The
    /// allocator continues, but its state may now be degraded.
    IndexInconsistency,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::BadPointer => write!(f, "release() called with a pointer to a chunk that is corrupt or already free"),
            Diagnostic::CorruptNeighbor => write!(f, "neighboring chunk header failed its magic check during coalescing"),
            Diagnostic::IndexInconsistency => write!(f, "index remove() could not locate the requested chunk identity"),
        }
    }
}

impl Diagnostic {
    /// Logs this event at the severity appropriate to its class, or panics
    /// if `escalate` is set.
    pub(crate) fn report(self, escalate: bool) {
        if escalate {
            panic!("{self}");
        }
        match self {
            Diagnostic::BadPointer => log::warn!("{self}"),
            Diagnostic::CorruptNeighbor | Diagnostic::IndexInconsistency => log::error!("{self}"),
        }
    }
}
