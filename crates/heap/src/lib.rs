//! Constant-time block heap for hard-real-time systems.
//!
//! This crate implements a block allocator that services every request in
//! O(1) worst-case time. It manages a single contiguous arena supplied by the
//! caller; the instance record lives at the head of the arena and the rest is
//! carved into blocks linked both in address order and into segregated
//! free lists, one list per power-of-two size class.
//!
//! # Algorithm
//!
//! - **Segregated free lists**: free blocks of size `[FRAGMENT_SIZE_MIN << i,
//!   FRAGMENT_SIZE_MIN << (i + 1))` live in bin `i`. A bitmask mirrors which
//!   bins are nonempty, so "smallest nonempty bin that fits" is one masked
//!   `trailing_zeros` away.
//! - **Allocation**: round the request up to a valid block size, pop the head
//!   of the chosen bin, split the tail off when the leftover can stand on its
//!   own, and hand out the payload.
//! - **Deallocation**: merge the freed block with whichever physical
//!   neighbors are free (each unlinked from its bin in constant time), then
//!   push the result onto its class bin.
//!
//! # Memory layout
//!
//! ```text
//! arena base ─► ┌────────────────────┐  ALIGNMENT-aligned
//!               │ Heap instance      │  bins, mask, hooks, diagnostics
//!               ├────────────────────┤  padded to ALIGNMENT
//!               │ Block #0           │  record: chain links, size, used
//!               │   payload…         │  free blocks keep their free-list
//!               ├────────────────────┤  links in the first payload bytes
//!               │ Block #1           │
//!               │   …                │
//!               └────────────────────┘
//! ```
//!
//! Every block starts on an [`ALIGNMENT`] boundary; its record occupies the
//! first [`ALIGNMENT`] bytes and the payload begins right after. The smallest
//! block ([`FRAGMENT_SIZE_MIN`]) therefore carries [`ALIGNMENT`] payload
//! bytes.
//!
//! # Usage
//!
//! ```
//! use heap::Heap;
//!
//! let mut arena = vec![0_u8; 4096 + heap::ALIGNMENT];
//! // Feed the allocator an aligned region.
//! let offset = arena.as_ptr().align_offset(heap::ALIGNMENT);
//! let base = unsafe { arena.as_mut_ptr().add(offset) };
//!
//! let mut handle = unsafe { Heap::init(base, 4096) }.unwrap();
//! let heap = unsafe { handle.as_mut() };
//!
//! let ptr = heap.allocate(100).unwrap();
//! assert_eq!(ptr.addr() % heap::ALIGNMENT, 0);
//! unsafe {
//!     heap.deallocate(ptr);
//! }
//! assert_eq!(heap.diagnostics().allocated, 0);
//! ```
//!
//! # Concurrency
//!
//! The heap is a passive data structure: it never blocks, spins, or yields.
//! Concurrent use goes through the caller-supplied critical-section hook pair
//! ([`Heap::set_critical_section`]) — interrupt masking on bare metal, a
//! mutex elsewhere. With no hooks configured the caller is responsible for
//! exclusive access.
//!
//! # Performance characteristics
//!
//! | Operation | Time | Notes |
//! |-----------|------|-------|
//! | `allocate` | O(1) | one bit scan, one unlink, at most one split |
//! | `deallocate` | O(1) | at most two neighbor merges |
//! | `diagnostics` | O(1) | by-value copy |
//! | `do_invariants_hold` | O(blocks) | diagnostic audit, not a hot path |

#![cfg_attr(not(test), no_std)]

mod bits;
mod block;
mod diagnostics;
mod error;
mod instance;

pub use self::{
    block::Block,
    diagnostics::Diagnostics,
    error::InitError,
    instance::Heap,
};

/// Alignment of the arena, of every block record, and of every payload
/// pointer returned by [`Heap::allocate`].
///
/// Sized so one block record fits exactly; this is asserted at compile time.
pub const ALIGNMENT: usize = size_of::<*mut ()>() * 4;

/// Smallest possible block: one record plus [`ALIGNMENT`] payload bytes.
/// Every block size is a positive multiple of this.
pub const FRAGMENT_SIZE_MIN: usize = ALIGNMENT * 2;

/// Largest possible block: the largest power of two a machine word can hold.
/// Arena capacity is clipped here, which keeps the top size class finite.
pub const FRAGMENT_SIZE_MAX: usize = (usize::MAX >> 1) + 1;

/// Number of segregated bins, one per power-of-two size class.
pub const BIN_COUNT: usize = usize::BITS as usize;

const _: () = assert!(bits::is_power_of_two(ALIGNMENT));
const _: () = assert!(bits::is_power_of_two(FRAGMENT_SIZE_MIN));
const _: () = assert!(bits::is_power_of_two(FRAGMENT_SIZE_MAX));
