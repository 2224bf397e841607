//! The per-block record overlaying every fragment of the arena.
//!
//! A block record lives in the first [`ALIGNMENT`] bytes of its block and
//! carries the physical chain links (address order, doubly linked), the total
//! block size, and the used flag. The segregated free-list links sit right
//! after the record, i.e. in the first payload bytes — they are meaningful
//! only while the block is free, and a used block's payload may overwrite
//! them at will.

use core::{mem, ptr};

use crate::{ALIGNMENT, FRAGMENT_SIZE_MAX, FRAGMENT_SIZE_MIN, bits};

/// One block of the arena.
///
/// Blocks are created by [`Heap::init`](crate::Heap::init) and by splitting,
/// and destroyed by coalescing; they never move. All link surgery goes
/// through the associated functions below, which operate on raw pointers —
/// blocks alias the arena and must never be held by reference across
/// allocator operations.
#[repr(C)]
#[derive(Debug)]
pub struct Block {
    /// Physical predecessor in address order, null for the first block.
    pub(crate) prev: *mut Block,
    /// Physical successor in address order, null for the last block.
    pub(crate) next: *mut Block,
    /// Total block size in bytes, record included. A positive multiple of
    /// [`FRAGMENT_SIZE_MIN`].
    pub(crate) size: usize,
    pub(crate) used: bool,
    /// Free-list successor. Valid only while `!used`.
    pub(crate) next_free: *mut Block,
    /// Free-list predecessor; null for a bin head. Valid only while `!used`.
    pub(crate) prev_free: *mut Block,
}

// The record proper must fill exactly one ALIGNMENT unit so the payload (and
// the free-list links of a free block) begin right behind it.
const _: () = assert!(mem::offset_of!(Block, next_free) == ALIGNMENT);
const _: () = assert!(align_of::<Block>() <= ALIGNMENT);
const _: () = assert!(size_of::<Block>() <= FRAGMENT_SIZE_MIN);

impl Block {
    /// Writes a fresh free block record at `ptr`, unlinked from everything.
    ///
    /// # Safety
    ///
    /// `ptr` must be [`ALIGNMENT`]-aligned and the region `ptr..ptr + size`
    /// must be valid, exclusively owned, and unused.
    pub(crate) unsafe fn claim(ptr: *mut u8, size: usize) -> *mut Self {
        assert!(!ptr.is_null());
        assert!(ptr.addr().is_multiple_of(ALIGNMENT));
        assert!(size >= FRAGMENT_SIZE_MIN);
        assert!(size <= FRAGMENT_SIZE_MAX);
        assert!(size.is_multiple_of(FRAGMENT_SIZE_MIN));

        let block = ptr.cast::<Self>();
        unsafe {
            block.write(Self {
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                size,
                used: false,
                next_free: ptr::null_mut(),
                prev_free: ptr::null_mut(),
            });
        }
        block
    }

    /// Shrinks `block` to `keep` bytes and returns the leftover tail as a
    /// fresh free block, spliced into the physical chain right after `block`.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid block of size at least
    /// `keep + FRAGMENT_SIZE_MIN`, and `keep` must be a positive multiple of
    /// [`FRAGMENT_SIZE_MIN`].
    pub(crate) unsafe fn split(block: *mut Self, keep: usize) -> *mut Self {
        unsafe {
            debug_assert!(!block.is_null());
            debug_assert!(keep >= FRAGMENT_SIZE_MIN);
            debug_assert!(keep.is_multiple_of(FRAGMENT_SIZE_MIN));
            debug_assert!((*block).size >= keep + FRAGMENT_SIZE_MIN);

            let leftover = (*block).size - keep;
            let tail = block.cast::<u8>().add(keep).cast::<Self>();
            tail.write(Self {
                prev: block,
                next: (*block).next,
                size: leftover,
                used: false,
                next_free: ptr::null_mut(),
                prev_free: ptr::null_mut(),
            });
            if !(*tail).next.is_null() {
                (*(*tail).next).prev = tail;
            }
            (*block).next = tail;
            (*block).size = keep;
            tail
        }
    }

    /// Merges the physical successor into `block`, destroying its record.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid block whose successor exists, is free,
    /// and is linked into no bin.
    pub(crate) unsafe fn absorb_next(block: *mut Self) {
        unsafe {
            let victim = (*block).next;
            debug_assert!(!victim.is_null());
            debug_assert!(!(*victim).used);
            debug_assert!(ptr::eq((*victim).prev, block));

            (*block).size += (*victim).size;
            (*block).next = (*victim).next;
            if !(*block).next.is_null() {
                (*(*block).next).prev = block;
            }
        }
    }

    /// Recovers the block record behind a payload pointer returned by
    /// [`Heap::allocate`](crate::Heap::allocate).
    ///
    /// # Safety
    ///
    /// `payload` must be a live payload pointer obtained from this arena.
    pub unsafe fn from_payload(payload: *mut u8) -> *mut Self {
        assert!(!payload.is_null());
        assert!(payload.addr() > ALIGNMENT);
        assert!(payload.addr().is_multiple_of(ALIGNMENT));
        unsafe { payload.sub(ALIGNMENT).cast() }
    }

    /// Payload address of `block`.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid block record.
    pub(crate) unsafe fn payload(block: *mut Self) -> *mut u8 {
        debug_assert!(!block.is_null());
        unsafe { block.cast::<u8>().add(ALIGNMENT) }
    }

    /// Total block size in bytes, record included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Physical successor, null at the end of the arena.
    #[must_use]
    pub fn next(&self) -> *mut Block {
        self.next
    }

    /// Physical predecessor, null for the first block.
    #[must_use]
    pub fn prev(&self) -> *mut Block {
        self.prev
    }

    /// Free-list successor. Meaningful only while the block is free.
    #[must_use]
    pub fn next_free(&self) -> *mut Block {
        self.next_free
    }

    /// Free-list predecessor. Meaningful only while the block is free.
    #[must_use]
    pub fn prev_free(&self) -> *mut Block {
        self.prev_free
    }

    /// Index of the size class this block belongs to:
    /// `floor(log2(size / FRAGMENT_SIZE_MIN))`.
    #[must_use]
    pub fn bin_index(&self) -> usize {
        debug_assert!(self.size >= FRAGMENT_SIZE_MIN);
        debug_assert!(self.size.is_multiple_of(FRAGMENT_SIZE_MIN));
        bits::log2_floor(self.size / FRAGMENT_SIZE_MIN)
    }
}
