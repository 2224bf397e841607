//! The heap instance record and the public operations.

use core::{ptr, ptr::NonNull};

use snafu::ensure;

use crate::{
    ALIGNMENT, BIN_COUNT, FRAGMENT_SIZE_MAX, FRAGMENT_SIZE_MIN, bits,
    block::Block,
    diagnostics::Diagnostics,
    error::{ArenaTooSmallSnafu, InitError, MisalignedBaseSnafu},
};

/// Caller-supplied critical-section hook pair.
///
/// `enter` runs before any bin or chain access, `leave` after the last
/// mutation, exactly once each per public operation. The hooks must not
/// recurse into the allocator.
#[derive(Debug, Clone, Copy)]
struct CriticalSection {
    enter: fn(),
    leave: fn(),
}

/// Runs the `leave` hook when the operation ends, whichever path it takes.
struct SectionGuard(Option<fn()>);

impl Drop for SectionGuard {
    fn drop(&mut self) {
        if let Some(leave) = self.0 {
            leave();
        }
    }
}

/// A constant-time block heap over one caller-supplied arena.
///
/// The instance record lives at the head of the arena; the handle returned
/// by [`Heap::init`] points at the arena base. The allocator itself never
/// synchronizes — configure a critical-section hook pair or guarantee
/// exclusive access externally.
#[derive(Debug)]
pub struct Heap {
    /// Head of the free list for each power-of-two size class.
    bins: [*mut Block; BIN_COUNT],
    /// Bit `i` set iff `bins[i]` is nonempty.
    nonempty_bin_mask: usize,
    /// The block at the lowest address. Constant after init; blocks split
    /// and merge but the chain origin never moves.
    first: *mut Block,
    critical_section: Option<CriticalSection>,
    diagnostics: Diagnostics,
}

// SAFETY: the heap owns its arena exclusively; moving the handle between
// threads is sound as long as access itself is serialized (hooks or an
// external lock).
unsafe impl Send for Heap {}

impl Heap {
    /// Bytes the instance record consumes at the head of the arena.
    pub const INSTANCE_SIZE: usize = size_of::<Self>().next_multiple_of(ALIGNMENT);

    /// Carves a heap instance out of `base..base + size`.
    ///
    /// The instance record takes the first [`Self::INSTANCE_SIZE`] bytes;
    /// the rest becomes one free block whose size — the capacity — is the
    /// remainder rounded down to a multiple of [`FRAGMENT_SIZE_MIN`] and
    /// clipped to [`FRAGMENT_SIZE_MAX`].
    ///
    /// On error the arena is left untouched.
    ///
    /// # Errors
    ///
    /// [`InitError::MisalignedBase`] when `base` is null or not
    /// [`ALIGNMENT`]-aligned; [`InitError::ArenaTooSmall`] when no capacity
    /// of at least [`FRAGMENT_SIZE_MIN`] bytes can be carved out.
    ///
    /// # Safety
    ///
    /// The region `base..base + size` must be valid for reads and writes,
    /// must outlive the instance, and must not be accessed except through
    /// the returned handle.
    pub unsafe fn init(base: *mut u8, size: usize) -> Result<NonNull<Heap>, InitError> {
        ensure!(
            !base.is_null() && base.addr().is_multiple_of(ALIGNMENT),
            MisalignedBaseSnafu { addr: base.addr() }
        );
        ensure!(
            size >= Self::INSTANCE_SIZE + FRAGMENT_SIZE_MIN,
            ArenaTooSmallSnafu { size }
        );

        let mut capacity = size - Self::INSTANCE_SIZE;
        if capacity > FRAGMENT_SIZE_MAX {
            capacity = FRAGMENT_SIZE_MAX;
        }
        capacity -= capacity % FRAGMENT_SIZE_MIN;
        debug_assert!(capacity >= FRAGMENT_SIZE_MIN);

        let heap = base.cast::<Heap>();
        unsafe {
            let root = Block::claim(base.add(Self::INSTANCE_SIZE), capacity);
            heap.write(Heap {
                bins: [ptr::null_mut(); BIN_COUNT],
                nonempty_bin_mask: 0,
                first: root,
                critical_section: None,
                diagnostics: Diagnostics {
                    capacity,
                    ..Diagnostics::default()
                },
            });
            (*heap).push_free(root);
            Ok(NonNull::new_unchecked(heap))
        }
    }

    /// Allocates `amount` payload bytes.
    ///
    /// Returns an [`ALIGNMENT`]-aligned payload pointer, or `None` when
    /// `amount` is zero or no sufficiently large contiguous block exists.
    /// A refused nonzero request bumps `oom_count`; a zero request changes
    /// nothing.
    ///
    /// Runs in O(1): the smallest nonempty bin whose class can satisfy the
    /// request is found with one masked bit scan, and at most one split
    /// follows.
    pub fn allocate(&mut self, amount: usize) -> Option<*mut u8> {
        let _section = self.enter();
        if amount == 0 {
            return None;
        }
        self.diagnostics.peak_request_size = self.diagnostics.peak_request_size.max(amount);

        // Requested payload plus one record, rounded up to a valid block
        // size. Oversized requests bail before the arithmetic can overflow.
        if amount > FRAGMENT_SIZE_MAX - ALIGNMENT {
            self.diagnostics.oom_count += 1;
            return None;
        }
        let need = (amount + ALIGNMENT).next_multiple_of(FRAGMENT_SIZE_MIN);

        // Smallest class whose minimum block size covers `need`, then the
        // lowest nonempty bin at or above it.
        let class = bits::log2_ceil(need / FRAGMENT_SIZE_MIN);
        let candidates = self.nonempty_bin_mask & (usize::MAX << class);
        if candidates == 0 {
            self.diagnostics.oom_count += 1;
            return None;
        }
        let block = self.bins[candidates.trailing_zeros() as usize];
        debug_assert!(!block.is_null());

        unsafe {
            self.unlink_free(block);
            if (*block).size - need >= FRAGMENT_SIZE_MIN {
                let tail = Block::split(block, need);
                self.push_free(tail);
            }
            (*block).used = true;
            (*block).next_free = ptr::null_mut();
            (*block).prev_free = ptr::null_mut();

            self.diagnostics.allocated += (*block).size;
            self.diagnostics.peak_allocated = self
                .diagnostics
                .peak_allocated
                .max(self.diagnostics.allocated);
            Some(Block::payload(block))
        }
    }

    /// Returns a block to the heap. A null `ptr` is a no-op.
    ///
    /// The freed block is merged with whichever physical neighbors are free
    /// (each unlinked from its bin in O(1)) and the result is pushed onto
    /// its class bin.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from [`Self::allocate`] on
    /// this instance and not freed since. The payload must no longer be
    /// accessed.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let block = unsafe { Block::from_payload(ptr) };
        let _section = self.enter();
        unsafe {
            debug_assert!((*block).used);
            debug_assert!((*block).size >= FRAGMENT_SIZE_MIN);
            debug_assert!((*block).size.is_multiple_of(FRAGMENT_SIZE_MIN));
            debug_assert!(self.diagnostics.allocated >= (*block).size);

            self.diagnostics.allocated -= (*block).size;

            let right = (*block).next;
            if !right.is_null() && !(*right).used {
                self.unlink_free(right);
                Block::absorb_next(block);
            }

            let mut merged = block;
            let left = (*block).prev;
            if !left.is_null() && !(*left).used {
                self.unlink_free(left);
                Block::absorb_next(left);
                merged = left;
            }

            (*merged).used = false;
            self.push_free(merged);
        }
    }

    /// Takes a by-value snapshot of the diagnostics record.
    ///
    /// Pure read; successive calls without intervening mutation return
    /// equal snapshots.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let _section = self.enter();
        self.diagnostics
    }

    /// Configures the critical-section hook pair wrapped around every
    /// public operation. The hooks must not recurse into the allocator.
    pub fn set_critical_section(&mut self, enter: fn(), leave: fn()) {
        self.critical_section = Some(CriticalSection { enter, leave });
    }

    /// Removes the hook pair; operations run unsynchronized afterwards.
    pub fn clear_critical_section(&mut self) {
        self.critical_section = None;
    }

    /// Audits the full structural state against the diagnostics shadow.
    ///
    /// Walks the physical chain and every bin, checking link reciprocity,
    /// size bounds, class placement, coalescing completeness (no two free
    /// neighbors), the bin mask, and that the block graph reconciles with
    /// `{capacity, allocated}`. Returns `false` on the first violation.
    ///
    /// Intended for tests and debug builds; the walk is linear in the
    /// number of blocks, not constant-time.
    #[must_use]
    pub fn do_invariants_hold(&self) -> bool {
        let _section = self.enter();
        let diag = self.diagnostics;

        if diag.capacity < FRAGMENT_SIZE_MIN
            || diag.capacity > FRAGMENT_SIZE_MAX
            || !diag.capacity.is_multiple_of(FRAGMENT_SIZE_MIN)
        {
            return false;
        }
        if diag.allocated > diag.capacity || !diag.allocated.is_multiple_of(FRAGMENT_SIZE_MIN) {
            return false;
        }
        if diag.peak_allocated < diag.allocated
            || diag.peak_allocated > diag.capacity
            || !diag.peak_allocated.is_multiple_of(FRAGMENT_SIZE_MIN)
        {
            return false;
        }
        if diag.peak_request_size > diag.capacity && diag.oom_count == 0 {
            return false;
        }

        let mut mask = 0_usize;
        for (index, head) in self.bins.iter().enumerate() {
            if !head.is_null() {
                mask |= bits::pow2(index);
            }
        }
        if mask != self.nonempty_bin_mask {
            return false;
        }

        // Corrupt links could cycle; every walk is capped at the largest
        // block population the capacity admits.
        let max_blocks = diag.capacity / FRAGMENT_SIZE_MIN;

        let mut total_size = 0_usize;
        let mut total_allocated = 0_usize;
        let mut visited = 0_usize;
        let mut block = self.first;
        if block.is_null() || unsafe { !(*block).prev.is_null() } {
            return false;
        }
        while !block.is_null() {
            visited += 1;
            if visited > max_blocks {
                return false;
            }
            unsafe {
                let size = (*block).size;
                if size < FRAGMENT_SIZE_MIN
                    || size > diag.capacity
                    || !size.is_multiple_of(FRAGMENT_SIZE_MIN)
                {
                    return false;
                }
                total_size += size;
                if (*block).used {
                    total_allocated += size;
                } else if self.nonempty_bin_mask & bits::pow2((*block).bin_index()) == 0 {
                    return false;
                }

                let next = (*block).next;
                if !next.is_null() {
                    if next.addr() <= block.addr()
                        || !(next.addr() - block.addr()).is_multiple_of(FRAGMENT_SIZE_MIN)
                        || !ptr::eq((*next).prev, block)
                    {
                        return false;
                    }
                    // Adjacent free blocks mean a missed coalesce.
                    if !(*block).used && !(*next).used {
                        return false;
                    }
                }
                block = next;
            }
        }
        if total_size != diag.capacity || total_allocated != diag.allocated {
            return false;
        }

        let mut total_free = 0_usize;
        for (index, head) in self.bins.iter().enumerate() {
            let mut block = *head;
            if block.is_null() {
                continue;
            }
            unsafe {
                if !(*block).prev_free.is_null() {
                    return false;
                }
            }
            let mut visited = 0_usize;
            while !block.is_null() {
                visited += 1;
                if visited > max_blocks {
                    return false;
                }
                unsafe {
                    if (*block).used || (*block).bin_index() != index {
                        return false;
                    }
                    total_free += (*block).size;
                    let next = (*block).next_free;
                    if !next.is_null() && !ptr::eq((*next).prev_free, block) {
                        return false;
                    }
                    block = next;
                }
            }
        }
        total_free == diag.capacity - diag.allocated
    }

    /// The block at the lowest arena address.
    #[must_use]
    pub fn first_block(&self) -> *mut Block {
        self.first
    }

    /// Head of the free list of size class `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index >= BIN_COUNT`.
    #[must_use]
    pub fn bin_head(&self, index: usize) -> *mut Block {
        assert!(index < BIN_COUNT);
        self.bins[index]
    }

    /// Bitmask of nonempty bins: bit `i` set iff `bin_head(i)` is non-null.
    #[must_use]
    pub fn nonempty_bin_mask(&self) -> usize {
        self.nonempty_bin_mask
    }

    fn enter(&self) -> SectionGuard {
        match self.critical_section {
            Some(section) => {
                (section.enter)();
                SectionGuard(Some(section.leave))
            }
            None => SectionGuard(None),
        }
    }

    /// Pushes a free block onto the head of its class bin.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid free block of this arena that is
    /// linked into no bin.
    unsafe fn push_free(&mut self, block: *mut Block) {
        unsafe {
            debug_assert!(!block.is_null());
            debug_assert!(!(*block).used);

            let class = (*block).bin_index();
            let head = self.bins[class];
            (*block).next_free = head;
            (*block).prev_free = ptr::null_mut();
            if !head.is_null() {
                (*head).prev_free = block;
            }
            self.bins[class] = block;
            self.nonempty_bin_mask |= bits::pow2(class);
        }
    }

    /// Unlinks a free block from its class bin, wherever it sits in the
    /// list, clearing the mask bit when the bin empties.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid free block currently linked into the
    /// bin matching its class.
    unsafe fn unlink_free(&mut self, block: *mut Block) {
        unsafe {
            debug_assert!(!block.is_null());
            debug_assert!(!(*block).used);

            let class = (*block).bin_index();
            let next = (*block).next_free;
            let prev = (*block).prev_free;
            if !next.is_null() {
                (*next).prev_free = prev;
            }
            if prev.is_null() {
                debug_assert!(ptr::eq(self.bins[class], block));
                self.bins[class] = next;
                if next.is_null() {
                    self.nonempty_bin_mask &= !bits::pow2(class);
                }
            } else {
                (*prev).next_free = next;
            }
        }
    }
}
