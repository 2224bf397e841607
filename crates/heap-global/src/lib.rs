//! Global-allocator adapter for the constant-time block heap.
//!
//! [`LockedHeap`] wraps one [`Heap`] instance in a spin mutex so it can serve
//! as the `#[global_allocator]` of a `no_std` binary. The wrapper is
//! constructible in a `static` and fed its arena later, during boot:
//!
//! ```rust,ignore
//! use heap_global::LockedHeap;
//!
//! #[global_allocator]
//! static HEAP: LockedHeap = LockedHeap::new();
//!
//! fn boot(arena_base: *mut u8, arena_size: usize) {
//!     unsafe {
//!         HEAP.init(arena_base, arena_size).expect("heap arena rejected");
//!     }
//! }
//! ```
//!
//! The mutex provides the mutual exclusion here; the heap's own
//! critical-section hooks remain available for bare-metal users that drive a
//! [`Heap`] directly from interrupt context.
//!
//! Requests the core heap cannot express are refused with a null pointer:
//! zero-sized layouts, alignments above [`ALIGNMENT`], and any allocation
//! arriving before [`LockedHeap::init`].

#![cfg_attr(not(test), no_std)]

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use heap::{ALIGNMENT, Diagnostics, Heap};
use snafu::{Location, ResultExt as _, Snafu, ensure};
use spin::mutex::SpinMutex;

/// Errors that can occur while attaching an arena to a [`LockedHeap`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum InitError {
    /// The arena was rejected by the core heap.
    #[snafu(display("heap arena rejected: {source}"))]
    Arena {
        #[snafu(source)]
        source: heap::InitError,
        #[snafu(implicit)]
        location: Location,
    },
    /// The heap already holds an arena.
    #[snafu(display("heap is already initialized"))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug)]
struct Handle(NonNull<Heap>);

// SAFETY: the handle owns its arena exclusively and is only ever reached
// through the surrounding mutex, which serializes all access.
unsafe impl Send for Handle {}

/// A mutex-guarded heap instance implementing [`GlobalAlloc`].
#[derive(Debug)]
pub struct LockedHeap {
    inner: SpinMutex<Option<Handle>>,
}

impl LockedHeap {
    /// Creates an empty wrapper. Every allocation fails until
    /// [`init`](Self::init) attaches an arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(None),
        }
    }

    /// Attaches an arena, carving the heap instance out of its head.
    ///
    /// # Errors
    ///
    /// [`InitError::AlreadyInitialized`] when an arena is already attached;
    /// [`InitError::Arena`] when the core heap rejects the region.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::init`]: the region `base..base + size` must
    /// be valid, exclusive, and live for the rest of the program.
    pub unsafe fn init(&self, base: *mut u8, size: usize) -> Result<(), InitError> {
        let mut inner = self.inner.lock();
        ensure!(inner.is_none(), AlreadyInitializedSnafu);
        let handle = unsafe { Heap::init(base, size) }.context(ArenaSnafu)?;
        *inner = Some(Handle(handle));
        Ok(())
    }

    /// Snapshot of the heap diagnostics, or `None` before init.
    #[must_use]
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        let inner = self.inner.lock();
        inner
            .as_ref()
            .map(|handle| unsafe { handle.0.as_ref() }.diagnostics())
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 || layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(handle) => unsafe { handle.0.as_mut() }
                .allocate(layout.size())
                .unwrap_or(ptr::null_mut()),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.as_mut() {
            unsafe {
                handle.0.as_mut().deallocate(ptr);
            }
        }
    }
}
