//! # mmal
//!
//! A best-fit heap allocator on top of anonymous memory mappings.
//!
//! Memory is requested from the kernel in arenas, multiples of
//! [`PAGE_UNIT`] (128 KiB). Each arena is cut into blocks, every block is
//! prefixed by a [`Header`] and every header of every arena is linked into a
//! single cyclic list:
//!
//! ```text
//!   first arena
//!   v
//!   +-----+------+----+------+----+------+--------------+
//!   |Arena|Header|XXXX|Header|XXXX|Header|..............|
//!   +-----+------+----+------+----+------+--------------+
//!      \ next
//!       v
//!       +-----+------+---------------------------+------+-----+
//!       |Arena|Header|XXXXXXXXXXXXXXXXXXXXXXXXXXX|Header|.....|
//!       +-----+------+---------------------------+------+-----+
//! ```
//!
//! - [`allocate`] picks the smallest free block that fits, splitting off the
//!   unused tail, and maps a new arena when nothing fits.
//! - [`free`] marks the block free and merges it with its free neighbours.
//! - [`reallocate`] resizes in place when the block is big enough, otherwise
//!   frees and allocates again, carrying the data over.
//!
//! Arenas are never returned to the kernel while the heap lives.
//!
//! ## Quick start
//!
//! ```rust
//! let ptr = mmal::allocate(42).unwrap();
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 42);
//!     let ptr = mmal::reallocate(ptr, 1024).unwrap();
//!     assert_eq!(ptr.as_ptr().read(), 0xAB);
//!     mmal::free(ptr);
//! }
//! ```
//!
//! Independent heaps can be created with [`Heap::new`]; the free functions
//! above work on a single process-wide heap.
//!
//! ## Threads
//!
//! The heap itself is single threaded. The process-wide heap sits behind a
//! spin lock so the free functions and [`MmAlloc`] may be called from any
//! thread, one call at a time.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade. When [`MmAlloc`] is installed
//! as the global allocator, the installed logger must not allocate, or it
//! will re-enter the heap while it is locked.

use std::{
    alloc::{GlobalAlloc, Layout},
    cmp,
    ptr::{self, NonNull},
};

use spin::Mutex;

pub mod arena;
pub mod block;
pub mod error;
mod freelist;
pub mod heap;
pub mod inspect;
pub mod kernel;
pub mod utils;

pub use arena::{Arena, PAGE_UNIT};
pub use block::{Header, MIN_BLOCK_SIZE};
pub use error::{AllocError, InvariantViolation};
pub use heap::Heap;
pub use inspect::{HeapSnapshot, HeapStats};
pub use kernel::{PlatformMemory, SystemMemory};

use utils::WORD_SIZE;

/// The process-wide heap.
struct GlobalHeap(Heap<SystemMemory>);

// The heap only holds pointers into mappings it owns, and the lock below
// serializes every access to it.
unsafe impl Send for GlobalHeap {}

static HEAP: Mutex<GlobalHeap> = Mutex::new(GlobalHeap(Heap::new()));

/// Allocates `size` bytes on the process-wide heap.
///
/// Returns `None` for `size == 0` or when the kernel refuses more memory.
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    HEAP.lock().0.allocate(size)
}

/// Frees a block of the process-wide heap.
///
/// # Safety
///
/// `ptr` must come from [`allocate`] or [`reallocate`] and must not have
/// been freed already.
pub unsafe fn free(ptr: NonNull<u8>) {
    unsafe { HEAP.lock().0.free(ptr) }
}

/// Resizes a block of the process-wide heap. See [`Heap::reallocate`]; on
/// failure the original block has already been freed.
///
/// # Safety
///
/// Same as [`free`].
pub unsafe fn reallocate(ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    unsafe { HEAP.lock().0.reallocate(ptr, size) }
}

/// Runs `f` with read access to the process-wide heap, for inspection.
///
/// `f` must not call [`allocate`], [`free`] or [`reallocate`], nor allocate
/// through [`MmAlloc`], as the heap stays locked while it runs.
pub fn with_global_heap<R>(f: impl FnOnce(&Heap) -> R) -> R {
    f(&HEAP.lock().0)
}

/// [`GlobalAlloc`] adapter over the process-wide heap.
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: mmal::MmAlloc = mmal::MmAlloc::new();
/// ```
///
/// Payloads are aligned to the machine word only: layouts asking for more
/// get a null pointer.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmAlloc;

impl MmAlloc {
    pub const fn new() -> Self {
        Self
    }
}

unsafe impl GlobalAlloc for MmAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }

        allocate(layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { free(ptr) }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };

        let mut heap = HEAP.lock();
        let heap = &mut heap.0;

        unsafe {
            if heap.capacity_of(old) >= new_size {
                return heap.reallocate(old, new_size).map_or(ptr::null_mut(), NonNull::as_ptr);
            }

            // The old block must survive a failed grow, so copy before freeing.
            let Some(new) = heap.allocate(new_size) else {
                return ptr::null_mut();
            };
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), cmp::min(layout.size(), new_size));
            heap.free(old);

            new.as_ptr()
        }
    }
}
