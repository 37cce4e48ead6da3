use std::{cmp, ptr::{self, NonNull}};

use crate::{
    arena::{ARENA_HEADER_SIZE, Arena, PAGE_UNIT, arena_alloc, arena_append, arena_release_all, first_header_of},
    block::{HEADER_SIZE, Header, MIN_BLOCK_SIZE, header_of, payload_of},
    error::AllocError,
    freelist::FreeList,
    kernel::{PlatformMemory, SystemMemory},
    utils::{WORD_SIZE, checked_align},
};

/// A best-fit heap built on arenas mapped from the kernel.
///
/// The only root is `first_arena`: from it we reach every arena through the
/// arena list and every block through the cyclic list of headers (see
/// [`FreeList`]). Nothing is mapped until the first allocation and arenas are
/// kept until the heap is dropped.
///
/// A `Heap` is single threaded. [`crate::allocate`] and friends serialize
/// access to a process-wide instance.
pub struct Heap<M: PlatformMemory = SystemMemory> {
    /// Head of the arena list, `None` before the first allocation.
    pub(crate) first_arena: Option<NonNull<Arena>>,
    /// Where arenas come from.
    memory: M,
}

impl Heap<SystemMemory> {
    /// A heap backed by anonymous mappings from the operating system.
    pub const fn new() -> Self {
        Self::with_memory(SystemMemory::new())
    }
}

impl Default for Heap<SystemMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PlatformMemory> Heap<M> {
    pub const fn with_memory(memory: M) -> Self {
        Self {
            first_arena: None,
            memory,
        }
    }

    /// The first arena, `None` until something has been allocated.
    pub fn first_arena(&self) -> Option<&Arena> {
        self.first_arena.map(|arena| unsafe { &*arena.as_ptr() })
    }

    /// Allocates `size` bytes and returns a word aligned pointer to them.
    ///
    /// Returns `None` when `size` is zero or the kernel refuses to map the
    /// arena needed to serve the request. See [`Heap::try_allocate`] for the
    /// reason behind a failure.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        match self.try_allocate(size) {
            Ok(ptr) => Some(ptr),
            Err(AllocError::ZeroSize) => None,
            Err(err) => {
                log::warn!("allocate({size}) failed: {err}");
                None
            }
        }
    }

    /// Same as [`Heap::allocate`] but tells why it failed.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let hdr = self.claim(size)?;

        Ok(unsafe { self.commit(hdr, size) })
    }

    /// Releases the block behind `ptr` and merges it with its free neighbours.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] or
    /// [`Heap::reallocate`] on this heap and not freed since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.first_arena.is_some(), "free on a heap that never allocated");
        let Some(first_arena) = self.first_arena else {
            return;
        };

        unsafe {
            let hdr = header_of(ptr);
            debug_assert!(!hdr.as_ref().is_free(), "double free of {ptr:p}");

            Header::set_asize(hdr, 0);
            log::trace!("free {:p} ({} bytes)", ptr, hdr.as_ref().size());

            // Right first: `hdr` survives and keeps the right `next` for the
            // left merge below.
            let next = Header::next_ptr(hdr);
            if next != hdr && Header::can_merge(hdr, next) {
                log::trace!("merge {:p} <- {:p}", hdr, next);
                Header::merge(hdr, next);
            }

            let prev = FreeList::of(first_arena).predecessor(hdr);
            if prev != hdr && Header::can_merge(prev, hdr) {
                log::trace!("merge {:p} <- {:p}", prev, hdr);
                Header::merge(prev, hdr);
            }
        }
    }

    /// Resizes the block behind `ptr` to `size` bytes.
    ///
    /// If the block already has room for `size` bytes it stays where it is.
    /// Otherwise the block is freed first and a new block is allocated, so
    /// the old block may be reused; the first `asize` bytes are carried over.
    /// On failure `None` is returned and the old block has been freed. A
    /// `size` of zero frees the block and returns `None`.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::free`].
    pub unsafe fn reallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
        unsafe {
            let hdr = header_of(ptr);

            if size == 0 {
                self.free(ptr);
                return None;
            }

            if hdr.as_ref().size() >= size {
                Header::set_asize(hdr, size);
                return Some(ptr);
            }

            let old_asize = hdr.as_ref().asize();
            self.free(ptr);

            // Free and merge only write headers at block boundaries, so the
            // old payload is still intact here.
            let candidate = match self.claim(size) {
                Ok(candidate) => candidate,
                Err(err) => {
                    log::warn!("reallocate({ptr:p}, {size}) failed: {err}");
                    return None;
                }
            };

            // Copy before splitting: the candidate may start below the old
            // block and the split header could land on old payload bytes.
            ptr::copy(ptr.as_ptr(), payload_of(candidate).as_ptr(), old_asize);

            Some(self.commit(candidate, size))
        }
    }

    /// Payload capacity of the block behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live allocation of this heap.
    pub unsafe fn capacity_of(&self, ptr: NonNull<u8>) -> usize {
        unsafe { header_of(ptr).as_ref().size() }
    }

    /// Picks the free block that will hold `size` bytes, mapping a new arena
    /// when none fits. The block is left free and unsplit.
    fn claim(&mut self, size: usize) -> Result<NonNull<Header>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let Some(first_arena) = self.first_arena else {
            let arena = self.new_arena(size)?;
            let hdr = first_header_of(arena);

            unsafe { Header::set_next(hdr, hdr) };
            self.first_arena = Some(arena);

            return Ok(hdr);
        };

        let list = FreeList::of(first_arena);

        if let Some(hdr) = list.find_best_fit(size) {
            log::trace!("best fit for {size} bytes: {:p}", hdr);
            return Ok(hdr);
        }

        let arena = self.new_arena(size)?;
        let hdr = first_header_of(arena);

        unsafe {
            list.insert_before_anchor(hdr);
            arena_append(first_arena, arena);
        }
        log::debug!("spliced arena {:p} into the heap", arena);

        Ok(hdr)
    }

    /// Marks `hdr` as holding `size` bytes, splitting off the unused tail
    /// when it is large enough to be a block of its own.
    unsafe fn commit(&mut self, hdr: NonNull<Header>, size: usize) -> NonNull<u8> {
        unsafe {
            if Header::should_split(hdr, size) {
                let tail = Header::split(hdr, size);
                log::trace!("split {:p}, free tail {:p}", hdr, tail);
            }

            Header::set_asize(hdr, size);
        }

        payload_of(hdr)
    }

    /// Maps an arena whose single free block can hold `size` bytes. The
    /// block is not linked into the cycle yet.
    fn new_arena(&self, size: usize) -> Result<NonNull<Arena>, AllocError> {
        let out_of_memory = AllocError::OutOfMemory { requested: size };

        let payload = cmp::max(checked_align(size, WORD_SIZE).ok_or(out_of_memory)?, MIN_BLOCK_SIZE);
        let needed = payload
            .checked_add(ARENA_HEADER_SIZE + HEADER_SIZE)
            .ok_or(out_of_memory)?;

        unsafe {
            let arena = arena_alloc(&self.memory, cmp::max(needed, PAGE_UNIT)).ok_or(out_of_memory)?;

            Header::init(first_header_of(arena), arena.as_ref().size() - ARENA_HEADER_SIZE - HEADER_SIZE);

            Ok(arena)
        }
    }
}

impl<M: PlatformMemory> Drop for Heap<M> {
    fn drop(&mut self) {
        if let Some(first_arena) = self.first_arena.take() {
            unsafe { arena_release_all(&self.memory, first_arena) }
        }
    }
}
