use std::{marker::PhantomData, mem, ptr::{self, NonNull}};

use crate::{
    block::{HEADER_SIZE, Header, MIN_BLOCK_SIZE},
    kernel::PlatformMemory,
    utils::checked_align,
};

/// Quantum to which every arena size is rounded up.
pub const PAGE_UNIT: usize = 128 * 1024;

/// This is the overhead size introduced by the [`Arena`] header in bytes.
pub const ARENA_HEADER_SIZE: usize = mem::size_of::<Arena>();

/// Metadata at the start of every region obtained from the kernel.
///
/// The kernel gives us regions aligned to its page size, but we cannot map a
/// region for every request and we cannot assume that regions are adjacent.
/// So arenas form a singly linked list, and the rest of each arena is cut into
/// [`Header`] prefixed blocks:
///
/// ```text
///   /--- arena metadata
///   |     /---- header of the first block
///   v     v
///   +-----+------+---------+------+--------------+       +-----+------+-----------+
///   |Arena|Header|.........|Header|..............|  ---> |Arena|Header|...........|
///   +-----+------+---------+------+--------------+       +-----+------+-----------+
///
///   |--------------- Arena.size -----------------|
/// ```
///
/// Arenas are never returned while the heap is alive.
#[repr(C)]
#[derive(Debug)]
pub struct Arena {
    /// Next arena, null for the last one.
    next: *mut Arena,
    /// Total size of the region, this header included.
    size: usize,
}

impl Arena {
    /// Next arena in the list, `None` for the last one.
    #[inline]
    pub fn next(&self) -> Option<&Arena> {
        unsafe { self.next.as_ref() }
    }

    /// Total bytes of the arena, a multiple of [`PAGE_UNIT`].
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Address of the arena, which is also the address of this header.
    #[inline]
    pub fn start(&self) -> usize {
        self as *const Arena as usize
    }

    /// One past the last byte of the arena.
    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    /// Header of the first block, right after the arena header.
    #[inline]
    pub fn first_header(&self) -> &Header {
        unsafe { first_header_of(NonNull::from(self)).as_ref() }
    }

    /// Walks the blocks of this arena in physical order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            current: first_header_of(NonNull::from(self)).as_ptr(),
            end: self.end(),
            marker: PhantomData,
        }
    }
}

/// Physical iterator over the blocks of one [`Arena`]. See [`Arena::blocks`].
pub struct Blocks<'a> {
    current: *const Header,
    end: usize,
    marker: PhantomData<&'a Arena>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = &'a Header;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current as usize + HEADER_SIZE > self.end {
            return None;
        }

        unsafe {
            let header = &*self.current;
            self.current = (self.current as *const u8)
                .wrapping_add(HEADER_SIZE + header.size())
                .cast();

            Some(header)
        }
    }
}

/// Header of the first block of `arena`.
#[inline]
pub(crate) fn first_header_of(arena: NonNull<Arena>) -> NonNull<Header> {
    unsafe { NonNull::new_unchecked(arena.as_ptr().cast::<u8>().add(ARENA_HEADER_SIZE).cast()) }
}

/// Maps a new arena of at least `req_size` bytes, rounded up to [`PAGE_UNIT`].
///
/// Returns `None` if the size overflows or the kernel refuses the mapping.
/// In both cases nothing has been mapped.
pub(crate) unsafe fn arena_alloc<M: PlatformMemory>(memory: &M, req_size: usize) -> Option<NonNull<Arena>> {
    debug_assert!(req_size > ARENA_HEADER_SIZE + HEADER_SIZE + MIN_BLOCK_SIZE);

    let aligned_size = checked_align(req_size, PAGE_UNIT)?;

    unsafe {
        let Some(addr) = memory.request_memory(aligned_size) else {
            log::warn!("kernel refused an arena of {aligned_size} bytes");
            return None;
        };

        let arena = addr.cast::<Arena>();
        arena.as_ptr().write(Arena {
            next: ptr::null_mut(),
            size: aligned_size,
        });

        log::debug!("mapped arena at {:p} ({aligned_size} bytes)", arena.as_ptr());

        Some(arena)
    }
}

/// Attaches `arena` at the tail of the list that starts at `first`.
pub(crate) unsafe fn arena_append(first: NonNull<Arena>, arena: NonNull<Arena>) {
    unsafe {
        let mut last = first.as_ptr();
        while !(*last).next.is_null() {
            last = (*last).next;
        }

        (*last).next = arena.as_ptr();
    }
}

/// Unlinks the list starting at `first`, returning every arena to `memory`.
pub(crate) unsafe fn arena_release_all<M: PlatformMemory>(memory: &M, first: NonNull<Arena>) {
    let mut current = first.as_ptr();

    while let Some(arena) = NonNull::new(current) {
        unsafe {
            let Arena { next, size } = arena.as_ptr().read();
            memory.return_memory(arena.cast(), size);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{
        SystemMemory,
        testing::{FailingMemory, LimitedMemory},
    };

    #[test]
    fn arena_size_is_rounded_to_page_unit() {
        unsafe {
            let arena = arena_alloc(&SystemMemory, PAGE_UNIT / 2).unwrap();
            assert_eq!(arena.as_ref().size(), PAGE_UNIT);
            assert!(arena.as_ref().next().is_none());
            arena_release_all(&SystemMemory, arena);

            let arena = arena_alloc(&SystemMemory, PAGE_UNIT + 1).unwrap();
            assert_eq!(arena.as_ref().size(), 2 * PAGE_UNIT);
            arena_release_all(&SystemMemory, arena);
        }
    }

    #[test]
    fn refused_mapping_is_reported() {
        assert!(unsafe { arena_alloc(&FailingMemory, PAGE_UNIT) }.is_none());
    }

    #[test]
    fn oversized_request_fails_without_mapping() {
        let memory = LimitedMemory::new(1);
        assert!(unsafe { arena_alloc(&memory, usize::MAX - 1) }.is_none());
        assert_eq!(memory.mapped.get(), 0);
    }

    #[test]
    fn append_walks_to_the_tail() {
        let memory = LimitedMemory::new(3);

        unsafe {
            let first = arena_alloc(&memory, PAGE_UNIT).unwrap();
            let second = arena_alloc(&memory, PAGE_UNIT).unwrap();
            let third = arena_alloc(&memory, 3 * PAGE_UNIT).unwrap();

            arena_append(first, second);
            arena_append(first, third);

            let sizes: Vec<usize> = {
                let mut sizes = Vec::new();
                let mut current = Some(first.as_ref());
                while let Some(arena) = current {
                    sizes.push(arena.size());
                    current = arena.next();
                }
                sizes
            };
            assert_eq!(sizes, vec![PAGE_UNIT, PAGE_UNIT, 3 * PAGE_UNIT]);

            arena_release_all(&memory, first);
        }

        assert_eq!(memory.mapped.get(), 0);
    }

    #[test]
    fn first_header_follows_the_arena_header() {
        unsafe {
            let arena = arena_alloc(&SystemMemory, PAGE_UNIT).unwrap();
            let first = first_header_of(arena);

            assert_eq!(first.as_ptr() as usize, arena.as_ptr() as usize + ARENA_HEADER_SIZE);
            assert_eq!(arena.as_ref().first_header() as *const Header, first.as_ptr() as *const Header);

            arena_release_all(&SystemMemory, arena);
        }
    }
}
