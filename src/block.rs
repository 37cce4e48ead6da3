use std::{cmp, mem, ptr::{self, NonNull}};

use crate::utils::{WORD_SIZE, align};

/// Header size of a block in bytes. Payload starts right after it.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// The minimun payload any block carries. Requests smaller than this are
/// rounded up so that a freed block can always be split off again.
pub const MIN_BLOCK_SIZE: usize = 32;

/// This is the structure of a block header. The fields are the metadata of
/// the block, the payload handed to the caller is placed after it.
///
/// ```text
///   ---+--------+------------------------------+---
///      | Header |DDD used DDDDD|....free.......|
///   ---+--------+------------------------------+---
///               |-- asize -----|
///               |-- size ----------------------|
/// ```
///
/// Every header of every arena is a member of one cyclic list threaded
/// through `next`. A block alone in the heap points to itself.
///
/// As every header is followed by a payload whose size is a multiple of the
/// machine word, and the first header of an arena sits on a word boundary,
/// every header and every payload is word aligned.
#[repr(C)]
#[derive(Debug)]
pub struct Header {
    /// Next header in the cyclic list. Not necessarily the physical neighbour.
    next: *mut Header,
    /// Payload capacity of the block, header excluded.
    size: usize,
    /// Bytes the caller currently holds. `0` marks a free block.
    asize: usize,
}

impl Header {
    /// Successor in the cyclic list.
    #[inline]
    pub fn next(&self) -> &Header {
        unsafe { &*self.next }
    }

    /// Payload capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes currently held by the caller, `0` when free.
    #[inline]
    pub fn asize(&self) -> usize {
        self.asize
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.asize == 0
    }

    /// Address of the first payload byte.
    #[inline]
    pub fn payload(&self) -> *const u8 {
        (self as *const Header as *const u8).wrapping_add(HEADER_SIZE)
    }

    /// Raw `next` link, null on a header that was never linked.
    #[inline]
    pub(crate) fn next_raw(&self) -> *const Header {
        self.next
    }

    #[inline]
    pub(crate) fn next_ptr(hdr: NonNull<Header>) -> NonNull<Header> {
        unsafe { NonNull::new_unchecked((*hdr.as_ptr()).next) }
    }

    #[inline]
    pub(crate) unsafe fn set_next(hdr: NonNull<Header>, next: NonNull<Header>) {
        unsafe { (*hdr.as_ptr()).next = next.as_ptr() }
    }

    #[inline]
    pub(crate) unsafe fn set_asize(hdr: NonNull<Header>, asize: usize) {
        unsafe { (*hdr.as_ptr()).asize = asize }
    }

    /// Writes a fresh free header of `size` payload bytes at `hdr`.
    ///
    /// The `next` link is left null; the caller must link the header into
    /// the cyclic list before anyone walks it.
    ///
    /// ```text
    ///   +-----+--------+------------------------+----+
    ///   | ... | Header |........................| ...|
    ///   +-----+--------+------------------------+----+
    ///                  |-- size ----------------|
    /// ```
    pub(crate) unsafe fn init(hdr: NonNull<Header>, size: usize) {
        debug_assert!(size > 0);

        unsafe {
            hdr.as_ptr().write(Header {
                next: ptr::null_mut(),
                size,
                asize: 0,
            });
        }
    }

    /// Tells whether carving `req` bytes out of the free block `hdr` leaves a
    /// tail large enough to become a block of its own, that is strictly more
    /// than a header plus [`MIN_BLOCK_SIZE`].
    pub(crate) unsafe fn should_split(hdr: NonNull<Header>, req: usize) -> bool {
        let header = unsafe { hdr.as_ref() };
        debug_assert!(header.asize == 0);
        debug_assert!(req > 0);

        let alloc = alloc_size(req);

        header.size > alloc + HEADER_SIZE + MIN_BLOCK_SIZE
    }

    /// Splits the free block `hdr` in two and returns the header of the new
    /// right part, which is free and follows `hdr` in the cyclic list.
    ///
    /// ```text
    /// Before:        |---- size -------------------|
    ///    -----+------+-----------------------------+----
    ///         |Header|.............................|
    ///    -----+------+-----------------------------+----
    ///
    /// After:         |- alloc -|
    ///    -----+------+---------+------+------------+----
    ///         |Header|.........|Header|............|
    ///    -----+------+---------+------+------------+----
    ///             \---next-----^  \---next----------> old next
    /// ```
    pub(crate) unsafe fn split(hdr: NonNull<Header>, req: usize) -> NonNull<Header> {
        debug_assert!(unsafe { Self::should_split(hdr, req) });

        let alloc = alloc_size(req);

        unsafe {
            let old = hdr.as_ptr();
            let new_hdr = NonNull::new_unchecked(old.cast::<u8>().add(HEADER_SIZE + alloc).cast::<Header>());

            Self::init(new_hdr, (*old).size - HEADER_SIZE - alloc);

            (*old).size = alloc;
            (*old).asize = req;

            (*new_hdr.as_ptr()).next = (*old).next;
            (*old).next = new_hdr.as_ptr();

            new_hdr
        }
    }

    /// Two blocks can be merged when both are free and `right` starts exactly
    /// where the payload of `left` ends. Blocks of different arenas are never
    /// physically adjacent in this sense because every arena begins with its
    /// own arena header.
    pub(crate) unsafe fn can_merge(left: NonNull<Header>, right: NonNull<Header>) -> bool {
        debug_assert!(left != right);

        unsafe {
            debug_assert!(Self::next_ptr(left) == right);

            if !left.as_ref().is_free() || !right.as_ref().is_free() {
                return false;
            }

            next_physical(left) == right
        }
    }

    /// Absorbs `right` into `left`. Only the header of `left` is written, the
    /// old header of `right` becomes payload bytes of `left` untouched.
    pub(crate) unsafe fn merge(left: NonNull<Header>, right: NonNull<Header>) {
        debug_assert!(unsafe { Self::can_merge(left, right) });

        unsafe {
            let left = left.as_ptr();
            let right = right.as_ptr();

            (*left).size += HEADER_SIZE + (*right).size;
            (*left).next = (*right).next;
        }
    }
}

/// Bytes actually reserved for a request of `req` bytes.
#[inline]
pub(crate) fn alloc_size(req: usize) -> usize {
    cmp::max(align(req, WORD_SIZE), MIN_BLOCK_SIZE)
}

/// The header that physically follows `hdr`, which may be one past the end
/// of its arena.
#[inline]
pub(crate) unsafe fn next_physical(hdr: NonNull<Header>) -> NonNull<Header> {
    unsafe {
        let size = (*hdr.as_ptr()).size;
        NonNull::new_unchecked(hdr.as_ptr().cast::<u8>().add(HEADER_SIZE + size).cast())
    }
}

#[inline]
pub(crate) fn payload_of(hdr: NonNull<Header>) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(hdr.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
}

/// Inverse of [`payload_of`]. `ptr` must have been returned by the allocator.
#[inline]
pub(crate) unsafe fn header_of(ptr: NonNull<u8>) -> NonNull<Header> {
    unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(HEADER_SIZE).cast()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word-aligned scratch memory standing in for an arena.
    fn scratch(bytes: usize) -> (Vec<usize>, NonNull<Header>) {
        let mut buf = vec![0usize; bytes / WORD_SIZE];
        let hdr = NonNull::new(buf.as_mut_ptr()).unwrap().cast::<Header>();
        (buf, hdr)
    }

    /// A single free block spanning `bytes` of scratch memory, linked to itself.
    fn lone_block(bytes: usize) -> (Vec<usize>, NonNull<Header>) {
        let (buf, hdr) = scratch(bytes);
        unsafe {
            Header::init(hdr, bytes - HEADER_SIZE);
            Header::set_next(hdr, hdr);
        }
        (buf, hdr)
    }

    #[test]
    fn init_writes_a_free_header() {
        let (_buf, hdr) = scratch(256);

        unsafe {
            Header::init(hdr, 200);
            assert_eq!(hdr.as_ref().size(), 200);
            assert_eq!(hdr.as_ref().asize(), 0);
            assert!(hdr.as_ref().is_free());
            assert!(hdr.as_ref().next.is_null());
        }
    }

    #[test]
    fn alloc_size_is_word_aligned_and_clamped() {
        assert_eq!(alloc_size(1), MIN_BLOCK_SIZE);
        assert_eq!(alloc_size(MIN_BLOCK_SIZE), MIN_BLOCK_SIZE);
        assert_eq!(alloc_size(42), align(42, WORD_SIZE));
        assert_eq!(alloc_size(42) % WORD_SIZE, 0);
    }

    #[test]
    fn split_only_when_the_tail_is_a_real_block() {
        let exact = HEADER_SIZE + MIN_BLOCK_SIZE + MIN_BLOCK_SIZE;

        // Tail would be exactly MIN_BLOCK_SIZE: not strictly more, no split.
        let (_a, hdr) = lone_block(HEADER_SIZE + exact);
        assert!(unsafe { !Header::should_split(hdr, 1) });

        // One more word and the tail qualifies.
        let (_b, hdr) = lone_block(HEADER_SIZE + exact + WORD_SIZE);
        assert!(unsafe { Header::should_split(hdr, 1) });

        // A request larger than the block never splits.
        let (_c, hdr) = lone_block(128);
        assert!(unsafe { !Header::should_split(hdr, 4096) });
    }

    #[test]
    fn split_rewires_the_cycle() {
        let (_buf, hdr) = lone_block(512);
        let before = unsafe { hdr.as_ref().size() };

        unsafe {
            let tail = Header::split(hdr, 42);

            assert_eq!(hdr.as_ref().size(), alloc_size(42));
            assert_eq!(hdr.as_ref().asize(), 42);
            assert_eq!(tail, next_physical(hdr));
            assert_eq!(tail.as_ref().size(), before - HEADER_SIZE - alloc_size(42));
            assert!(tail.as_ref().is_free());

            assert_eq!(Header::next_ptr(hdr), tail);
            assert_eq!(Header::next_ptr(tail), hdr);
        }
    }

    #[test]
    fn merge_restores_the_original_block() {
        let (_buf, hdr) = lone_block(512);
        let before = unsafe { hdr.as_ref().size() };

        unsafe {
            let tail = Header::split(hdr, 64);
            assert!(!Header::can_merge(hdr, tail));

            Header::set_asize(hdr, 0);
            assert!(Header::can_merge(hdr, tail));

            Header::merge(hdr, tail);
            assert_eq!(hdr.as_ref().size(), before);
            assert_eq!(Header::next_ptr(hdr), hdr);
        }
    }

    #[test]
    fn blocks_that_are_not_adjacent_do_not_merge() {
        let (_a, left) = lone_block(256);
        let (_b, right) = lone_block(256);

        unsafe {
            Header::set_next(left, right);
            Header::set_next(right, left);

            assert!(left.as_ref().is_free() && right.as_ref().is_free());
            assert!(!Header::can_merge(left, right));
        }
    }

    #[test]
    fn payload_and_header_are_inverse() {
        let (_buf, hdr) = lone_block(128);
        let payload = payload_of(hdr);

        assert_eq!(payload.as_ptr() as *const u8, unsafe { hdr.as_ref().payload() });
        assert_eq!(unsafe { header_of(payload) }, hdr);
        assert_eq!(payload.as_ptr() as usize % WORD_SIZE, 0);
    }
}
