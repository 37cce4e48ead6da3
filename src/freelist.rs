use std::ptr::NonNull;

use crate::{
    arena::{Arena, first_header_of},
    block::Header,
};

/// View over the cyclic list of block headers.
///
/// The list is intrusive: it lives in the `next` field of every [`Header`] of
/// every arena, free or used, and there is no head sentinel. The first header
/// of the first arena serves as the anchor where every walk starts and ends.
///
/// ```text
///                +-------------------------------------------------------------+
///                v                                                             |
///   +-----+------+----+------+----+------+---+      +-----+------+----+------+-|-+
///   |Arena|Header|XXXX|Header|XXXX|Header|...| ---> |Arena|Header|XXXX|Header|...|
///   +-----+------+----+------+----+------+---+      +-----+------+----+------+---+
///             \-next--^  \-next--^  \-next------------------^  \-next--^
/// ```
///
/// Headers of one arena follow each other in physical order and each new arena
/// is spliced in right before the anchor, so the cycle visits arenas in the
/// order they were mapped.
#[derive(Clone, Copy)]
pub(crate) struct FreeList {
    anchor: NonNull<Header>,
}

impl FreeList {
    /// The list anchored at the first header of `first_arena`.
    #[inline]
    pub fn of(first_arena: NonNull<Arena>) -> Self {
        Self {
            anchor: first_header_of(first_arena),
        }
    }

    #[inline]
    pub fn anchor(&self) -> NonNull<Header> {
        self.anchor
    }

    /// Returns the free block that fits best `size` bytes: the smallest free
    /// block with `size` or more payload bytes. Ties go to the block met first
    /// when walking from the anchor.
    pub fn find_best_fit(&self, size: usize) -> Option<NonNull<Header>> {
        debug_assert!(size > 0);

        let mut best: Option<NonNull<Header>> = None;

        for node in self.iter() {
            let block = unsafe { node.as_ref() };

            if !block.is_free() || block.size() < size {
                continue;
            }

            match best {
                Some(current) if unsafe { current.as_ref() }.size() <= block.size() => {}
                _ => best = Some(node),
            }
        }

        best
    }

    /// Walks the cycle until it finds the header whose `next` is `hdr`.
    /// A header alone in the cycle is its own predecessor.
    ///
    /// `hdr` must be a member of the cycle, otherwise this never returns.
    pub fn predecessor(&self, hdr: NonNull<Header>) -> NonNull<Header> {
        let mut current = self.anchor;

        while Header::next_ptr(current) != hdr {
            current = Header::next_ptr(current);
        }

        current
    }

    /// Links `hdr` into the cycle as the predecessor of the anchor.
    pub unsafe fn insert_before_anchor(&self, hdr: NonNull<Header>) {
        let last = self.predecessor(self.anchor);

        unsafe {
            Header::set_next(hdr, self.anchor);
            Header::set_next(last, hdr);
        }
    }

    /// Every header of the cycle once, starting at the anchor.
    pub fn iter(self) -> Iter {
        Iter {
            anchor: self.anchor,
            current: Some(self.anchor),
        }
    }
}

pub(crate) struct Iter {
    anchor: NonNull<Header>,
    current: Option<NonNull<Header>>,
}

impl Iterator for Iter {
    type Item = NonNull<Header>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        let next = Header::next_ptr(node);

        self.current = if next == self.anchor { None } else { Some(next) };

        Some(node)
    }
}
