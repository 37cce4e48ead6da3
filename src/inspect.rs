//! Read-only views of a [`Heap`] for tests and debugging.
//!
//! Nothing here writes to the heap. The views expose the same three header
//! fields the allocator works with (`next`, `size`, `asize`) so a debugger
//! session and a test read the heap the same way.

use std::fmt;

use crate::{
    arena::{ARENA_HEADER_SIZE, Arena},
    block::{HEADER_SIZE, Header, MIN_BLOCK_SIZE},
    error::InvariantViolation,
    freelist::FreeList,
    heap::Heap,
    kernel::PlatformMemory,
};

/// Aggregate numbers about a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Arenas mapped so far.
    pub arenas: usize,
    /// Bytes mapped from the kernel, arena headers included.
    pub mapped_bytes: usize,
    /// Blocks, free and used, across all arenas.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Sum of `asize` over used blocks.
    pub used_bytes: usize,
    /// Sum of `size` over free blocks.
    pub free_bytes: usize,
}

/// Copy of one header taken by [`Heap::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub addr: usize,
    pub next: usize,
    pub size: usize,
    pub asize: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaSnapshot {
    pub addr: usize,
    pub size: usize,
    /// Blocks in physical order.
    pub blocks: Vec<BlockSnapshot>,
}

/// Copy of every arena and header of a heap. Its `Display` prints one table
/// per arena, in the order arenas were mapped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapSnapshot {
    pub arenas: Vec<ArenaSnapshot>,
}

/// Iterator over the arena list, see [`Heap::arenas`].
pub struct Arenas<'a> {
    current: Option<&'a Arena>,
}

impl<'a> Iterator for Arenas<'a> {
    type Item = &'a Arena;

    fn next(&mut self) -> Option<Self::Item> {
        let arena = self.current?;
        self.current = arena.next();
        Some(arena)
    }
}

impl<M: PlatformMemory> Heap<M> {
    /// Every arena, first to last.
    pub fn arenas(&self) -> Arenas<'_> {
        Arenas {
            current: self.first_arena(),
        }
    }

    /// Every header once, following the cyclic list from the first header of
    /// the first arena.
    pub fn headers(&self) -> impl Iterator<Item = &Header> + '_ {
        self.first_arena
            .into_iter()
            .flat_map(|arena| FreeList::of(arena).iter())
            .map(|hdr| unsafe { &*hdr.as_ptr() })
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();

        for arena in self.arenas() {
            stats.arenas += 1;
            stats.mapped_bytes += arena.size();

            for block in arena.blocks() {
                stats.blocks += 1;
                if block.is_free() {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size();
                } else {
                    stats.used_bytes += block.asize();
                }
            }
        }

        stats
    }

    pub fn snapshot(&self) -> HeapSnapshot {
        let arenas = self
            .arenas()
            .map(|arena| ArenaSnapshot {
                addr: arena.start(),
                size: arena.size(),
                blocks: arena
                    .blocks()
                    .map(|block| BlockSnapshot {
                        addr: block as *const Header as usize,
                        next: block.next_raw() as usize,
                        size: block.size(),
                        asize: block.asize(),
                    })
                    .collect(),
            })
            .collect();

        HeapSnapshot { arenas }
    }

    /// Verifies the structural properties every public operation preserves:
    ///
    /// - the blocks of each arena tile it exactly,
    /// - every block has at least [`MIN_BLOCK_SIZE`] bytes and `asize <= size`,
    /// - no two physically adjacent blocks are both free,
    /// - the cyclic list visits exactly the blocks found in the arenas.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut known = Vec::new();

        for arena in self.arenas() {
            let end = arena.end();
            let mut current = arena.start() + ARENA_HEADER_SIZE;
            let mut prev_free: Option<usize> = None;

            while current + HEADER_SIZE <= end {
                let block = unsafe { &*(current as *const Header) };

                if block.size() < MIN_BLOCK_SIZE {
                    return Err(InvariantViolation::UndersizedBlock { header: current, size: block.size() });
                }
                if block.asize() > block.size() {
                    return Err(InvariantViolation::AsizeExceedsSize {
                        header: current,
                        size: block.size(),
                        asize: block.asize(),
                    });
                }

                match prev_free {
                    Some(left) if block.is_free() => {
                        return Err(InvariantViolation::AdjacentFreeBlocks { left, right: current });
                    }
                    _ => prev_free = block.is_free().then_some(current),
                }

                known.push(current);
                current = current.saturating_add(HEADER_SIZE + block.size());
            }

            if current != end {
                return Err(InvariantViolation::ArenaOvershoot {
                    arena: arena.start(),
                    end,
                    reached: current,
                });
            }
        }

        let Some(first_arena) = self.first_arena else {
            return Ok(());
        };

        known.sort_unstable();

        let anchor = FreeList::of(first_arena).anchor().as_ptr() as usize;
        let mut current = anchor;
        let mut visited = 0;

        loop {
            visited += 1;
            if visited > known.len() {
                return Err(InvariantViolation::CycleMismatch {
                    in_arenas: known.len(),
                    in_cycle: visited,
                });
            }

            let next = unsafe { (*(current as *const Header)).next_raw() } as usize;
            if known.binary_search(&next).is_err() {
                return Err(InvariantViolation::ForeignLink { from: current, to: next });
            }
            if next == anchor {
                break;
            }
            current = next;
        }

        if visited != known.len() {
            return Err(InvariantViolation::CycleMismatch {
                in_arenas: known.len(),
                in_cycle: visited,
            });
        }

        Ok(())
    }
}

impl fmt::Display for HeapSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arena) in self.arenas.iter().enumerate() {
            writeln!(f, "Arena {} @ {:#x}, size: {}", i + 1, arena.addr, arena.size)?;
            writeln!(f, "|")?;

            for (j, block) in arena.blocks.iter().enumerate() {
                writeln!(
                    f,
                    "+- Header {} @ {:#x}, data @ {:#x}",
                    j + 1,
                    block.addr,
                    block.addr + HEADER_SIZE
                )?;
                writeln!(f, "|    | next           | size     | asize    |")?;
                writeln!(f, "|    | {:<#14x} | {:<8} | {:<8} |", block.next, block.size, block.asize)?;
            }

            writeln!(f, "|")?;
        }

        writeln!(f, "NULL")
    }
}
