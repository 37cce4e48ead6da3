use std::{error::Error, fmt};

/// Reasons an allocation can fail. The public operations flatten these into
/// a null (`None`) return; the variants exist so internal code can propagate
/// with `?` and so failures can be logged with their cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A request for zero bytes.
    ZeroSize,
    /// The kernel refused to map a new arena, or the arena size needed for
    /// `requested` bytes does not fit in a `usize`.
    OutOfMemory { requested: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => write!(f, "zero-sized allocation request"),
            AllocError::OutOfMemory { requested } => {
                write!(f, "cannot map an arena for {requested} bytes")
            }
        }
    }
}

impl Error for AllocError {}

/// A structural property of the heap that does not hold. Returned by
/// [`crate::Heap::check_invariants`]; addresses are reported as plain integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Walking the blocks of an arena by physical stride did not end exactly
    /// at the arena's end.
    ArenaOvershoot { arena: usize, end: usize, reached: usize },
    /// A block carries less than `MIN_BLOCK_SIZE` payload bytes.
    UndersizedBlock { header: usize, size: usize },
    /// A block claims to hold more bytes than it has.
    AsizeExceedsSize { header: usize, size: usize, asize: usize },
    /// Two physically adjacent blocks in the same arena are both free.
    AdjacentFreeBlocks { left: usize, right: usize },
    /// The cyclic list does not visit exactly the blocks found in the arenas.
    CycleMismatch { in_arenas: usize, in_cycle: usize },
    /// A `next` pointer leads to an address that is not a block header.
    ForeignLink { from: usize, to: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaOvershoot { arena, end, reached } => write!(
                f,
                "arena {arena:#x}: block walk reached {reached:#x} instead of {end:#x}"
            ),
            Self::UndersizedBlock { header, size } => {
                write!(f, "block {header:#x} has size {size}, below the minimum")
            }
            Self::AsizeExceedsSize { header, size, asize } => {
                write!(f, "block {header:#x} holds {asize} bytes but has only {size}")
            }
            Self::AdjacentFreeBlocks { left, right } => {
                write!(f, "adjacent free blocks {left:#x} and {right:#x} were not merged")
            }
            Self::CycleMismatch { in_arenas, in_cycle } => write!(
                f,
                "arenas hold {in_arenas} blocks but the cyclic list visits {in_cycle}"
            ),
            Self::ForeignLink { from, to } => {
                write!(f, "block {from:#x} links to {to:#x}, which is not a block")
            }
        }
    }
}

impl Error for InvariantViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_cause() {
        assert_eq!(AllocError::ZeroSize.to_string(), "zero-sized allocation request");
        assert_eq!(
            AllocError::OutOfMemory { requested: 42 }.to_string(),
            "cannot map an arena for 42 bytes"
        );
        assert_eq!(
            InvariantViolation::UndersizedBlock { header: 0x10, size: 8 }.to_string(),
            "block 0x10 has size 8, below the minimum"
        );
    }
}
