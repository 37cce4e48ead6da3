//! Small arithmetic helpers shared by the arena and block layers.

use std::mem;

/// Size of a machine word. Payload sizes are rounded up to this value.
pub(crate) const WORD_SIZE: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` using `aligment`.
///
/// This is used to round arena sizes up to [`crate::arena::PAGE_UNIT`] and
/// block payloads up to [`WORD_SIZE`] so every header lands on a word boundary.
/// `aligment` must be a power of two.
#[inline]
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// the result does not fit in a `usize`.
#[inline]
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 8));
            }
        }
    }

    #[test]
    fn align_page_unit() {
        let unit = 128 * 1024;
        let aligments = vec![(1..unit + 1, unit), (unit + 1..2 * unit + 1, 2 * unit)];

        for (sizes, expected) in aligments {
            for size in sizes.step_by(997) {
                assert_eq!(expected, align(size, unit))
            }
        }
        assert_eq!(align(0, unit), 0);
    }

    #[test]
    fn checked_align_detects_overflow() {
        assert_eq!(checked_align(13, WORD_SIZE), Some(align(13, WORD_SIZE)));
        assert_eq!(checked_align(usize::MAX, WORD_SIZE), None);
        assert_eq!(checked_align(usize::MAX - 3, 8), None);
    }
}
