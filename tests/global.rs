//! Drives the process-wide heap through the free functions and the
//! `GlobalAlloc` adapter. Tests in this file share the heap, so they only
//! assert on their own blocks.

use std::alloc::{GlobalAlloc, Layout};

use mmal::{MmAlloc, PAGE_UNIT};
use test_env_log::test;

fn fill(ptr: *mut u8, len: usize, seed: u8) {
    for i in 0..len {
        unsafe { ptr.add(i).write(seed ^ (i as u8)) };
    }
}

fn holds(ptr: *const u8, len: usize, seed: u8) -> bool {
    (0..len).all(|i| unsafe { ptr.add(i).read() } == seed ^ (i as u8))
}

#[test]
fn zero_size_is_null() {
    assert!(mmal::allocate(0).is_none());
}

#[test]
fn allocate_write_free() {
    let ptrs: Vec<_> = (1..64).map(|i| (mmal::allocate(i * 11).unwrap(), i * 11)).collect();

    for (i, &(ptr, len)) in ptrs.iter().enumerate() {
        fill(ptr.as_ptr(), len, i as u8);
    }
    for (i, &(ptr, len)) in ptrs.iter().enumerate() {
        assert!(holds(ptr.as_ptr(), len, i as u8));
    }
    for (ptr, _) in ptrs {
        unsafe { mmal::free(ptr) };
    }

    mmal::with_global_heap(|heap| heap.check_invariants()).unwrap();
}

#[test]
fn reallocate_carries_data_across_arenas() {
    let ptr = mmal::allocate(100).unwrap();
    fill(ptr.as_ptr(), 100, 0x5A);

    unsafe {
        let ptr = mmal::reallocate(ptr, 50).unwrap();
        assert!(holds(ptr.as_ptr(), 50, 0x5A));

        let ptr = mmal::reallocate(ptr, 3 * PAGE_UNIT).unwrap();
        assert!(holds(ptr.as_ptr(), 50, 0x5A));

        assert!(mmal::reallocate(ptr, 0).is_none());
    }

    mmal::with_global_heap(|heap| {
        assert!(heap.stats().arenas >= 2);
        heap.check_invariants()
    })
    .unwrap();
}

#[test]
fn global_alloc_adapter() {
    let alloc = MmAlloc::new();
    let layout = Layout::from_size_align(24, 8).unwrap();

    unsafe {
        let ptr = alloc.alloc(layout);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 8, 0);
        fill(ptr, 24, 3);

        let grown = alloc.realloc(ptr, layout, 4096);
        assert!(!grown.is_null());
        assert!(holds(grown, 24, 3));

        let grown_layout = Layout::from_size_align(4096, 8).unwrap();
        let shrunk = alloc.realloc(grown, grown_layout, 8);
        assert_eq!(shrunk, grown);
        assert!(holds(shrunk, 8, 3));

        alloc.dealloc(shrunk, Layout::from_size_align(8, 8).unwrap());

        let zeroed = alloc.alloc_zeroed(Layout::from_size_align(512, 8).unwrap());
        assert!(!zeroed.is_null());
        assert!((0..512).all(|i| zeroed.add(i).read() == 0));
        alloc.dealloc(zeroed, Layout::from_size_align(512, 8).unwrap());
    }
}

#[test]
fn over_aligned_layouts_are_refused() {
    let alloc = MmAlloc::new();
    let layout = Layout::from_size_align(64, 4096).unwrap();

    assert!(unsafe { alloc.alloc(layout) }.is_null());
}

#[test]
fn concurrent_callers_are_serialized() {
    let threads: Vec<_> = (0..4u8)
        .map(|t| {
            std::thread::spawn(move || {
                for round in 0..200usize {
                    let len = 1 + (round * 13 + t as usize) % 700;
                    let ptr = mmal::allocate(len).unwrap();
                    fill(ptr.as_ptr(), len, t);
                    assert!(holds(ptr.as_ptr(), len, t));
                    unsafe { mmal::free(ptr) };
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    mmal::with_global_heap(|heap| heap.check_invariants()).unwrap();
}
