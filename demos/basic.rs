use mmal::{Heap, PAGE_UNIT};

fn main() {
    env_logger::init();

    let mut heap = Heap::new();

    let p1 = heap.allocate(42).unwrap();
    let p2 = heap.allocate(42).unwrap();
    let p3 = heap.allocate(16).unwrap();
    println!("Allocated 42, 42 and 16 bytes at {p1:p}, {p2:p}, {p3:p}\n");
    println!("{}", heap.snapshot());

    unsafe {
        heap.free(p1);
        heap.free(p3);
        heap.free(p2);
    }
    println!("After freeing all three blocks:\n\n{}", heap.snapshot());

    // Too big for the first arena: a second one gets mapped.
    let p4 = heap.allocate(2 * PAGE_UNIT).unwrap();
    println!("Allocated {} bytes at {p4:p}\n\n{}", 2 * PAGE_UNIT, heap.snapshot());

    let p4 = unsafe { heap.reallocate(p4, 2 * PAGE_UNIT + 2) }.unwrap();
    println!("Reallocated to {} bytes at {p4:p}\n\n{}", 2 * PAGE_UNIT + 2, heap.snapshot());

    unsafe { heap.free(p4) };
    println!("{:?}", heap.stats());

    if let Err(violation) = heap.check_invariants() {
        eprintln!("heap is corrupted: {violation}");
    }
}
