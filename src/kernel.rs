use std::ptr::NonNull;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator only needs two things from the kernel: a fresh
/// region of pages and, when a [`crate::Heap`] is torn down, a way to hand
/// that region back.
///
/// Regions returned by [`PlatformMemory::request_memory`] must be readable,
/// writable, zero-initialized and aligned to at least the machine word.
pub trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or `None` if the underlying syscall fails.
    ///
    /// # Safety
    ///
    /// `len` must be non-zero.
    unsafe fn request_memory(&self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe exactly one region previously obtained
    /// from [`PlatformMemory::request_memory`] on the same provider, and nothing
    /// may touch the region afterwards.
    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize);
}

impl<M: PlatformMemory + ?Sized> PlatformMemory for &M {
    unsafe fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
        unsafe { (**self).request_memory(len) }
    }

    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
        unsafe { (**self).return_memory(addr, len) }
    }
}

/// Anonymous private mappings from the operating system: `mmap` on unix,
/// `VirtualAlloc` on windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl SystemMemory {
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
mod unix {
    use super::{PlatformMemory, SystemMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for SystemMemory {
        unsafe fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{os::raw::c_void, ptr::NonNull};

    use super::{PlatformMemory, SystemMemory};

    use windows::Win32::System::Memory;

    impl PlatformMemory for SystemMemory {
        unsafe fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(&self, addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}
