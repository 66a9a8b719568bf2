//! Stack memory for fibers.
//!
//! The switching core never allocates, grows, or validates stack memory;
//! whoever builds a context owns that problem. This module provides the
//! one policy the crate ships: fixed-size mappings with a guard page.

use std::io;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use nix::unistd::{SysconfVar, sysconf};

/// Default usable size for a fiber stack.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Memory a fiber executes on.
pub trait Stack: Sized + Send {
    /// Maps a new stack with at least `size` usable bytes.
    fn new(size: usize) -> io::Result<Self>;

    /// Highest address of the usable region, 16-byte aligned; where the
    /// stack pointer starts. Stacks grow downwards from here.
    fn base(&self) -> NonNull<()>;

    /// Usable bytes below [`base`](Stack::base), excluding any guard
    /// region.
    fn size(&self) -> usize;
}

/// An anonymous private mapping with a `PROT_NONE` page at the low end,
/// so running off the stack faults immediately instead of corrupting
/// whatever happens to be mapped next.
///
/// The mapping is fixed-size: it does not grow and is not reused after
/// drop.
#[derive(Debug)]
pub struct GuardedStack {
    mapping: NonNull<core::ffi::c_void>,
    len: usize,
    guard: usize,
}

unsafe impl Send for GuardedStack {}

impl Stack for GuardedStack {
    fn new(size: usize) -> io::Result<Self> {
        let page = page_size()?;
        let len = size
            .max(1)
            .div_ceil(page)
            .checked_mul(page)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let total = len
            .checked_add(page)
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;

        // SAFETY: a fresh anonymous mapping, not touching any existing one.
        let mapping = unsafe {
            mmap_anonymous(
                None,
                total,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(io::Error::from)?;

        // The lowest page is the guard; the stack grows down towards it.
        //
        // SAFETY: `mapping` is page-aligned and `page` bytes of it exist.
        if let Err(err) = unsafe { mprotect(mapping, page, ProtFlags::PROT_NONE) } {
            let _ = unsafe { munmap(mapping, len + page) };
            return Err(err.into());
        }

        Ok(Self {
            mapping,
            len,
            guard: page,
        })
    }

    fn base(&self) -> NonNull<()> {
        // SAFETY: guard + len is exactly the end of the mapping; mmap
        // results are page-aligned, so the sum stays 16-aligned.
        unsafe {
            NonNull::new_unchecked(self.mapping.as_ptr().cast::<u8>().add(self.guard + self.len))
                .cast()
        }
    }

    fn size(&self) -> usize {
        self.len
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        // SAFETY: `new` created the mapping with this exact length.
        let _ = unsafe { munmap(self.mapping, self.len + self.guard) };
    }
}

fn page_size() -> io::Result<usize> {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Ok(size as usize),
        Ok(_) => Err(io::Error::from(io::ErrorKind::Unsupported)),
        Err(err) => Err(err.into()),
    }
}
