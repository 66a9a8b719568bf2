use core::{cell::UnsafeCell, mem::transmute};
use weft_hal::Context;
use weft_hal::traits::context::RawContext;

/// Which pass of [`ExecutionContext::capture`] is returning.
///
/// A capture site can be returned through twice: once when the snapshot is
/// taken, and once more (arbitrarily later, with all locals as they were
/// at the capture) when the context is restored or switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// The direct call: the snapshot was just taken, no control transfer
    /// happened.
    Fresh,
    /// Control re-entered the capture site through a restore or a switch.
    Resumed,
}

/// A suspended point of execution: where one fiber picks up the CPU again.
///
/// The record is plain data. It references the stack that was live at
/// capture time but owns nothing; keeping that stack alive for as long as
/// the context may be restored is the caller's job.
#[derive(Debug)]
pub struct ExecutionContext(UnsafeCell<Context>);

unsafe impl Sync for ExecutionContext {}

impl ExecutionContext {
    pub const fn new() -> Self {
        Self(UnsafeCell::new(Context::new()))
    }

    /// Positions the initial stack pointer for a context that will enter a
    /// fresh stack through [`ExecutionContext::call1`]. `sp` must be the
    /// base (highest address) of the stack, 16-byte aligned.
    pub fn set_sp(&mut self, sp: usize) {
        let Self(context) = self;
        context.get_mut().set_stack_pointer(sp);
    }

    /// Arranges for the first restore of this context to enter `func(arg)`
    /// on the stack installed with [`ExecutionContext::set_sp`].
    pub fn call1<T>(&mut self, func: unsafe extern "C" fn(T) -> !, arg: usize) {
        let Self(context) = self;
        context
            .get_mut()
            .call(unsafe { transmute(func as *mut ()) }, arg);
    }

    /// Saves the calling execution point into this context.
    ///
    /// Returns [`Capture::Fresh`] on the direct call and
    /// [`Capture::Resumed`] when control comes back through a later
    /// [`restore`](Self::restore) or [`switch_to`](Self::switch_to), so
    /// one call can return twice in real time.
    ///
    /// # Safety
    /// The snapshot references the caller's stack frame. Restoring it
    /// after that frame is gone is undefined behavior.
    pub unsafe fn capture(&self) -> Capture {
        let Self(context) = self;
        match unsafe { Context::capture(&mut *context.get()) } {
            0 => Capture::Fresh,
            _ => Capture::Resumed,
        }
    }

    /// Transfers control to this context. Never returns to the caller;
    /// execution continues at the point the context was captured, as if
    /// that capture were returning again.
    ///
    /// # Safety
    /// The context must hold a snapshot produced by a prior capture or
    /// switch (or by `set_sp` + `call1` on a fresh stack), and the stack
    /// it references must still be live. There is no error reporting for
    /// violations: by the time one could be detected, the calling
    /// convention has already been corrupted.
    pub unsafe fn restore(&self) -> ! {
        let Self(context) = self;
        unsafe { Context::restore(&*context.get()) }
    }

    /// Saves the calling execution point into `self` and restores `to`,
    /// indivisibly. Returns only when some other context later restores
    /// or switches into `self`.
    ///
    /// # Safety
    /// Same contract as [`restore`](Self::restore) for `to`.
    pub unsafe fn switch_to(&self, to: &Self) {
        let Self(from_ctx) = self;
        let Self(to_ctx) = to;
        unsafe {
            Context::switch(&mut *from_ctx.get(), &*to_ctx.get());
        }
    }
}
