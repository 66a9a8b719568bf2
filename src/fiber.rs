//! The safe boundary over the register-transfer core.
//!
//! A [`Fiber`] owns one suspended thread of control: its stack, its
//! [`ExecutionContext`] and the closure it runs. The handle enforces the
//! suspended / running / finished lifecycle that the raw primitives leave
//! entirely to the caller, so misuse is a reported error here instead of
//! silent corruption.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::error::Error;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr;

use crate::context::ExecutionContext;
use crate::stack::{DEFAULT_STACK_SIZE, GuardedStack, Stack};
use crate::trace_switch;

thread_local! {
    /// The fiber currently executing on this thread, if any. One flow of
    /// control exists per thread, so a plain cell is enough.
    static CURRENT: Cell<*const FiberInner> = const { Cell::new(ptr::null()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiberState {
    Suspended,
    Running,
    Finished,
}

/// Misuse reported by [`Fiber::yield_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberError {
    /// The fiber is executing right now; switching into it again would
    /// clobber its live registers.
    Running,
    /// The fiber's entry function has returned; there is nothing left to
    /// resume.
    Finished,
}

impl fmt::Display for FiberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberError::Running => write!(f, "fiber is already running"),
            FiberError::Finished => write!(f, "fiber has already finished"),
        }
    }
}

impl Error for FiberError {}

struct FiberInner {
    /// The fiber's suspended execution point.
    context: ExecutionContext,
    /// The resumer's execution point while the fiber runs.
    link: ExecutionContext,
    state: Cell<FiberState>,
    entry: UnsafeCell<Option<Box<dyn FnOnce()>>>,
    panic: UnsafeCell<Option<Box<dyn Any + Send>>>,
    _stack: GuardedStack,
}

/// A single-ownership handle to one cooperatively scheduled thread of
/// control.
///
/// Control moves strictly by hand-off: [`Fiber::yield_to`] enters the
/// fiber, [`yield_now`] inside it hands control back. Dropping a
/// suspended fiber is permanent suspension, not an error; the stack and
/// the pending closure are reclaimed with the handle.
pub struct Fiber {
    inner: Box<FiberInner>,
}

impl Fiber {
    /// Spawns a suspended fiber with the default stack size. The fiber
    /// does not run until the first [`Fiber::yield_to`].
    pub fn spawn<F>(f: F) -> io::Result<Self>
    where
        F: FnOnce() + 'static,
    {
        Self::with_stack_size(DEFAULT_STACK_SIZE, f)
    }

    /// Spawns a suspended fiber on a stack of at least `stack_size`
    /// usable bytes.
    pub fn with_stack_size<F>(stack_size: usize, f: F) -> io::Result<Self>
    where
        F: FnOnce() + 'static,
    {
        let stack = GuardedStack::new(stack_size)?;

        let mut inner = Box::new(FiberInner {
            context: ExecutionContext::new(),
            link: ExecutionContext::new(),
            state: Cell::new(FiberState::Suspended),
            entry: UnsafeCell::new(Some(Box::new(f))),
            panic: UnsafeCell::new(None),
            _stack: stack,
        });

        let sp = inner._stack.base().as_ptr() as usize;
        inner.context.set_sp(sp);

        let arg = &*inner as *const FiberInner as usize;
        inner.context.call1(fiber_main, arg);

        trace_switch!("spawned fiber {:#x}", arg);

        Ok(Self { inner })
    }

    /// Hands control to the fiber until it yields or finishes.
    ///
    /// Rejects a running fiber (re-entry) and a finished one with a
    /// reported error. A panic that ended the fiber is re-raised here,
    /// the way joining a panicked thread re-raises its payload.
    pub fn yield_to(&mut self) -> Result<(), FiberError> {
        match self.inner.state.get() {
            FiberState::Running => return Err(FiberError::Running),
            FiberState::Finished => return Err(FiberError::Finished),
            FiberState::Suspended => {}
        }

        let inner: *const FiberInner = &*self.inner;

        self.inner.state.set(FiberState::Running);
        let prev = CURRENT.replace(inner);

        trace_switch!("entering fiber {:#x}", inner as usize);

        // SAFETY: `inner` is kept alive by `self`; the fiber side only
        // touches it through this same pointer while we sit suspended in
        // this frame.
        unsafe { (*inner).link.switch_to(&(*inner).context) };

        CURRENT.set(prev);

        // SAFETY: the fiber is suspended or finished again; exactly one
        // flow of control is looking at `panic` now.
        if let Some(payload) = unsafe { (*(*inner).panic.get()).take() } {
            resume_unwind(payload);
        }

        Ok(())
    }

    /// Whether the fiber's entry function has returned.
    pub fn is_finished(&self) -> bool {
        self.inner.state.get() == FiberState::Finished
    }
}

/// Suspends the current fiber and returns control to whoever resumed it.
/// Returns when the fiber is next yielded to.
///
/// # Panics
/// Panics when called outside of any fiber.
pub fn yield_now() {
    let inner = CURRENT.get();
    assert!(!inner.is_null(), "yield_now() called outside of any fiber");

    // SAFETY: a non-null CURRENT points at the fiber executing right now;
    // its owner sits suspended inside `yield_to` and keeps it alive.
    let inner = unsafe { &*inner };

    inner.state.set(FiberState::Suspended);

    // SAFETY: `link` was captured by the resumer's switch into us and its
    // frame is still live, suspended inside `yield_to`.
    unsafe { inner.context.switch_to(&inner.link) };
}

unsafe extern "C" fn fiber_main(arg: usize) -> ! {
    // SAFETY: `arg` is the address of this fiber's FiberInner, alive for
    // as long as control can be inside the fiber.
    let inner = unsafe { &*(arg as *const FiberInner) };

    // SAFETY: the spawner placed the closure here and never touches the
    // slot again.
    let entry = unsafe { (*inner.entry.get()).take() }.expect("fiber entered twice");

    if let Err(payload) = catch_unwind(AssertUnwindSafe(entry)) {
        // SAFETY: same exclusivity as `entry`; the resumer reads this
        // only after we have switched away.
        unsafe { *inner.panic.get() = Some(payload) };
    }

    inner.state.set(FiberState::Finished);

    trace_switch!("fiber {:#x} finished", arg);

    // The entry function must not return through the trampoline below it:
    // hand control back to the resumer for good.
    unsafe { inner.link.restore() }
}
