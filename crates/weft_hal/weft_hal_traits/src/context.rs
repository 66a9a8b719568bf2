pub trait RawContext: Sized {
    /// Creates a new context with the instruction pointer and stack pointer
    /// set to zero (a.k.a. some invalid state).
    ///
    /// Restoring the created context without setting the instruction pointer
    /// and stack pointer first is undefined behavior.
    fn new() -> Self;

    fn set_program_counter(&mut self, pc: usize);
    fn set_stack_pointer(&mut self, sp: usize);

    /// Sets the instruction pointer to the given function and prepares the
    /// context to call it with the given argument on its first restore.
    ///
    /// The stack pointer must already point at the base of a fresh stack.
    /// `func` must never return: there is no frame below it.
    fn call(&mut self, func: unsafe extern "C" fn(usize) -> !, arg: usize);

    /// Saves the calling execution point into `ctx`.
    ///
    /// Returns 0 on the direct call. Returns nonzero when control re-enters
    /// the same call site because `ctx` was restored or switched into, so a
    /// single call can return twice in real time.
    ///
    /// # Safety
    /// `ctx` must be writable. The snapshot references the caller's stack;
    /// restoring it after that stack frame is gone is undefined behavior.
    unsafe extern "C" fn capture(ctx: &mut Self) -> usize;

    /// Loads `ctx` and transfers control to its resume address. Does not
    /// return to the caller.
    ///
    /// # Safety
    /// `ctx` must have been populated by a prior capture or switch (or by
    /// `call` on a fresh stack) and its stack must still be live. Violations
    /// are undefined behavior, not reported errors: by the time they could
    /// be detected, the calling convention has already been abandoned.
    unsafe extern "C" fn restore(ctx: &Self) -> !;

    /// Saves the calling execution point into `from`, then restores `to`,
    /// as one indivisible sequence. Returns only when some other context
    /// later restores or switches into `from`.
    ///
    /// # Safety
    /// Same contract as [`RawContext::restore`] for `to`; `from` must be
    /// writable.
    unsafe extern "C" fn switch(from: &mut Self, to: &Self);
}
