use core::arch::naked_asm;
use weft_hal_traits::context::RawContext;

/// Register state of a suspended execution point on x86-64 System V.
///
/// Field order is the record's wire layout. The naked routines below
/// address the fields by displacement, so reordering them is an ABI break.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    rip: u64,
    rsp: u64,
    rbx: u64,
    rbp: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    // Extended states, i.e., FP/SIMD states are not carried across.
}

impl Context {
    pub const fn new() -> Self {
        Self {
            rip: 0,
            rsp: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }

    /// Entry shim for contexts prepared with [`RawContext::call`].
    ///
    /// `call` leaves the target function in `rbx`, its argument in `r12`
    /// and zero in `rbp`. Pushing `rbp` terminates backtraces with a NULL
    /// return address and leaves `rsp` at `16n + 8`, the state the ABI
    /// mandates at function entry.
    #[unsafe(naked)]
    unsafe extern "C" fn do_call() -> ! {
        naked_asm!(
            "mov %r12, %rdi",
            "push %rbp", // NULL return address.
            "jmp *%rbx",
            options(att_syntax),
        );
    }
}

impl RawContext for Context {
    fn new() -> Self {
        Self::new()
    }

    fn set_program_counter(&mut self, pc: usize) {
        self.rip = pc as u64;
    }

    fn set_stack_pointer(&mut self, sp: usize) {
        self.rsp = sp as u64;
    }

    fn call(&mut self, func: unsafe extern "C" fn(usize) -> !, arg: usize) {
        self.set_program_counter(Self::do_call as _);
        self.rbx = func as _;
        self.r12 = arg as _;
        self.rbp = 0; // NULL previous stack frame
    }

    #[unsafe(naked)]
    unsafe extern "C" fn capture(ctx: &mut Self) -> usize {
        naked_asm!(
            "mov (%rsp), %rax", // return address = resume point
            "mov %rax, (%rdi)",
            "lea 8(%rsp), %rax", // caller's rsp once we have returned
            "mov %rax, 8(%rdi)",
            "mov %rbx, 16(%rdi)",
            "mov %rbp, 24(%rdi)",
            "mov %r12, 32(%rdi)",
            "mov %r13, 40(%rdi)",
            "mov %r14, 48(%rdi)",
            "mov %r15, 56(%rdi)",
            "xor %eax, %eax",
            "ret",
            options(att_syntax),
        );
    }

    #[unsafe(naked)]
    unsafe extern "C" fn restore(ctx: &Self) -> ! {
        naked_asm!(
            "mov 16(%rdi), %rbx",
            "mov 24(%rdi), %rbp",
            "mov 32(%rdi), %r12",
            "mov 40(%rdi), %r13",
            "mov 48(%rdi), %r14",
            "mov 56(%rdi), %r15",
            "mov 8(%rdi), %rsp",
            "mov (%rdi), %rcx",
            "mov $1, %eax", // the resumed pass of `capture`
            "jmp *%rcx",
            options(att_syntax),
        );
    }

    #[unsafe(naked)]
    unsafe extern "C" fn switch(from: &mut Self, to: &Self) {
        naked_asm!(
            "mov (%rsp), %rax",
            "mov %rax, (%rdi)",
            "lea 8(%rsp), %rax",
            "mov %rax, 8(%rdi)",
            "mov %rbx, 16(%rdi)",
            "mov %rbp, 24(%rdi)",
            "mov %r12, 32(%rdi)",
            "mov %r13, 40(%rdi)",
            "mov %r14, 48(%rdi)",
            "mov %r15, 56(%rdi)",
            "",
            "mov 16(%rsi), %rbx",
            "mov 24(%rsi), %rbp",
            "mov 32(%rsi), %r12",
            "mov 40(%rsi), %r13",
            "mov 48(%rsi), %r14",
            "mov 56(%rsi), %r15",
            "mov 8(%rsi), %rsp",
            "mov (%rsi), %rcx",
            "mov $1, %eax",
            "jmp *%rcx",
            options(att_syntax),
        );
    }
}
