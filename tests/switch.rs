//! Properties of the raw capture / restore / switch primitives.

#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};

use weft::{Capture, ExecutionContext, GuardedStack, Stack};

#[test]
fn capture_then_restore_round_trips() {
    let ctx = ExecutionContext::new();
    let hits = AtomicUsize::new(0);
    let marker = 0xC0FFEE_usize;

    match unsafe { ctx.capture() } {
        Capture::Fresh => {
            hits.fetch_add(1, Ordering::SeqCst);
            // Control re-enters the capture above, on the Resumed arm.
            unsafe { ctx.restore() };
        }
        Capture::Resumed => {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(marker, 0xC0FFEE);
}

#[test]
fn latest_capture_wins() {
    let ctx = ExecutionContext::new();
    let step = AtomicUsize::new(0);

    // The second capture below overwrites this snapshot; control never
    // comes back here, so the first call only ever sees the fresh pass.
    let first = unsafe { ctx.capture() };
    assert_eq!(first, Capture::Fresh);

    match unsafe { ctx.capture() } {
        Capture::Fresh => {
            step.store(1, Ordering::SeqCst);
            unsafe { ctx.restore() };
        }
        Capture::Resumed => {
            assert_eq!(step.load(Ordering::SeqCst), 1);
            step.store(2, Ordering::SeqCst);
        }
    }

    assert_eq!(step.load(Ordering::SeqCst), 2);
}

struct Handoff {
    main: ExecutionContext,
    target: ExecutionContext,
    entered: AtomicUsize,
}

unsafe extern "C" fn handoff_entry(arg: usize) -> ! {
    let handoff = unsafe { &*(arg as *const Handoff) };
    handoff.entered.fetch_add(1, Ordering::SeqCst);
    unsafe { handoff.main.restore() }
}

/// The first pass of a switch into a freshly prepared context must land in
/// its entry function, not back in the caller.
#[test]
fn switch_into_fresh_context_enters_entry_function() {
    let stack = GuardedStack::new(64 * 1024).expect("stack mapping failed");

    let mut handoff = Box::new(Handoff {
        main: ExecutionContext::new(),
        target: ExecutionContext::new(),
        entered: AtomicUsize::new(0),
    });

    let sp = stack.base().as_ptr() as usize;
    let arg = &*handoff as *const Handoff as usize;
    handoff.target.set_sp(sp);
    handoff.target.call1(handoff_entry, arg);

    assert_eq!(handoff.entered.load(Ordering::SeqCst), 0);
    unsafe { handoff.main.switch_to(&handoff.target) };
    assert_eq!(handoff.entered.load(Ordering::SeqCst), 1);
}

struct PingPong {
    main: ExecutionContext,
    a: ExecutionContext,
    b: ExecutionContext,
    ping_visits: AtomicUsize,
    pong_visits: AtomicUsize,
    order_violations: AtomicUsize,
    rounds: usize,
}

unsafe extern "C" fn ping_loop(arg: usize) -> ! {
    let pp = unsafe { &*(arg as *const PingPong) };
    let mut visits = 0_usize;

    for _ in 0..pp.rounds {
        visits += 1;
        let seen = pp.ping_visits.fetch_add(1, Ordering::SeqCst) + 1;
        if pp.pong_visits.load(Ordering::SeqCst) != seen - 1 {
            pp.order_violations.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { pp.a.switch_to(&pp.b) };
    }

    // The loop counter lives on this fiber's stack and must have survived
    // every round trip.
    if visits != pp.rounds {
        pp.order_violations.fetch_add(1, Ordering::SeqCst);
    }

    unsafe { pp.main.restore() }
}

unsafe extern "C" fn pong_loop(arg: usize) -> ! {
    let pp = unsafe { &*(arg as *const PingPong) };

    loop {
        let seen = pp.pong_visits.fetch_add(1, Ordering::SeqCst) + 1;
        if pp.ping_visits.load(Ordering::SeqCst) != seen {
            pp.order_violations.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { pp.b.switch_to(&pp.a) };
    }
}

/// Drives the A,B,A,B,... hand-off for `rounds` visits per side and
/// reports (ping visits, pong visits, ordering violations). Assertions
/// happen back on the test thread so a failure unwinds a normal stack.
fn run_ping_pong(rounds: usize) -> (usize, usize, usize) {
    let stack_a = GuardedStack::new(64 * 1024).expect("stack mapping failed");
    let stack_b = GuardedStack::new(64 * 1024).expect("stack mapping failed");

    let mut pp = Box::new(PingPong {
        main: ExecutionContext::new(),
        a: ExecutionContext::new(),
        b: ExecutionContext::new(),
        ping_visits: AtomicUsize::new(0),
        pong_visits: AtomicUsize::new(0),
        order_violations: AtomicUsize::new(0),
        rounds,
    });

    let arg = &*pp as *const PingPong as usize;
    let sp_a = stack_a.base().as_ptr() as usize;
    let sp_b = stack_b.base().as_ptr() as usize;

    pp.a.set_sp(sp_a);
    pp.a.call1(ping_loop, arg);
    pp.b.set_sp(sp_b);
    pp.b.call1(pong_loop, arg);

    unsafe { pp.main.switch_to(&pp.a) };

    // `b` is left permanently suspended in its loop; never resuming it is
    // an ordinary outcome, not an error.
    (
        pp.ping_visits.load(Ordering::SeqCst),
        pp.pong_visits.load(Ordering::SeqCst),
        pp.order_violations.load(Ordering::SeqCst),
    )
}

#[test]
fn ping_pong_alternates_strictly() {
    let (ping, pong, violations) = run_ping_pong(1000);
    assert_eq!(ping, 1000);
    assert_eq!(pong, 1000);
    assert_eq!(violations, 0);
}

#[test]
fn one_million_switches_keep_exact_counts() {
    let (ping, pong, violations) = run_ping_pong(500_000);
    assert_eq!(ping, 500_000);
    assert_eq!(pong, 500_000);
    assert_eq!(violations, 0);
}
