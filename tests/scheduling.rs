//! End-to-end scheduling scenarios, driven on the host through the
//! recording port. PendSV is modeled by `switch`: a pending switch is
//! taken by calling `select_next`.

use core::ffi::c_void;
use core::ptr;

use rtk::arch::sim::SimPort;
use rtk::config::FOREVER_TICK;
use rtk::scheduler::Scheduler;
use rtk::semaphore::{RawSemaphore, TakeResult, TakeStep};
use rtk::task::{TaskConfig, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

extern "C" fn spin(_: *mut c_void) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn stack() -> &'static mut [u32] {
    Box::leak(vec![0u32; 128].into_boxed_slice())
}

fn boot(tasks: &[(&'static str, u8)]) -> (Scheduler<SimPort>, Vec<TaskId>) {
    let mut sched = Scheduler::new(SimPort::new());
    sched.init();
    let ids = tasks
        .iter()
        .map(|&(name, priority)| {
            let config = TaskConfig { name, priority, stack: stack() };
            sched.create_task(spin, config, ptr::null_mut()).unwrap()
        })
        .collect();
    sched.start(stack()).unwrap();
    (sched, ids)
}

fn switch(sched: &mut Scheduler<SimPort>) -> Option<TaskId> {
    if sched.port().take_pending() {
        sched.select_next()
    } else {
        sched.current()
    }
}

fn step(sched: &mut Scheduler<SimPort>) -> Option<TaskId> {
    if sched.tick() {
        sched.request_switch();
    }
    switch(sched)
}

fn name(sched: &Scheduler<SimPort>, id: Option<TaskId>) -> &'static str {
    id.and_then(|id| sched.task(id)).map_or("-", |tcb| tcb.name())
}

fn pending(step: TakeStep) -> rtk::scheduler::BlockToken {
    match step {
        TakeStep::Pending(token) => token,
        TakeStep::Done(result) => panic!("take resolved without blocking: {:?}", result),
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn equal_periods_run_each_task_once_per_round() {
    let (mut sched, ids) = boot(&[("A", 1), ("B", 1), ("C", 1)]);
    let mut runs = Vec::new();

    while runs.len() < 12 {
        let current = sched.current().unwrap();
        if ids.contains(&current) {
            runs.push(current);
            sched.delay_current(3);
            switch(&mut sched);
        } else {
            step(&mut sched);
        }
    }

    for round in runs.chunks(3) {
        let mut seen = round.to_vec();
        seen.sort_by_key(|id| id.index());
        assert_eq!(seen, ids, "round {:?}", round);
    }
}

#[test]
fn busy_peers_rotate_every_tick() {
    let (mut sched, _) = boot(&[("A", 2), ("B", 2), ("LOW", 1)]);
    let mut order = Vec::new();
    for _ in 0..6 {
        let next = step(&mut sched);
        order.push(name(&sched, next));
    }
    assert_eq!(order, ["B", "A", "B", "A", "B", "A"]);
}

#[test]
fn higher_priority_task_is_selected_next() {
    let (mut sched, ids) = boot(&[("LOW", 1)]);
    assert_eq!(sched.current(), Some(ids[0]));

    let config = TaskConfig { name: "HIGH", priority: 3, stack: stack() };
    let high = sched.create_task(spin, config, ptr::null_mut()).unwrap();
    assert!(sched.preempts_current(high));
    assert_eq!(sched.select_next(), Some(high));
    assert_eq!(sched.task(ids[0]).map(|t| t.state()), Some(TaskState::Ready));
}

#[test]
fn periodic_delay_does_not_drift() {
    let (mut sched, ids) = boot(&[("PERIODIC", 2)]);
    let mut wakes = Vec::new();

    for burn in [0u32, 4, 9, 1, 6] {
        for _ in 0..burn {
            step(&mut sched);
        }
        sched.delay_current(10);
        switch(&mut sched);
        while sched.current() != Some(ids[0]) {
            step(&mut sched);
        }
        wakes.push(sched.tick_count());
    }

    assert_eq!(wakes, [10, 20, 30, 40, 50]);
}

#[test]
fn missed_ticks_are_replayed_on_resume() {
    let (mut sched, ids) = boot(&[("HIGH", 2), ("LOW", 1)]);
    sched.delay_current(5);
    assert_eq!(switch(&mut sched), Some(ids[1]));

    sched.suspend();
    for _ in 0..8 {
        assert_eq!(step(&mut sched), Some(ids[1]));
    }
    assert_eq!(sched.tick_count(), 0);

    assert!(sched.resume());
    assert_eq!(sched.tick_count(), 8);
    assert_eq!(switch(&mut sched), Some(ids[0]));
    assert_eq!(sched.task(ids[0]).map(|t| t.delay_woken_tick()), Some(5));
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

#[test]
fn give_wakes_blocked_high_priority_task_before_peers() {
    let (mut sched, ids) = boot(&[("P0", 0), ("P1", 1), ("P2", 2)]);
    let (p0, p1, p2) = (ids[0], ids[1], ids[2]);
    let mut sem = RawSemaphore::new(0);

    assert_eq!(sched.current(), Some(p2));
    let token = pending(sem.begin_take(&mut sched, 5));
    assert_eq!(switch(&mut sched), Some(p1));
    sched.delay_current(3);
    assert_eq!(switch(&mut sched), Some(p0));

    step(&mut sched);
    assert_eq!(step(&mut sched), Some(p0));

    // Tick 3: P1 wakes, then P0 gives before the switch is taken.
    assert!(sched.tick());
    assert_eq!(sched.tick_count(), 3);
    assert!(sem.give(&mut sched));
    assert!(sched.port().is_pending());

    assert_eq!(switch(&mut sched), Some(p2));
    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::Acquired);
    assert_eq!(sched.task(p2).map(|t| t.delay_woken_tick()), Some(3));
    assert_eq!(sem.count(), 0);

    sched.delay_current(100);
    assert_eq!(switch(&mut sched), Some(p1));
}

#[test]
fn take_times_out_after_exactly_timeout_ticks() {
    let (mut sched, ids) = boot(&[("WAITER", 2), ("OTHER", 1)]);
    let mut sem = RawSemaphore::new(0);

    let token = pending(sem.begin_take(&mut sched, 7));
    assert_eq!(token.deadline(), 7);
    switch(&mut sched);

    for _ in 1..7 {
        assert_ne!(step(&mut sched), Some(ids[0]));
    }
    assert_eq!(step(&mut sched), Some(ids[0]));
    assert_eq!(sched.tick_count(), 7);

    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::TimedOut);
    assert_eq!(sem.waiting(), 0);
    assert_eq!(sched.delayed_len(), 0);
    assert_eq!(sched.next_wakeup(), FOREVER_TICK);
    assert!(sched.lists_consistent());
}

#[test]
fn give_in_deadline_tick_before_waiter_runs() {
    let (mut sched, ids) = boot(&[("WAITER", 2), ("OTHER", 1)]);
    let mut sem = RawSemaphore::new(0);

    let token = pending(sem.begin_take(&mut sched, 4));
    switch(&mut sched);
    for _ in 0..3 {
        step(&mut sched);
    }

    // The deadline tick wakes the waiter, the give lands before it runs.
    assert!(sched.tick());
    assert!(sem.give(&mut sched));
    assert_eq!(switch(&mut sched), Some(ids[0]));

    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::Acquired);
    assert_eq!(sem.count(), 0);
    assert_eq!(sem.waiting(), 0);
}

#[test]
fn give_in_deadline_tick_after_waiter_ran() {
    let (mut sched, ids) = boot(&[("WAITER", 2), ("OTHER", 1)]);
    let mut sem = RawSemaphore::new(0);

    let token = pending(sem.begin_take(&mut sched, 4));
    switch(&mut sched);
    for _ in 0..4 {
        step(&mut sched);
    }
    assert_eq!(sched.current(), Some(ids[0]));
    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::TimedOut);

    // The unit is banked, not lost.
    assert!(!sem.give(&mut sched));
    assert_eq!(sem.count(), 1);
}

#[test]
fn give_before_deadline_cancels_timeout() {
    let (mut sched, ids) = boot(&[("WAITER", 2), ("OTHER", 1)]);
    let mut sem = RawSemaphore::new(0);

    let token = pending(sem.begin_take(&mut sched, 4));
    switch(&mut sched);
    step(&mut sched);
    assert!(sem.give(&mut sched));
    assert_eq!(sched.next_wakeup(), FOREVER_TICK);
    assert_eq!(switch(&mut sched), Some(ids[0]));
    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::Acquired);

    // Nothing left to expire.
    for _ in 0..10 {
        step(&mut sched);
    }
    assert_eq!(sched.delayed_len(), 0);
}

#[test]
fn wait_forever_outlasts_many_ticks() {
    let (mut sched, ids) = boot(&[("WAITER", 3), ("OTHER", 1)]);
    let mut sem = RawSemaphore::new(0);

    let token = pending(sem.begin_take(&mut sched, FOREVER_TICK));
    switch(&mut sched);
    for _ in 0..1000 {
        assert_eq!(step(&mut sched), Some(ids[1]));
    }

    assert!(sem.give(&mut sched));
    assert_eq!(switch(&mut sched), Some(ids[0]));
    assert_eq!(sem.finish_take(&mut sched, token), TakeResult::Acquired);
}
