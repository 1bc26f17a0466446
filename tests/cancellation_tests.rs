//! Slow-script detection and cross-thread SCRIPT KILL behavior.

mod common;

use cinder_script::digest::sha1_hex;
use cinder_script::{Error, IoScheduler, Options, WireReply, KILL_ALL};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SPIN_FOREVER: &str = "while true do end";

/// Options tuned so the controller checks in quickly.
fn responsive() -> Options {
    Options::new().time_limit_ms(5000).hook_instruction_period(1000)
}

struct CountingScheduler {
    count: Mutex<u32>,
}

impl CountingScheduler {
    fn new() -> Arc<Self> {
        Arc::new(Self { count: Mutex::new(0) })
    }
}

impl IoScheduler for CountingScheduler {
    fn continue_events(&self) {
        *self.count.lock() += 1;
    }
}

#[test]
fn test_kill_all_terminates_running_script() {
    let (_dispatcher, pool) = common::pool_with(responsive());
    let pool = Arc::new(pool);
    let mut engine = pool.engine(1).unwrap();

    let killer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            pool.kill(KILL_ALL);
        })
    };

    let err = engine.eval(SPIN_FOREVER, &[], &[]).unwrap_err();
    killer.join().unwrap();

    assert!(err.is_killed(), "expected kill, got: {}", err);
    assert!(err.to_string().contains("SCRIPT KILL"));
    // Cleanup completed: the engine accepts the next run.
    assert_eq!(engine.eval("return 5", &[], &[]).unwrap(), WireReply::Integer(5));
}

#[test]
fn test_kill_by_exact_function_name() {
    let (_dispatcher, pool) = common::pool_with(responsive());
    let pool = Arc::new(pool);
    let digest = sha1_hex(SPIN_FOREVER.as_bytes());
    let mut engine = pool.engine(1).unwrap();

    let killer = {
        let pool = Arc::clone(&pool);
        let digest = digest.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            pool.kill(&digest);
        })
    };

    let err = engine.eval(SPIN_FOREVER, &[], &[]).unwrap_err();
    killer.join().unwrap();

    match err {
        Error::Killed { function } => assert_eq!(function, digest),
        other => panic!("expected kill, got: {}", other),
    }
}

#[test]
fn test_kill_with_other_name_leaves_script_alone() {
    let (_dispatcher, pool) = common::pool_with(responsive());
    let pool = Arc::new(pool);

    let killer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            pool.kill(&"d".repeat(40));
        })
    };

    let mut engine = pool.engine(1).unwrap();
    // Long enough that the mismatched kill arrives mid-run.
    let reply = engine
        .eval("local x = 0 for i = 1, 30000000 do x = x + 1 end return x", &[], &[])
        .unwrap();
    killer.join().unwrap();

    assert_eq!(reply, WireReply::Integer(30_000_000));
}

#[test]
fn test_slow_script_is_flagged_but_not_aborted() {
    let scheduler = CountingScheduler::new();
    let (_dispatcher, pool) = {
        let (dispatcher, pool) = common::pool_with(
            Options::new().time_limit_ms(1).hook_instruction_period(1000),
        );
        (dispatcher, pool.with_scheduler(scheduler.clone()))
    };
    let mut engine = pool.engine(1).unwrap();

    let reply = engine
        .eval("local x = 0 for i = 1, 5000000 do x = x + 1 end return x", &[], &[])
        .unwrap();

    assert_eq!(reply, WireReply::Integer(5_000_000));
    // The ceiling was crossed: the controller yielded to the I/O scheduler
    // instead of aborting, and the flag did not outlive the run.
    assert!(*scheduler.count.lock() > 0);
    assert!(pool.running().is_empty());
}

#[test]
fn test_running_scripts_visible_across_threads() {
    let (_dispatcher, pool) = common::pool_with(responsive());
    let pool = Arc::new(pool);
    let digest = sha1_hex(SPIN_FOREVER.as_bytes());

    let worker = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut engine = pool.engine(9).unwrap();
            engine.eval(SPIN_FOREVER, &[], &[])
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !pool.running().contains(&digest) {
        assert!(Instant::now() < deadline, "script never became visible");
        thread::sleep(Duration::from_millis(5));
    }

    pool.kill(&digest);
    let result = worker.join().unwrap();
    assert!(result.unwrap_err().is_killed());
    assert!(pool.running().is_empty());
}

#[test]
fn test_kill_before_run_does_not_abort_next_run() {
    let (_dispatcher, pool) = common::pool_with(responsive());
    let mut engine = pool.engine(1).unwrap();

    // Fired while the session is idle; drained harmlessly at the next
    // run boundary.
    pool.kill(KILL_ALL);
    assert_eq!(engine.eval("return 8", &[], &[]).unwrap(), WireReply::Integer(8));
}
