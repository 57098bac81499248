use rtloop::{RealtimeAllocator, RealtimeScope, is_realtime_thread};
use std::process::Command;

#[global_allocator]
static GLOBAL: RealtimeAllocator = RealtimeAllocator;

/// Set when this binary is re-executed to run the aborting child test.
const CHILD_ENV: &str = "RTLOOP_REALTIME_ALLOC_CHILD";

#[test]
fn test_allocation_outside_scope_is_allowed() {
    let values: Vec<u64> = (0..64).collect();
    assert_eq!(values.len(), 64);
    assert!(!is_realtime_thread());
}

#[test]
fn test_scopes_nest() {
    {
        let _outer = RealtimeScope::enter();
        {
            let _inner = RealtimeScope::enter();
        }
        assert!(is_realtime_thread(), "Inner scope restores the outer state");
    }
    assert!(!is_realtime_thread());
}

#[test]
fn test_free_inside_scope_is_allowed() {
    let buffer = vec![0u8; 128];
    let scope = RealtimeScope::enter();
    drop(buffer);
    drop(scope);
    assert!(!is_realtime_thread());
}

#[test]
fn child_allocates_in_realtime_scope() {
    if std::env::var_os(CHILD_ENV).is_none() {
        return;
    }

    let _scope = RealtimeScope::enter();
    let buffer: Vec<u8> = Vec::with_capacity(std::hint::black_box(64));
    std::hint::black_box(&buffer);
}

#[test]
fn test_allocation_in_realtime_scope_aborts() {
    let output = Command::new(std::env::current_exe().unwrap())
        .args([
            "child_allocates_in_realtime_scope",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();

    assert!(!output.status.success(), "Child must abort");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("RAW: Malloced 64 bytes on a real-time thread"),
        "Unexpected stderr: {stderr}"
    );
}
