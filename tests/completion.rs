use futures::FutureExt;
use proptest::prelude::*;
use rtloop::{Completion, Error};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_pending_completion_has_no_result() {
    let completion: Completion<i32> = Completion::new();

    assert!(!completion.is_completed());
    assert!(matches!(completion.result(), Err(Error::ResultNotReady)));
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let completion = Completion::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for id in 0..3 {
        let order = order.clone();
        completion.add_done_callback(move || order.borrow_mut().push(id));
    }
    assert!(order.borrow().is_empty(), "Callbacks must wait for the result");

    completion.set_result("done").unwrap();

    assert_eq!(*order.borrow(), vec![0, 1, 2]);
    assert_eq!(completion.result().unwrap(), "done");
}

#[test]
fn test_late_callback_runs_immediately() {
    let completion = Completion::new();
    completion.set_result(1).unwrap();

    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    completion.add_done_callback(move || flag.set(true));

    assert!(fired.get(), "Callback registered after resolution should fire at once");
}

#[test]
fn test_second_set_result_fails() {
    let completion = Completion::new();
    completion.set_result(1).unwrap();

    let error = completion.set_result(2).unwrap_err();

    assert!(matches!(error, Error::AlreadyCompleted));
    assert!(error.is_usage());
    assert_eq!(completion.result().unwrap(), 1, "First result must be kept");
}

#[test]
fn test_callback_can_read_result() {
    let completion = Completion::new();
    let seen = Rc::new(Cell::new(0));

    let handle = completion.clone();
    let sink = seen.clone();
    completion.add_done_callback(move || sink.set(handle.result().unwrap()));

    completion.set_result(42).unwrap();
    assert_eq!(seen.get(), 42);
}

#[test]
fn test_await_pending_and_resolved() {
    let completion = Completion::new();

    assert_eq!(
        completion.clone().into_future().now_or_never(),
        None,
        "Awaiting a pending completion should not finish"
    );

    completion.set_result(7u8).unwrap();
    assert_eq!(completion.into_future().now_or_never(), Some(7));
}

#[test]
fn test_clones_share_state() {
    let first = Completion::new();
    let second = first.clone();

    second.set_result(3).unwrap();

    assert!(first.is_completed());
    assert_eq!(first.result().unwrap(), 3);
}

proptest! {
    #[test]
    fn test_every_callback_fires_exactly_once(
        value in any::<i64>(),
        before in 0usize..16,
        after in 0usize..16,
    ) {
        let completion = Completion::new();
        let counts = Rc::new(RefCell::new(vec![0u32; before + after]));

        for index in 0..before {
            let counts = counts.clone();
            completion.add_done_callback(move || counts.borrow_mut()[index] += 1);
        }
        prop_assert!(!completion.is_completed());

        completion.set_result(value).unwrap();

        for index in before..before + after {
            let counts = counts.clone();
            completion.add_done_callback(move || counts.borrow_mut()[index] += 1);
        }

        prop_assert!(completion.is_completed());
        prop_assert_eq!(completion.result().unwrap(), value);
        prop_assert!(counts.borrow().iter().all(|count| *count == 1));
        prop_assert!(completion.set_result(value).is_err());
        prop_assert!(counts.borrow().iter().all(|count| *count == 1));
    }
}
