use rtloop::{
    ApplicationConfig, Configuration, EventLoop, SimulatedEventLoopFactory, ThreadConfiguration,
    ThreadCoordinator, ThreadError, is_realtime_thread,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn coordinator(threads: &[&str]) -> Arc<ThreadCoordinator> {
    let threads = threads
        .iter()
        .map(|name| ThreadConfiguration::new(*name))
        .collect();
    Arc::new(ThreadCoordinator::new("app", Some(threads)))
}

fn configure_in_worker(
    coordinator: &Arc<ThreadCoordinator>,
    name: &'static str,
) -> thread::JoinHandle<Result<String, ThreadError>> {
    let coordinator = coordinator.clone();
    thread::spawn(move || {
        coordinator
            .configure_thread_and_wait_for_run(name)
            .map(|handle| handle.configuration().name.clone())
    })
}

#[test]
fn test_configure_and_release() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let worker = configure_in_worker(&coordinator, "worker");
    coordinator.wait_for_non_ignored_threads(WAIT).unwrap();
    coordinator.allow_threads_to_start();

    assert_eq!(worker.join().unwrap().unwrap(), "worker");
}

#[test]
fn test_configure_same_name_twice() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let first = configure_in_worker(&coordinator, "worker");
    coordinator.wait_for_non_ignored_threads(WAIT).unwrap();

    let second = configure_in_worker(&coordinator, "worker");
    let error = second.join().unwrap().unwrap_err();
    assert_eq!(
        error.to_string(),
        "Another thread has already been configured under the name worker. Please fix."
    );

    let error = coordinator.ignore_thread("worker").unwrap_err();
    assert_eq!(
        error.to_string(),
        "Cannot ignore thread worker that was already configured. Please fix."
    );

    coordinator.allow_threads_to_start();
    assert!(first.join().unwrap().is_ok());
}

#[test]
fn test_configure_unknown_thread() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let error = configure_in_worker(&coordinator, "nope")
        .join()
        .unwrap()
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "No thread with name \"nope\" found in the configuration for application app."
    );
}

#[test]
fn test_configure_without_thread_section() {
    let coordinator = Arc::new(ThreadCoordinator::new("app", None));
    coordinator.lock_to_thread().unwrap();

    let error = configure_in_worker(&coordinator, "worker")
        .join()
        .unwrap()
        .unwrap_err();
    assert_eq!(
        error,
        ThreadError::NoThreadConfiguration {
            application: "app".to_owned()
        }
    );
    assert_eq!(coordinator.num_non_ignored_threads(), 0);
    assert!(coordinator.wait_for_non_ignored_threads(WAIT).is_ok());
}

#[test]
fn test_configure_from_main_thread() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let error = coordinator
        .configure_thread_and_wait_for_run("worker")
        .err()
        .unwrap();
    assert_eq!(error.to_string(), "Do not call this function from the main thread.");
}

#[test]
fn test_configure_without_lock() {
    let coordinator = coordinator(&["worker"]);

    let error = configure_in_worker(&coordinator, "worker")
        .join()
        .unwrap()
        .unwrap_err();
    assert_eq!(error.to_string(), "Call LockToThread() before constructing any threads.");
}

#[test]
fn test_lock_after_configure() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let worker = configure_in_worker(&coordinator, "worker");
    coordinator.wait_for_non_ignored_threads(WAIT).unwrap();

    assert_eq!(coordinator.lock_to_thread(), Err(ThreadError::NotLocked));

    coordinator.allow_threads_to_start();
    assert!(worker.join().unwrap().is_ok());
}

#[test]
fn test_ignore_thread() {
    let coordinator = coordinator(&["worker", "helper"]);
    coordinator.lock_to_thread().unwrap();
    assert_eq!(coordinator.num_non_ignored_threads(), 2);

    coordinator.ignore_thread("helper").unwrap();
    assert_eq!(coordinator.num_non_ignored_threads(), 1);

    let error = coordinator.ignore_thread("helper").unwrap_err();
    assert_eq!(
        error.to_string(),
        "Ignoring the same thread (helper) twice. Likely a mistake. Please fix."
    );

    let error = configure_in_worker(&coordinator, "helper")
        .join()
        .unwrap()
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "Cannot configure thread helper that was already ignored. Please fix."
    );
}

#[test]
fn test_ignore_from_worker() {
    let coordinator = coordinator(&["worker"]);
    coordinator.lock_to_thread().unwrap();

    let worker = {
        let coordinator = coordinator.clone();
        thread::spawn(move || coordinator.ignore_thread("worker"))
    };
    let error = worker.join().unwrap().unwrap_err();
    assert_eq!(error.to_string(), "Call from the main thread instead.");
}

#[test]
fn test_wait_times_out() {
    let coordinator = coordinator(&["worker", "helper"]);
    coordinator.lock_to_thread().unwrap();

    let error = coordinator
        .wait_for_non_ignored_threads(Duration::from_millis(50))
        .unwrap_err();

    assert_eq!(
        error,
        ThreadError::Timeout {
            timeout: Duration::from_millis(50),
            missing: 2,
            expected: 2,
        }
    );
    assert!(error.to_string().starts_with("Not all threads started within 50ms."));
}

#[test]
fn test_realtime_thread_handle() {
    let coordinator = Arc::new(ThreadCoordinator::new(
        "app",
        Some(vec![ThreadConfiguration::new("rt").with_priority(1)]),
    ));
    coordinator.lock_to_thread().unwrap();

    let worker = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            let handle = coordinator.configure_thread_and_wait_for_run("rt").unwrap();
            let inside = (handle.is_realtime(), is_realtime_thread());
            drop(handle);
            (inside, is_realtime_thread())
        })
    };

    coordinator.wait_for_non_ignored_threads(WAIT).unwrap();
    coordinator.allow_threads_to_start();

    let ((flagged, realtime), after) = worker.join().unwrap();
    assert!(flagged && realtime, "Handle should put the thread in real-time mode");
    assert!(!after, "Dropping the handle should leave real-time mode");
    assert!(!is_realtime_thread());
}

fn factory_with_thread(timeout: Duration) -> SimulatedEventLoopFactory {
    let configuration = Configuration::default().with_application(
        ApplicationConfig::new("app").with_thread(ThreadConfiguration::new("test_thread")),
    );
    SimulatedEventLoopFactory::builder(configuration)
        .thread_configuration_timeout(timeout)
        .build()
}

#[test]
fn test_run_waits_for_worker_and_releases_it() {
    let factory = factory_with_thread(WAIT);
    let event_loop = factory.make_event_loop("app");
    let coordinator = event_loop.thread_coordinator().clone();

    let (to_main, from_worker) = mpsc::channel();
    let (to_worker, from_main) = mpsc::channel::<()>();
    let worker = thread::spawn(move || {
        let _handle = coordinator
            .configure_thread_and_wait_for_run("test_thread")
            .unwrap();
        to_main.send("released").unwrap();
        from_main.recv_timeout(WAIT).unwrap();
    });

    let received = Rc::new(RefCell::new(Vec::new()));
    event_loop.on_run(Box::new({
        let received = received.clone();
        move || {
            // Worker threads are released before run-start callbacks fire.
            let message = from_worker.recv_timeout(WAIT).unwrap();
            received.borrow_mut().push(message);
            to_worker.send(()).unwrap();
        }
    }));

    factory.run_for(1_000_000).unwrap();
    worker.join().unwrap();

    assert_eq!(*received.borrow(), vec!["released"]);
}

#[test]
fn test_run_waits_for_threads_only_once() {
    let factory = factory_with_thread(Duration::from_millis(500));
    let event_loop = factory.make_event_loop("app");
    let coordinator = event_loop.thread_coordinator().clone();

    let worker = thread::spawn(move || {
        coordinator
            .configure_thread_and_wait_for_run("test_thread")
            .map(|_| ())
    });

    let runs = Rc::new(Cell::new(0));
    event_loop.on_run(Box::new({
        let runs = runs.clone();
        move || runs.set(runs.get() + 1)
    }));

    for _ in 0..3 {
        factory.run_for(1_000_000).unwrap();
    }
    worker.join().unwrap().unwrap();

    assert_eq!(runs.get(), 3, "Every run fires run-start callbacks");
}

#[test]
fn test_run_times_out_without_worker() {
    let factory = factory_with_thread(Duration::from_millis(50));
    let _event_loop = factory.make_event_loop("app");

    let error = factory.run_for(1_000_000).unwrap_err();
    assert!(matches!(
        error,
        ThreadError::Timeout {
            missing: 1,
            expected: 1,
            ..
        }
    ));
}

#[test]
fn test_run_after_ignoring_missing_worker() {
    let factory = factory_with_thread(Duration::from_millis(50));
    let event_loop = factory.make_event_loop("app");

    event_loop
        .thread_coordinator()
        .ignore_thread("test_thread")
        .unwrap();
    factory.run_for(1_000_000).unwrap();
}
