use rtloop::{
    ChannelConfig, Configuration, JsonMessage, SimulatedEventLoopFactory, ThreadConfiguration,
    ThreadCoordinator,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Value {
    value: i64,
}

impl JsonMessage for Value {
    const TYPE: &'static str = "test.Value";
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Records the level and message of every event.
#[derive(Clone, Default)]
struct EventRecorder {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl EventRecorder {
    fn contains(&self, level: Level, message: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(recorded, text)| *recorded == level && text == message)
    }
}

impl<S: Subscriber> Layer<S> for EventRecorder {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

#[test]
fn test_rejected_send_is_a_warning() {
    let recorder = EventRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());

    tracing::subscriber::with_default(subscriber, || {
        let configuration = Configuration::default()
            .with_channel(ChannelConfig::new("/tiny", Value::TYPE).with_max_size(4));
        let factory = SimulatedEventLoopFactory::new(configuration);
        let runtime = factory.make_runtime("app").unwrap();
        let sender = runtime.make_sender::<Value>("/tiny").unwrap();

        assert!(!sender.send_message(&Value { value: 12345 }).unwrap());
    });

    assert!(recorder.contains(Level::WARN, "send rejected"));
    assert!(recorder.contains(Level::DEBUG, "made sender"));
}

#[test]
fn test_thread_wait_is_reported() {
    let recorder = EventRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());

    let coordinator = Arc::new(ThreadCoordinator::new(
        "app",
        Some(vec![ThreadConfiguration::new("worker")]),
    ));
    coordinator.lock_to_thread().unwrap();

    tracing::subscriber::with_default(subscriber, || {
        let worker = {
            let coordinator = coordinator.clone();
            std::thread::spawn(move || {
                coordinator
                    .configure_thread_and_wait_for_run("worker")
                    .map(drop)
            })
        };

        coordinator
            .wait_for_non_ignored_threads(Duration::from_secs(5))
            .unwrap();
        coordinator.allow_threads_to_start();
        worker.join().unwrap().unwrap();
    });

    assert!(recorder.contains(Level::INFO, "Waiting 5s for 1 thread to start."));
    assert!(recorder.contains(Level::INFO, "Threads have started. Continuing."));
}

#[test]
fn test_thread_timeout_is_an_error() {
    let recorder = EventRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());

    let coordinator = ThreadCoordinator::new(
        "app",
        Some(vec![
            ThreadConfiguration::new("first"),
            ThreadConfiguration::new("second"),
        ]),
    );
    coordinator.lock_to_thread().unwrap();

    tracing::subscriber::with_default(subscriber, || {
        assert!(
            coordinator
                .wait_for_non_ignored_threads(Duration::from_millis(20))
                .is_err()
        );
    });

    assert!(recorder.contains(Level::INFO, "Waiting 20ms for 2 threads to start."));
    let events = recorder.events.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|(level, text)| *level == Level::ERROR && text.contains("2 of 2 thread(s)")),
        "Timeout should be logged as an error before it is returned"
    );
}
