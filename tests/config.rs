use rtloop::{
    ApplicationConfig, Channel, ChannelConfig, Configuration, Error, JsonMessage,
    SimulatedEventLoopFactory, ThreadConfiguration,
};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Value {
    value: i64,
}

impl JsonMessage for Value {
    const TYPE: &'static str = "test.Value";
}

const CONFIGURATION: &str = r#"{
    "channels": [
        { "name": "/test", "type": "demo.Ping" },
        { "name": "/test", "type": "demo.Pong", "frequency": 200, "max_size": 64 }
    ],
    "applications": [
        { "name": "ping" },
        {
            "name": "logger",
            "threads": [
                { "name": "writer" },
                { "name": "compressor", "priority": 20, "affinity": 1 }
            ]
        }
    ]
}"#;

#[test]
fn test_parse_applies_defaults() {
    let configuration = Configuration::from_json(CONFIGURATION).unwrap();

    assert_eq!(configuration.channels.len(), 2);
    assert_eq!(configuration.channel_storage_duration_ns, 2_000_000_000);

    let ping = &configuration.channels[0];
    assert_eq!(ping.channel(), Channel::new("/test", "demo.Ping"));
    assert_eq!(ping.frequency, 100, "Default frequency");
    assert_eq!(ping.max_size, 1000, "Default max size");

    let pong = configuration
        .channel(&Channel::new("/test", "demo.Pong"))
        .unwrap();
    assert_eq!(pong.frequency, 200);
    assert_eq!(pong.max_size, 64);
}

#[test]
fn test_parse_applications() {
    let configuration = Configuration::from_json(CONFIGURATION).unwrap();

    let ping = configuration.application("ping").unwrap();
    assert_eq!(ping.threads, None, "No thread section");

    let logger = configuration.application("logger").unwrap();
    let threads = logger.threads.as_ref().unwrap();
    assert_eq!(threads.len(), 2);
    assert!(!threads[0].is_realtime());
    assert_eq!(threads[1].priority, Some(20));
    assert_eq!(threads[1].affinity, Some(1));
    assert!(threads[1].is_realtime());

    assert!(configuration.application("missing").is_none());
}

#[test]
fn test_malformed_configuration() {
    let error = Configuration::from_json("{ \"channels\": 3 }").unwrap_err();
    assert!(matches!(error, Error::Malformed(_)));
    assert_eq!(error.as_label(), "malformed");
}

#[test]
fn test_read_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIGURATION.as_bytes()).unwrap();

    let configuration = Configuration::read_from_file(file.path()).unwrap();
    assert_eq!(configuration, Configuration::from_json(CONFIGURATION).unwrap());

    let missing = Configuration::read_from_file(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(Error::Io(_))));
}

#[test]
fn test_serialization_keeps_everything() {
    let configuration = Configuration::default()
        .with_channel(ChannelConfig::new("/a", "x.A").with_frequency(3).with_max_size(10))
        .with_application(
            ApplicationConfig::new("app")
                .with_thread(ThreadConfiguration::new("worker").with_priority(5)),
        );

    let text = configuration.to_json().unwrap();
    assert!(text.contains("\"type\""), "Type name is serialized as `type`: {text}");
    assert_eq!(Configuration::from_json(&text).unwrap(), configuration);
}

#[test]
fn test_queue_size() {
    let channel = ChannelConfig::new("/a", "x.A").with_frequency(100);
    assert_eq!(channel.queue_size(2_000_000_000), 200);
    assert_eq!(channel.queue_size(1_500_000_000), 150);

    let slow = ChannelConfig::new("/b", "x.B").with_frequency(3);
    assert_eq!(slow.queue_size(500_000_000), 2, "Rounded up");
    assert_eq!(slow.queue_size(0), 1, "Never empty");

    let fast = ChannelConfig::new("/c", "x.C").with_frequency(u32::MAX);
    assert_eq!(
        fast.queue_size(i64::MAX),
        u32::MAX as usize,
        "Bounded by the queue index range"
    );
}

#[test]
fn test_high_frequency_channel_allocates_on_demand() {
    let configuration = Configuration::default()
        .with_channel(ChannelConfig::new("/fast", Value::TYPE).with_frequency(u32::MAX));
    let factory = SimulatedEventLoopFactory::new(configuration);
    let runtime = factory.make_runtime("app").unwrap();
    let sender = runtime.make_sender::<Value>("/fast").unwrap();

    for value in 0..100 {
        assert!(
            sender.send_message(&Value { value }).unwrap(),
            "Send {value} should fit in the ring"
        );
    }
    factory.run_for(1_000_000).unwrap();
}

#[test]
fn test_send_rejects_oversized_payload() {
    let configuration = Configuration::default()
        .with_channel(ChannelConfig::new("/small", Value::TYPE).with_max_size(16));
    let factory = SimulatedEventLoopFactory::new(configuration);
    let runtime = factory.make_runtime("app").unwrap();
    let sender = runtime.make_sender::<Value>("/small").unwrap();

    assert!(sender.send(&[0u8; 16]), "Payload at the limit fits");
    assert!(!sender.send(&[0u8; 17]), "Payload above the limit is rejected");
}

#[test]
fn test_send_rate_limited() {
    let configuration = Configuration {
        channel_storage_duration_ns: 1_000_000_000,
        ..Configuration::default()
    }
    .with_channel(ChannelConfig::new("/slow", Value::TYPE).with_frequency(2));
    let factory = SimulatedEventLoopFactory::new(configuration);
    let runtime = factory.make_runtime("app").unwrap();
    let sender = runtime.make_sender::<Value>("/slow").unwrap();

    assert!(sender.send_message(&Value { value: 1 }).unwrap());
    assert!(sender.send_message(&Value { value: 2 }).unwrap());
    assert!(
        !sender.send_message(&Value { value: 3 }).unwrap(),
        "A third send within the storage duration overruns the queue"
    );

    factory.run_for(1_000_000_000).unwrap();
    assert!(
        sender.send_message(&Value { value: 4 }).unwrap(),
        "The oldest message is old enough to be overwritten"
    );
}
