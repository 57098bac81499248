use rtloop::{ChannelConfig, Configuration, JsonMessage, Runtime, SimulatedEventLoopFactory};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    value: i64,
    send_time: i64,
}

impl JsonMessage for Ping {
    const TYPE: &'static str = "demo.Ping";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pong {
    value: i64,
    initial_send_time: i64,
}

impl JsonMessage for Pong {
    const TYPE: &'static str = "demo.Pong";
}

const PING_PERIOD_NS: i64 = 10_000_000;

fn configuration() -> Configuration {
    Configuration::default()
        .with_channel(ChannelConfig::new("/test", Ping::TYPE).with_frequency(200))
        .with_channel(ChannelConfig::new("/test", Pong::TYPE).with_frequency(200))
}

#[derive(Default)]
struct Counters {
    sent: Cell<i64>,
    pongs_seen_by_ping: Cell<i64>,
    pongs_seen_by_second_handler: Cell<i64>,
    pings_echoed: Cell<i64>,
    pings_counted: Cell<i64>,
    pongs_counted: Cell<i64>,
}

fn spawn_ping(runtime: &Runtime, counters: &Rc<Counters>) {
    runtime
        .spawn_task({
            let runtime = runtime.clone();
            let counters = counters.clone();
            async move {
                let sender = runtime.make_sender::<Ping>("/test").unwrap();
                let timer = runtime.add_timer().unwrap();
                runtime.on_run().await.unwrap();

                timer.schedule(runtime.monotonic_now(), PING_PERIOD_NS);
                loop {
                    timer.tick().await.unwrap();
                    let value = counters.sent.get() + 1;
                    counters.sent.set(value);
                    let ping = Ping {
                        value,
                        send_time: runtime.monotonic_now(),
                    };
                    assert!(sender.send_message(&ping).unwrap(), "Ping rejected");
                }
            }
        })
        .unwrap();

    for second in [false, true] {
        runtime
            .spawn_task({
                let runtime = runtime.clone();
                let counters = counters.clone();
                async move {
                    let pongs = runtime.make_fetcher::<Pong>("/test").unwrap();
                    runtime.on_run().await.unwrap();
                    loop {
                        let pong = pongs.next().await.unwrap();
                        assert_eq!(pong.value, counters.sent.get(), "Pong must echo the last ping");
                        assert_eq!(
                            pong.initial_send_time,
                            runtime.monotonic_now(),
                            "Echo happens at the instant the ping was sent"
                        );
                        let seen = if second {
                            &counters.pongs_seen_by_second_handler
                        } else {
                            &counters.pongs_seen_by_ping
                        };
                        seen.set(seen.get() + 1);
                    }
                }
            })
            .unwrap();
    }
}

fn spawn_pong(runtime: &Runtime, counters: &Rc<Counters>) {
    runtime
        .spawn_task({
            let runtime = runtime.clone();
            let counters = counters.clone();
            async move {
                let pings = runtime.make_fetcher::<Ping>("/test").unwrap();
                let sender = runtime.make_sender::<Pong>("/test").unwrap();
                runtime.on_run().await.unwrap();
                loop {
                    let ping = pings.next().await.unwrap();
                    let (fresh, latest) = pings.fetch().unwrap();
                    assert!(fresh, "The delivered ping should still be unread");
                    assert_eq!(latest.as_ref(), Some(&ping));

                    counters.pings_echoed.set(counters.pings_echoed.get() + 1);
                    let pong = Pong {
                        value: ping.value,
                        initial_send_time: ping.send_time,
                    };
                    assert!(sender.send_message(&pong).unwrap());
                }
            }
        })
        .unwrap();
}

fn spawn_counters(runtime: &Runtime, counters: &Rc<Counters>) {
    runtime
        .spawn_task({
            let runtime = runtime.clone();
            let counters = counters.clone();
            async move {
                let pings = runtime.make_fetcher::<Ping>("/test").unwrap();
                runtime.on_run().await.unwrap();
                loop {
                    pings.next().await.unwrap();
                    counters.pings_counted.set(counters.pings_counted.get() + 1);
                }
            }
        })
        .unwrap();

    runtime
        .spawn_task({
            let runtime = runtime.clone();
            let counters = counters.clone();
            async move {
                let pongs = runtime.make_fetcher::<Pong>("/test").unwrap();
                runtime.on_run().await.unwrap();
                loop {
                    pongs.next().await.unwrap();
                    counters.pongs_counted.set(counters.pongs_counted.get() + 1);
                }
            }
        })
        .unwrap();
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("rtloop=info")
        .try_init();
}

#[test]
fn test_ping_pong_round_trips() {
    init_logging();
    let factory = SimulatedEventLoopFactory::new(configuration());
    let counters = Rc::new(Counters::default());

    let ping = factory.make_runtime("ping").unwrap();
    let pong = factory.make_runtime("pong").unwrap();
    let test = factory.make_runtime("test").unwrap();

    spawn_ping(&ping, &counters);
    spawn_pong(&pong, &counters);
    spawn_counters(&test, &counters);

    factory.run_for(10_005_000_000).unwrap();

    assert_eq!(counters.sent.get(), 1001);
    assert_eq!(counters.pings_counted.get(), 1001);
    assert_eq!(counters.pongs_counted.get(), 1001);
    assert_eq!(counters.pings_echoed.get(), 1001);
    assert_eq!(counters.pongs_seen_by_ping.get(), 1001);
    assert_eq!(counters.pongs_seen_by_second_handler.get(), 1001);

    factory.shut_down();
    assert!(ping.is_closed() && pong.is_closed() && test.is_closed());
}

#[test]
fn test_ping_pong_across_runs() {
    init_logging();
    let factory = SimulatedEventLoopFactory::new(configuration());
    let counters = Rc::new(Counters::default());

    let ping = factory.make_runtime("ping").unwrap();
    let pong = factory.make_runtime("pong").unwrap();
    let test = factory.make_runtime("test").unwrap();

    spawn_ping(&ping, &counters);
    spawn_pong(&pong, &counters);
    spawn_counters(&test, &counters);

    factory.run_for(1_005_000_000).unwrap();
    assert_eq!(counters.pongs_counted.get(), 101);

    factory.run_for(1_000_000_000).unwrap();
    assert_eq!(counters.pings_counted.get(), 201);
    assert_eq!(counters.pongs_counted.get(), 201);
}
