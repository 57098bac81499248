//! Two applications bouncing messages over one channel name on the simulated engine.
//!
//! `ping` sends a counter every 10ms and `pong` echoes it back. A third application counts
//! both directions and the run is recorded into a message log.
//!
//! ```sh
//! RUST_LOG=rtloop=debug cargo run --example ping_pong --features subscriber -- 2 run.json
//! ```

use rtloop::{
    ChannelConfig, Configuration, JsonMessage, LogReader, MessageLogger, Runtime,
    SimulatedEventLoopFactory,
};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::error::Error;
use std::rc::Rc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    value: i64,
}

impl JsonMessage for Ping {
    const TYPE: &'static str = "demo.Ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pong {
    value: i64,
}

impl JsonMessage for Pong {
    const TYPE: &'static str = "demo.Pong";
}

const PERIOD_NS: i64 = 10_000_000;

fn ping(runtime: &Runtime) -> rtloop::Result<()> {
    let handle = runtime.clone();
    runtime.spawn_task(async move {
        let (Ok(sender), Ok(timer)) = (handle.make_sender::<Ping>("/test"), handle.add_timer())
        else {
            warn!("ping could not set up its resources");
            return;
        };
        if handle.on_run().await.is_err() {
            return;
        }

        timer.schedule(handle.monotonic_now(), PERIOD_NS);
        let mut value = 0;
        while timer.tick().await.is_ok() {
            value += 1;
            if !matches!(sender.send_message(&Ping { value }), Ok(true)) {
                warn!(value, "ping dropped");
            }
        }
    })?;

    let handle = runtime.clone();
    runtime.spawn_task(async move {
        let Ok(pongs) = handle.make_fetcher::<Pong>("/test") else {
            return;
        };
        if handle.on_run().await.is_err() {
            return;
        }
        while let Ok(pong) = pongs.next().await {
            info!(value = pong.value, "pong received");
        }
    })?;
    Ok(())
}

fn pong(runtime: &Runtime) -> rtloop::Result<()> {
    let handle = runtime.clone();
    runtime.spawn_task(async move {
        let (Ok(pings), Ok(sender)) = (
            handle.make_fetcher::<Ping>("/test"),
            handle.make_sender::<Pong>("/test"),
        ) else {
            return;
        };
        if handle.on_run().await.is_err() {
            return;
        }
        while let Ok(ping) = pings.next().await {
            if !matches!(sender.send_message(&Pong { value: ping.value }), Ok(true)) {
                warn!(value = ping.value, "pong dropped");
            }
        }
    })?;
    Ok(())
}

fn count<M: JsonMessage>(runtime: &Runtime, counter: Rc<Cell<u64>>) -> rtloop::Result<()> {
    let handle = runtime.clone();
    runtime.spawn_task(async move {
        let Ok(fetcher) = handle.make_fetcher::<M>("/test") else {
            return;
        };
        if handle.on_run().await.is_err() {
            return;
        }
        while fetcher.next().await.is_ok() {
            counter.set(counter.get() + 1);
        }
    })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    rtloop::trace::init_tracing();

    let mut args = std::env::args().skip(1);
    let seconds: i64 = args.next().map(|arg| arg.parse()).transpose()?.unwrap_or(10);
    let log_path = args.next();

    let configuration = Configuration::default()
        .with_channel(ChannelConfig::new("/test", Ping::TYPE).with_frequency(200))
        .with_channel(ChannelConfig::new("/test", Pong::TYPE).with_frequency(200));
    let factory = SimulatedEventLoopFactory::new(configuration);

    let logger_loop = factory.make_event_loop("logger");
    let logger = MessageLogger::attach(&*logger_loop, factory.configuration());

    ping(&factory.make_runtime("ping")?)?;
    pong(&factory.make_runtime("pong")?)?;

    let counter = factory.make_runtime("counter")?;
    let pings = Rc::new(Cell::new(0));
    let pongs = Rc::new(Cell::new(0));
    count::<Ping>(&counter, pings.clone())?;
    count::<Pong>(&counter, pongs.clone())?;

    factory.run_for(seconds * 1_000_000_000 + PERIOD_NS / 2)?;
    info!(pings = pings.get(), pongs = pongs.get(), "run finished");
    factory.shut_down();

    let log = logger.finish();
    if let Some(path) = log_path {
        log.save(&path)?;
        info!(path = %path, messages = log.messages.len(), "log written");
    }

    let mut reader = LogReader::new(log);
    reader.subscribe("/test", Pong::TYPE)?;
    reader.process()?;
    if let Some(last) = reader.messages::<Pong>("/test")?.last() {
        info!(value = last.value, "last pong in the log");
    }
    Ok(())
}
