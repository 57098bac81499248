//! Simulated event loops sharing one virtual clock.

use crate::channel::Channel;
use crate::engine::{
    EventLoop, OnRunCallback, RawFetcher, RawSender, TimerCallback, TimerHandler, WatcherCallback,
};
use crate::simulation::channel::{ChannelStorage, SimulatedFetcher, SimulatedSender};
use crate::simulation::scheduler::{Event, EventScheduler};
use crate::threads::ThreadCoordinator;
use crate::utils::slab::{Key, Slab};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct TimerSlot {
    pub(crate) callback: Option<TimerCallback>,
    /// Bumped by every schedule and disable; queued firings carry the value they were armed with.
    pub(crate) generation: u64,
    pub(crate) period_ns: i64,
}

pub(crate) struct WatcherSlot {
    pub(crate) callback: Option<WatcherCallback>,
}

/// State shared by every event loop of one factory.
pub(crate) struct SimState {
    pub(crate) scheduler: EventScheduler,
    pub(crate) realtime_offset_ns: i64,
    pub(crate) channels: Vec<ChannelStorage>,
    pub(crate) channel_index: HashMap<Channel, usize>,
    /// Watchers per channel, in registration order.
    pub(crate) watchers: Vec<Vec<WatcherSlot>>,
    pub(crate) timers: Slab<TimerSlot>,
    pub(crate) on_run: Vec<Option<OnRunCallback>>,
    pub(crate) running: bool,
}

impl SimState {
    pub(crate) fn new(channels: Vec<ChannelStorage>, realtime_offset_ns: i64) -> Self {
        let channel_index = channels
            .iter()
            .enumerate()
            .map(|(index, storage)| (storage.config.channel(), index))
            .collect();
        let watchers = channels.iter().map(|_| Vec::new()).collect();

        Self {
            scheduler: EventScheduler::default(),
            realtime_offset_ns,
            channels,
            channel_index,
            watchers,
            timers: Slab::new(),
            on_run: Vec::new(),
            running: false,
        }
    }
}

/// Runs every on-run callback registered so far, in registration order.
pub(crate) fn fire_on_run(state: &Rc<RefCell<SimState>>) {
    let mut index = 0;
    loop {
        let callback = {
            let mut state = state.borrow_mut();
            if index >= state.on_run.len() {
                break;
            }
            state.on_run[index].take()
        };

        if let Some(mut callback) = callback {
            callback();
            if let Some(slot) = state.borrow_mut().on_run.get_mut(index) {
                *slot = Some(callback);
            }
        }
        index += 1;
    }
}

/// Processes a single event.
pub(crate) fn dispatch(state: &Rc<RefCell<SimState>>, time: i64, event: Event) {
    match event {
        Event::Timer { key, generation } => fire_timer(state, time, key, generation),
        Event::Deliver {
            channel,
            queue_index,
        } => deliver(state, channel, queue_index),
    }
}

fn fire_timer(state: &Rc<RefCell<SimState>>, time: i64, key: Key, generation: u64) {
    let callback = {
        let mut guard = state.borrow_mut();
        let state = &mut *guard;
        let Some(slot) = state.timers.get_mut(key) else {
            return;
        };
        if slot.generation != generation {
            trace!(time, "skipping stale timer firing");
            return;
        }

        // Re-armed before the callback runs, so a disable from inside it takes effect.
        if slot.period_ns > 0 {
            let period = slot.period_ns;
            let callback = slot.callback.take();
            state
                .scheduler
                .schedule(time.saturating_add(period), Event::Timer { key, generation });
            callback
        } else {
            slot.callback.take()
        }
    };

    let Some(mut callback) = callback else {
        return;
    };
    callback();

    let mut guard = state.borrow_mut();
    if let Some(slot) = guard.timers.get_mut(key) {
        slot.callback = Some(callback);
    } else {
        drop(guard);
        drop(callback);
    }
}

fn deliver(state: &Rc<RefCell<SimState>>, channel: usize, queue_index: u64) {
    let message = {
        let state = state.borrow();
        match state.channels[channel].get(queue_index) {
            Some(message) => message.clone(),
            None => {
                trace!(
                    channel = %state.channels[channel].config.channel(),
                    queue_index,
                    "message overwritten before delivery"
                );
                return;
            }
        }
    };

    let context = message.context();
    let mut index = 0;
    loop {
        let callback = {
            let mut state = state.borrow_mut();
            let Some(slot) = state.watchers[channel].get_mut(index) else {
                break;
            };
            slot.callback.take()
        };

        if let Some(mut callback) = callback {
            callback(&context);
            if let Some(slot) = state.borrow_mut().watchers[channel].get_mut(index) {
                slot.callback = Some(callback);
            }
        }
        index += 1;
    }
}

/// One application's view of the simulation.
pub struct SimulatedEventLoop {
    name: String,
    state: Rc<RefCell<SimState>>,
    coordinator: Arc<ThreadCoordinator>,
}

impl SimulatedEventLoop {
    pub(crate) fn new(
        name: String,
        state: Rc<RefCell<SimState>>,
        coordinator: Arc<ThreadCoordinator>,
    ) -> Self {
        Self {
            name,
            state,
            coordinator,
        }
    }

    /// Thread coordinator for this application's worker threads.
    pub fn thread_coordinator(&self) -> &Arc<ThreadCoordinator> {
        &self.coordinator
    }

    /// Current wall-clock time in nanoseconds.
    pub fn realtime_now(&self) -> i64 {
        let state = self.state.borrow();
        state.scheduler.now().saturating_add(state.realtime_offset_ns)
    }

    fn channel_slot(&self, channel: &Channel) -> Option<usize> {
        let index = self.state.borrow().channel_index.get(channel).copied();
        if index.is_none() {
            debug!(event_loop = %self.name, %channel, "channel not in configuration");
        }
        index
    }
}

impl EventLoop for SimulatedEventLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_fetcher(&self, channel: &Channel) -> Option<Box<dyn RawFetcher>> {
        let index = self.channel_slot(channel)?;
        Some(Box::new(SimulatedFetcher::new(self.state.clone(), index)))
    }

    fn make_sender(&self, channel: &Channel) -> Option<Box<dyn RawSender>> {
        let index = self.channel_slot(channel)?;
        Some(Box::new(SimulatedSender::new(self.state.clone(), index)))
    }

    fn make_watcher(&self, channel: &Channel, callback: WatcherCallback) -> bool {
        let Some(index) = self.channel_slot(channel) else {
            return false;
        };

        self.state.borrow_mut().watchers[index].push(WatcherSlot {
            callback: Some(callback),
        });
        true
    }

    fn add_timer(&self, callback: TimerCallback) -> Box<dyn TimerHandler> {
        let key = self.state.borrow_mut().timers.insert(TimerSlot {
            callback: Some(callback),
            generation: 0,
            period_ns: 0,
        });

        Box::new(SimulatedTimer {
            state: self.state.clone(),
            key,
        })
    }

    fn monotonic_now(&self) -> i64 {
        self.state.borrow().scheduler.now()
    }

    fn on_run(&self, callback: OnRunCallback) {
        self.state.borrow_mut().on_run.push(Some(callback));
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }
}

/// Engine timer in the simulation. Dropping it removes the timer and its pending firings.
struct SimulatedTimer {
    state: Rc<RefCell<SimState>>,
    key: Key,
}

impl TimerHandler for SimulatedTimer {
    fn schedule(&mut self, start_monotonic_ns: i64, period_ns: i64) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(slot) = state.timers.get_mut(self.key) else {
            return;
        };

        slot.generation += 1;
        slot.period_ns = period_ns.max(0);
        let generation = slot.generation;
        let start = start_monotonic_ns.max(state.scheduler.now());
        state.scheduler.schedule(
            start,
            Event::Timer {
                key: self.key,
                generation,
            },
        );
    }

    fn disable(&mut self) {
        if let Some(slot) = self.state.borrow_mut().timers.get_mut(self.key) {
            slot.generation += 1;
        }
    }
}

impl Drop for SimulatedTimer {
    fn drop(&mut self) {
        let removed = match self.state.try_borrow_mut() {
            Ok(mut state) => state.timers.remove(self.key),
            Err(_) => None,
        };
        drop(removed);
    }
}

impl std::fmt::Debug for SimulatedEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedEventLoop")
            .field("name", &self.name)
            .finish()
    }
}
