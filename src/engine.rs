//! Engine boundary.
//!
//! The runtime never moves messages or keeps time itself. It consumes an event loop through the
//! traits in this module: channel endpoints, timers, the monotonic clock and the run-phase
//! notification. A native engine binds these to its transport; [`crate::simulation`] provides a
//! deterministic in-process implementation.
//!
//! Callbacks handed to the engine are boxed closures. Each one captures whatever token the
//! caller needs to find its own state again, so the engine never sees runtime objects.
//! Dropping a returned handle destroys the underlying engine object.
//!
//! The engine must deliver callbacks for one event loop as a single sequential stream, and must
//! not invoke a callback from inside a call the runtime makes into the engine. Callbacks may
//! call back into the engine.

use crate::channel::Channel;

/// Callback invoked once per message arrival on a watched channel.
pub type WatcherCallback = Box<dyn FnMut(&EventContext<'_>)>;

/// Callback invoked every time a timer expires.
pub type TimerCallback = Box<dyn FnMut()>;

/// Callback invoked when the event loop enters its run phase.
pub type OnRunCallback = Box<dyn FnMut()>;

/// Metadata for the message an engine callback or fetcher refers to.
///
/// The payload borrows engine storage and is only valid for the duration of the callback, or
/// until the fetcher it came from moves on.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// Monotonic send time in nanoseconds.
    pub monotonic_event_time: i64,
    /// Wall-clock send time in nanoseconds since the Unix epoch.
    pub realtime_event_time: i64,
    /// Index of the message within its channel.
    pub queue_index: u32,
    /// Index of the message on the node that originally sent it.
    pub remote_queue_index: u32,
    /// Serialized payload, if the context refers to a message.
    pub data: Option<&'a [u8]>,
}

impl EventContext<'_> {
    /// Context for "no message yet".
    pub const EMPTY: EventContext<'static> = EventContext {
        monotonic_event_time: i64::MIN,
        realtime_event_time: i64::MIN,
        queue_index: u32::MAX,
        remote_queue_index: u32::MAX,
        data: None,
    };

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.map_or(0, <[u8]>::len)
    }
}

/// Point-in-time reader over one channel.
pub trait RawFetcher {
    /// Moves to the newest message on the channel. Returns `true` if it is newer than the
    /// previously fetched one.
    fn fetch(&mut self) -> bool;

    /// Moves to the message after the previously fetched one. Returns `true` if there was one.
    ///
    /// If the channel's queue wrapped since the last fetch, the reader skips ahead to the
    /// oldest message still retained.
    fn fetch_next(&mut self) -> bool;

    /// Context of the currently fetched message, or [`EventContext::EMPTY`].
    fn context(&self) -> EventContext<'_>;
}

/// Publisher on one channel.
pub trait RawSender {
    /// Copies `data` into the channel. Returns `false` if the engine refused it, e.g. because
    /// the channel's configured frequency was exceeded.
    fn send(&mut self, data: &[u8]) -> bool;
}

/// Handle to an engine timer.
pub trait TimerHandler {
    /// Arms the timer to expire at `start_monotonic_ns` and every `period_ns` afterwards.
    /// A period of zero expires once.
    fn schedule(&mut self, start_monotonic_ns: i64, period_ns: i64);

    /// Stops all future expirations.
    fn disable(&mut self);
}

/// One event loop of the engine.
pub trait EventLoop {
    /// Name of the application the event loop runs.
    fn name(&self) -> &str;

    /// Creates a fetcher on `channel`, or `None` if the channel is not configured.
    fn make_fetcher(&self, channel: &Channel) -> Option<Box<dyn RawFetcher>>;

    /// Creates a sender on `channel`, or `None` if the channel is not configured.
    fn make_sender(&self, channel: &Channel) -> Option<Box<dyn RawSender>>;

    /// Installs a watcher on `channel`. Returns `false` if the channel is not configured.
    fn make_watcher(&self, channel: &Channel, callback: WatcherCallback) -> bool;

    /// Creates a timer that invokes `callback` on every expiration.
    fn add_timer(&self, callback: TimerCallback) -> Box<dyn TimerHandler>;

    /// Current monotonic time in nanoseconds since an arbitrary epoch.
    fn monotonic_now(&self) -> i64;

    /// Registers a callback for the start of the run phase.
    fn on_run(&self, callback: OnRunCallback);

    /// Returns `true` while the event loop is in its run phase.
    fn is_running(&self) -> bool;
}
