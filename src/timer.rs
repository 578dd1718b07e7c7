//! Delivery of delayed events to ports
//!
//! Every timer targets a single port and event. Timers fire from the
//! queue's own thread, while holding the dispatch lock. The dispatch lock is
//! the first lock of the global order (dispatch, clock, port, media
//! dependent port, timestamper), so the receive path takes it too before
//! touching any protocol state.

use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::port::Event;

/// Smallest delay a timer is armed with
pub const EVENT_TIMER_GRANULARITY: Duration = Duration::from_nanos(5_000_000);
/// Deadline used for delays too far in the future to represent
const MAX_TIMER_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub port_number: u16,
    pub event: Event,
}

/// Unique per queue, handed out in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// For schedulers implemented outside this crate
    pub const fn new(value: u64) -> Self {
        TimerHandle(value)
    }
}

/// Receiver of timer events
pub trait EventTarget: Send + Sync {
    fn process_event(self: Arc<Self>, event: Event);
}

pub trait EventScheduler: Send + Sync {
    /// Arm a one shot timer delivering `key.event` to `target` after
    /// `delay`. Outstanding timers with the same key are left alone.
    fn schedule(&self, target: Weak<dyn EventTarget>, key: TimerKey, delay: Duration)
        -> TimerHandle;

    /// Remove every pending timer with this key. A callback that is already
    /// running is not interrupted.
    fn cancel(&self, key: TimerKey);

    /// Lock serializing timer callbacks with frame reception
    fn dispatch_lock(&self) -> MutexGuard<'_, ()>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    key: TimerKey,
    target: Weak<dyn EventTarget>,
}

#[derive(Default)]
struct Entries {
    timers: BTreeMap<(Instant, TimerHandle), Entry>,
    next_handle: u64,
    shutdown: bool,
}

struct Shared {
    entries: Mutex<Entries>,
    wakeup: Condvar,
    dispatch: Mutex<()>,
}

/// Timer queue backed by a dedicated thread
pub struct TimerQueue {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl TimerQueue {
    pub fn new() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            entries: Mutex::new(Entries::default()),
            wakeup: Condvar::new(),
            dispatch: Mutex::new(()),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("gptp-timers".into())
            .spawn(move || run(thread_shared))?;

        Ok(TimerQueue {
            shared,
            thread: Some(thread),
        })
    }

    /// Number of pending timers with this key
    pub fn pending(&self, key: TimerKey) -> usize {
        lock(&self.shared.entries)
            .timers
            .values()
            .filter(|entry| entry.key == key)
            .count()
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let entries = lock(&shared.entries);
        if entries.shutdown {
            return;
        }

        let now = Instant::now();
        match entries.timers.keys().next().copied() {
            None => {
                drop(shared.wakeup.wait(entries));
            }
            Some((deadline, _)) if deadline > now => {
                drop(shared.wakeup.wait_timeout(entries, deadline - now));
            }
            Some(_) => {
                drop(entries);

                // a timer cancelled by the previous callback must not fire
                let _dispatch = lock(&shared.dispatch);
                let Some(entry) = pop_due(&shared.entries, now) else {
                    continue;
                };
                match entry.target.upgrade() {
                    Some(target) => {
                        let event = entry.key.event;
                        trace!(port = entry.key.port_number, %event, "timer fired");
                        target.process_event(event);
                    }
                    None => {
                        debug!(event = %entry.key.event, "dropping timer for removed port")
                    }
                }
            }
        }
    }
}

fn pop_due(entries: &Mutex<Entries>, now: Instant) -> Option<Entry> {
    let mut entries = lock(entries);
    let first = entries.timers.first_entry()?;
    if first.key().0 > now {
        return None;
    }
    Some(first.remove())
}

impl EventScheduler for TimerQueue {
    fn schedule(
        &self,
        target: Weak<dyn EventTarget>,
        key: TimerKey,
        delay: Duration,
    ) -> TimerHandle {
        let now = Instant::now();
        let deadline = now
            .checked_add(delay)
            .or_else(|| now.checked_add(MAX_TIMER_DELAY))
            .unwrap_or(now);

        let mut entries = lock(&self.shared.entries);
        let handle = TimerHandle(entries.next_handle);
        entries.next_handle += 1;
        entries.timers.insert((deadline, handle), Entry { key, target });
        drop(entries);

        self.shared.wakeup.notify_one();
        handle
    }

    fn cancel(&self, key: TimerKey) {
        lock(&self.shared.entries)
            .timers
            .retain(|_, entry| entry.key != key);
    }

    fn dispatch_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.shared.dispatch)
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        lock(&self.shared.entries).shutdown = true;
        self.shared.wakeup.notify_all();

        if let Some(thread) = self.thread.take() {
            // the last owner may be a callback running on the timer thread
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}
