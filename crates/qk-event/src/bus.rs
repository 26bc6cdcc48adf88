//! The dispatcher: `post`, `process_events`, and the listener/receiver registries.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::event::{Category, Event, EventReceiver, EventType, Priority, ReceiverEntry};

const QUEUE_CAPACITY: usize = 256;
const IMMEDIATE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostError;

struct Listener {
    id: u64,
    filter: Option<EventType>,
    category_mask: Category,
    min_priority: Priority,
    handler: Box<dyn FnMut(&Event) -> bool + Send>,
    enabled: bool,
}

/// Cooperative event bus. `post` never blocks; `process_events(max)` drains the Immediate
/// bypass queue first, then up to `max` items from the main queue, dispatching each to
/// listeners and then receivers.
pub struct EventBus {
    main_queue: ArrayQueue<Event>,
    immediate_queue: ArrayQueue<Event>,
    listeners: Mutex<Vec<Listener>>,
    receivers: Mutex<Vec<ReceiverEntry>>,
    next_listener_id: AtomicU64,
    timestamp_counter: AtomicU64,
    dispatching: AtomicBool,
    dropped_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            main_queue: ArrayQueue::new(QUEUE_CAPACITY),
            immediate_queue: ArrayQueue::new(IMMEDIATE_CAPACITY),
            listeners: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            timestamp_counter: AtomicU64::new(0),
            dispatching: AtomicBool::new(false),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Monotonically increasing logical clock used to timestamp events until a real clock is
    /// wired in.
    pub fn next_timestamp(&self) -> u64 {
        self.timestamp_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Enqueue an event. `Immediate` priority events go to the bypass queue; everything else
    /// goes to the main queue. Returns [`PostError`] (and bumps the drop counter) on overflow.
    pub fn post(&self, event: Event) -> Result<(), PostError> {
        let queue = if event.priority == Priority::Immediate {
            &self.immediate_queue
        } else {
            &self.main_queue
        };

        queue.push(event).map_err(|_| {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            PostError
        })
    }

    /// Register a listener. Returns its unique, monotonically increasing id.
    #[allow(clippy::too_many_arguments)]
    pub fn register_listener(
        &self,
        filter: Option<EventType>,
        category_mask: Category,
        min_priority: Priority,
        handler: impl FnMut(&Event) -> bool + Send + 'static,
    ) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            filter,
            category_mask,
            min_priority,
            handler: Box::new(handler),
            enabled: true,
        });
        id
    }

    /// Remove a listener, freeing its slot.
    pub fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|l| l.id != id);
    }

    pub fn set_listener_enabled(&self, id: u64, enabled: bool) {
        if let Some(l) = self.listeners.lock().iter_mut().find(|l| l.id == id) {
            l.enabled = enabled;
        }
    }

    pub fn register_receiver(
        &self,
        receiver: Arc<dyn EventReceiver + Send + Sync>,
        category_mask: Category,
    ) {
        self.receivers.lock().push(ReceiverEntry {
            receiver,
            enabled: true,
            category_mask,
        });
    }

    /// Drain the Immediate queue, then up to `max` items from the main queue, dispatching each.
    /// A reentrancy guard makes nested calls (e.g. from within a handler) a no-op that reports
    /// zero work done, rather than corrupting dispatch state.
    pub fn process_events(&self, max: usize) -> usize {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            log::warn!("qk-event: nested process_events call ignored");
            return 0;
        }

        let mut dispatched = 0usize;

        while let Some(event) = self.immediate_queue.pop() {
            self.dispatch_one(&event);
            dispatched += 1;
        }

        let mut processed_main = 0usize;
        while processed_main < max {
            match self.main_queue.pop() {
                Some(event) => {
                    self.dispatch_one(&event);
                    processed_main += 1;
                }
                None => break,
            }
        }
        dispatched += processed_main;

        self.dispatching.store(false, Ordering::Release);
        dispatched
    }

    fn dispatch_one(&self, event: &Event) {
        {
            let mut listeners = self.listeners.lock();
            for listener in listeners.iter_mut() {
                if !listener.enabled {
                    continue;
                }
                if let Some(filter) = listener.filter {
                    if filter != event.event_type() {
                        continue;
                    }
                }
                if !listener.category_mask.matches(event.category) {
                    continue;
                }
                if event.priority < listener.min_priority {
                    continue;
                }
                if (listener.handler)(event) {
                    return; // handled: stop propagation, skip receivers too
                }
            }
        }

        let receivers = self.receivers.lock();
        for entry in receivers.iter() {
            if !entry.enabled {
                continue;
            }
            if !entry.category_mask.matches(event.category) {
                continue;
            }
            if entry.receiver.on_event(event) {
                break;
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, KeyAction};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering as O};

    fn key_event(bus: &EventBus, priority: Priority) -> Event {
        Event::new(
            EventKind::Key {
                scancode: 0x1E,
                action: KeyAction::Pressed,
            },
            Category::INPUT,
            priority,
            bus.next_timestamp(),
        )
    }

    #[test]
    fn post_then_process_delivers_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        bus.register_listener(None, Category::ALL, Priority::Low, move |_e| {
            c2.fetch_add(1, O::Relaxed);
            true
        });

        bus.post(key_event(&bus, Priority::Normal)).unwrap();
        let dispatched = bus.process_events(usize::MAX);
        assert_eq!(dispatched, 1);
        assert_eq!(count.load(O::Relaxed), 1);
    }

    #[test]
    fn handled_listener_stops_propagation() {
        let bus = EventBus::new();
        let second_called = Arc::new(AtomicUsize::new(0));
        let second = second_called.clone();

        bus.register_listener(None, Category::ALL, Priority::Low, |_e| true);
        bus.register_listener(None, Category::ALL, Priority::Low, move |_e| {
            second.fetch_add(1, O::Relaxed);
            true
        });

        bus.post(key_event(&bus, Priority::Normal)).unwrap();
        bus.process_events(usize::MAX);
        assert_eq!(second_called.load(O::Relaxed), 0);
    }

    #[test]
    fn immediate_precedes_normal_posted_before_it() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        bus.register_listener(None, Category::ALL, Priority::Low, move |e| {
            o.lock().push(e.priority);
            false
        });

        for _ in 0..5 {
            bus.post(key_event(&bus, Priority::Normal)).unwrap();
        }
        bus.post(key_event(&bus, Priority::Immediate)).unwrap();

        bus.process_events(usize::MAX);
        let recorded = order.lock();
        assert_eq!(recorded[0], Priority::Immediate);
        for p in recorded.iter().skip(1) {
            assert_eq!(*p, Priority::Normal);
        }
    }

    #[test]
    fn overflow_increments_drop_counter() {
        let bus = EventBus::new();
        for _ in 0..QUEUE_CAPACITY {
            bus.post(key_event(&bus, Priority::Normal)).unwrap();
        }
        let result = bus.post(key_event(&bus, Priority::Normal));
        assert!(result.is_err());
        assert_eq!(bus.dropped_count(), 1);
    }
}
