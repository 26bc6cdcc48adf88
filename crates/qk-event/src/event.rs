//! Event, category, priority, and the receiver trait.

use alloc::sync::Arc;

/// Bitset of event categories. A listener or receiver matches an event when
/// `category_mask & event.category != 0` (or the mask is [`Category::ALL`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category(pub u8);

impl Category {
    pub const INPUT: Category = Category(1 << 0);
    pub const SYSTEM: Category = Category(1 << 1);
    pub const WINDOW: Category = Category(1 << 2);
    pub const CUSTOM: Category = Category(1 << 3);
    pub const ALL: Category = Category(0x0F);

    pub fn matches(&self, other: Category) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: Category) -> Category {
        Category(self.0 | other.0)
    }
}

/// Delivery priority. Declaration order defines `Ord`: `Immediate` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Immediate,
}

/// Discriminant-only view of [`EventKind`], used by listener filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Key,
    Mouse,
    Timer,
    Window,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy)]
pub enum EventKind {
    Key {
        scancode: u8,
        action: KeyAction,
    },
    Mouse {
        x: i32,
        y: i32,
        buttons: u8,
        is_absolute: bool,
    },
    Timer {
        tick: u64,
    },
    Window {
        id: u32,
        code: u32,
    },
    Custom {
        tag: u32,
        payload: u64,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Key { .. } => EventType::Key,
            EventKind::Mouse { .. } => EventType::Mouse,
            EventKind::Timer { .. } => EventType::Timer,
            EventKind::Window { .. } => EventType::Window,
            EventKind::Custom { .. } => EventType::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub category: Category,
    pub priority: Priority,
    pub timestamp: u64,
}

impl Event {
    pub fn new(kind: EventKind, category: Category, priority: Priority, timestamp: u64) -> Self {
        Self {
            kind,
            category,
            priority,
            timestamp,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

/// A registered object receiver. Unlike a listener, a receiver has no type filter or priority
/// floor — just enabled/disabled and a category mask.
pub trait EventReceiver {
    /// Return `true` if the event was handled (stops further receiver traversal).
    fn on_event(&self, event: &Event) -> bool;
}

pub(crate) struct ReceiverEntry {
    pub receiver: Arc<dyn EventReceiver + Send + Sync>,
    pub enabled: bool,
    pub category_mask: Category,
}
