//! Multi-pattern publish/subscribe dispatch.
//!
//! Listeners subscribe under a [`Pattern`]: the wildcard `*`, an exact
//! action string (`start`, `die`, `error`, ...), or the fallback empty
//! string. Publishing an event with action `T` runs three steps in order:
//!
//! 1. every wildcard listener, unconditionally;
//! 2. every listener registered under exactly `T`;
//! 3. only if step 2 found no listener, every fallback listener.
//!
//! Within a pattern, listeners fire in registration order.
//!
//! # Usage
//!
//! ```
//! use docker_events::bus::{Event, EventBus, EventRecord};
//!
//! let mut bus = EventBus::new();
//! bus.on("start", |event: &Event| println!("started: {:?}", event.as_record()));
//! bus.on("", |event: &Event| println!("unhandled {}", event.action()));
//!
//! let record = EventRecord::from_json(r#"{"Action":"die","id":"abc"}"#).unwrap();
//! bus.publish(&Event::Record(record));
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::constants::{ERROR_ACTION, FALLBACK_PATTERN, WILDCARD_PATTERN};
use crate::error::StreamError;

/// Field carrying the event-type discriminator in daemon records.
pub const ACTION_FIELD: &str = "Action";

/// Unique identifier for a listener registration.
pub type ListenerId = String;

/// Callback invoked with each matching event.
pub type Listener = Box<dyn FnMut(&Event) + Send>;

/// Subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Matches every published event (`*`).
    Wildcard,
    /// Matches events whose action equals the string exactly.
    Action(String),
    /// Matches events whose action has no exact listener (empty string).
    Fallback,
}

impl Pattern {
    /// Registry key for this pattern.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Wildcard => WILDCARD_PATTERN,
            Self::Action(action) => action,
            Self::Fallback => FALLBACK_PATTERN,
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        match s {
            WILDCARD_PATTERN => Self::Wildcard,
            FALLBACK_PATTERN => Self::Fallback,
            other => Self::Action(other.to_string()),
        }
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

/// A decoded daemon event.
///
/// Only the action is interpreted; every other field is passed through
/// unchanged in [`payload`](Self::payload).
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    action: String,
    payload: Map<String, Value>,
}

impl EventRecord {
    /// Wrap a decoded JSON value.
    ///
    /// Returns `None` unless `value` is an object with a string `Action`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(payload) = value else {
            return None;
        };
        let action = payload.get(ACTION_FIELD)?.as_str()?.to_string();
        Some(Self { action, payload })
    }

    /// Parse a single JSON document into a record.
    ///
    /// Returns `None` if the text is not valid JSON or lacks an action.
    #[must_use]
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok().and_then(Self::from_value)
    }

    /// Event-type discriminator.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Look up a top-level field of the decoded record.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// The full decoded object, including the action field.
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Consume the record, returning the decoded JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Something delivered to listeners.
#[derive(Debug)]
pub enum Event {
    /// A record decoded from the daemon event stream.
    Record(EventRecord),
    /// A subprocess failure, published under `error`.
    Error(StreamError),
}

impl Event {
    /// Publish key of this event.
    #[must_use]
    pub fn action(&self) -> &str {
        match self {
            Self::Record(record) => record.action(),
            Self::Error(_) => ERROR_ACTION,
        }
    }

    /// The decoded record, if this is not an error.
    #[must_use]
    pub fn as_record(&self) -> Option<&EventRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Error(_) => None,
        }
    }

    /// The failure detail, if this is an error.
    #[must_use]
    pub fn as_error(&self) -> Option<&StreamError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Record(_) => None,
        }
    }

    /// Check if this is an error event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Pattern-keyed listener registry with layered dispatch.
#[derive(Default)]
pub struct EventBus {
    /// Map of pattern key -> list of (listener_id, listener).
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    /// Counter for generating unique listener IDs.
    next_id: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pattern_count", &self.listeners.len())
            .field("total_listeners", &self.total_listeners())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `pattern`.
    ///
    /// Returns an ID that can be passed to [`off`](Self::off).
    pub fn on<P, F>(&mut self, pattern: P, listener: F) -> ListenerId
    where
        P: Into<Pattern>,
        F: FnMut(&Event) + Send + 'static,
    {
        let pattern = pattern.into();
        let id = format!("lsn_{}", self.next_id);
        self.next_id += 1;

        self.listeners
            .entry(pattern.key().to_string())
            .or_default()
            .push((id.clone(), Box::new(listener)));

        log::debug!("Registered listener '{}' for '{}'", id, pattern.key());
        id
    }

    /// Unregister a listener by its ID.
    ///
    /// Returns `false` if no listener had that ID.
    pub fn off(&mut self, id: &str) -> bool {
        for listeners in self.listeners.values_mut() {
            if let Some(idx) = listeners.iter().position(|(lid, _)| lid == id) {
                listeners.remove(idx);
                log::debug!("Unregistered listener '{}'", id);
                return true;
            }
        }
        false
    }

    /// Check if any listener is registered under `pattern`.
    #[must_use]
    pub fn has_listeners(&self, pattern: &str) -> bool {
        self.listeners.get(pattern).is_some_and(|v| !v.is_empty())
    }

    /// Number of listeners registered under `pattern`.
    #[must_use]
    pub fn listener_count(&self, pattern: &str) -> usize {
        self.listeners.get(pattern).map_or(0, Vec::len)
    }

    /// Total number of listeners across all patterns.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    /// Deliver `event` to wildcard, then exact or fallback listeners.
    ///
    /// Returns the number of listener invocations.
    pub fn publish(&mut self, event: &Event) -> usize {
        let action = event.action();
        let mut delivered = Self::invoke(self.listeners.get_mut(WILDCARD_PATTERN), event);

        // An action spelled like a reserved pattern has no exact listeners.
        let exact = if action == WILDCARD_PATTERN || action == FALLBACK_PATTERN {
            0
        } else {
            Self::invoke(self.listeners.get_mut(action), event)
        };
        delivered += exact;

        if exact == 0 {
            delivered += Self::invoke(self.listeners.get_mut(FALLBACK_PATTERN), event);
        }

        log::debug!("Published '{}' to {} listener(s)", action, delivered);
        delivered
    }

    fn invoke(listeners: Option<&mut Vec<(ListenerId, Listener)>>, event: &Event) -> usize {
        let Some(listeners) = listeners else {
            return 0;
        };
        for (_, listener) in listeners.iter_mut() {
            listener(event);
        }
        listeners.len()
    }
}
