//! Event subsystem
//!
//! ```text
//! store_event ──► EventStore ──► event table ◄── poll task ──► subscribers
//!                     │
//!                     └──► syslog (CRITICAL and above)
//! ```
//!
//! The event table is the single hand-off point between producers and the
//! notifier; the event-monitor lock serializes writers with the poll cycle.

pub mod messages;
pub mod notify;
pub mod store;
pub mod syslog;
pub mod types;

pub use notify::{EventCallback, EventNotifier, SubscriptionId};
pub use store::{EventStore, MatchAction, MatchOutcome};
pub use syslog::{SyslogLevel, SyslogSink, TracingSyslog};
pub use types::{DiagnosticResult, Event, EventFilter, EventSeverity, EventType, Predicate, Uid};
