//! Publish/Subscribe
//!
//! Connections subscribe to exact channel names (SUBSCRIBE) or to glob
//! patterns (PSUBSCRIBE). PUBLISH fans a message out to every matching
//! subscriber through that subscriber's bounded outbox queue.
//!
//! ```text
//!   PUBLISH news hi
//!         │
//!         ▼
//!   ┌───────────┐  try_send   ┌──────────────┐   write   ┌──────────┐
//!   │  PubSub   │────────────>│ client outbox│──────────>│  socket  │
//!   │ registry  │             │ (mpsc, bound)│           └──────────┘
//!   └───────────┘             └──────────────┘
//! ```
//!
//! Subscriptions live in memory only and disappear with their connection.

pub mod pattern;
pub mod registry;

pub use pattern::Pattern;
pub use registry::{ClientId, PubSub};
