//! Self-healing `LISTEN` / `NOTIFY` subscriptions

pub mod backoff;
pub mod channel;
pub mod event;

pub use channel::{quote_ident, ChannelOptions, NotificationChannel, NOTIFICATION_BUFFER};
pub use event::{ChannelEvent, ChannelState, Notification};
