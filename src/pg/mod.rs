//! PostgreSQL access layer
//!
//! Pooled, context-bound transactions that decode every row into a flat
//! column-to-string [`Row`], plus self-healing `LISTEN` / `NOTIFY`
//! subscriptions on a dedicated connection.
//!
//! # Quick Start
//!
//! ```no_run
//! use pgaccess::pg::{Context, PgClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!     let client = PgClient::connect(&ctx, "my-service").await?;
//!
//!     let txn = client.begin(&ctx).await?;
//!     let mut cursor = txn.query("SELECT id, name FROM users WHERE active = $1", &[&true]).await?;
//!     let users = txn.fetch_all(&mut cursor).await?;
//!     println!("{} active users, bob among them: {}", users.len(), users.find("name", "bob"));
//!     drop(txn);
//!
//!     client.close()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod context;
pub mod error;
pub mod listener;
pub mod logging;
pub mod transaction;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use client::{PgClient, PoolStatus};
pub use connection::{PgConfig, PoolSizing};
pub use context::{CancelHandle, Context, ContextError};
pub use error::{Error, Result};
pub use listener::{ChannelEvent, ChannelOptions, ChannelState, Notification, NotificationChannel};
pub use logging::Logger;
pub use transaction::{Cursor, Transaction};
pub use types::{ColumnValue, RecordSet, Row};
