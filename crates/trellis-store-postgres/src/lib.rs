//!
//! Trellis Store (Postgres) - sqlx repositories, migrations and the
//! LISTEN/NOTIFY bridge backing the event bus.

#![forbid(unsafe_code)]

pub mod connection;
pub mod listener;
pub mod repositories;

pub use connection::PostgresConnection;
pub use listener::{spawn_notification_listener, NOTIFICATIONS_CHANNEL};
pub use repositories::PostgresStore;
