//! Client core for the Parlay betting app.
//!
//! Derived, in-memory state (signed-in user, unread count, active check-in,
//! signed URLs) kept in step with the managed backend, plus the flows that
//! mutate it. All persistence goes through the `parlay-backend` traits.

pub mod app;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod dnd;
pub mod error;
pub mod lifecycle;
pub mod notifications;
pub mod optimistic;
pub mod picker;
pub mod profile;
pub mod push;
pub mod service;
pub mod session;
pub mod toast;
pub mod url_cache;

pub use app::{Backends, ClientApp, Device};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
