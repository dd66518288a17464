//! Programmable HTTP mock server.
//!
//! Incoming requests are matched against registered expectations; a match
//! triggers the configured action: a canned response, an upstream forward,
//! a callback (in-process or over a persistent WebSocket channel), or a
//! transport-level error. The same ports expose a management API for
//! registering expectations, querying recorded traffic, verification, and
//! reset.

pub mod api;
pub mod callback;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod journal;
pub mod matcher;
pub mod model;
pub mod scheduler;
pub mod server;
pub mod store;

pub use client::{ClientError, MockClient};
pub use config::Settings;
pub use error::MockError;
pub use server::{MockServer, ServerState};
