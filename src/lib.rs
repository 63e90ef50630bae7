//! # tickersync
//!
//! Request coordination for a stock-trading web backend.
//!
//! Every user action is dispatched under an idempotency key. The
//! [`coordinator::Coordinator`] makes sure only the most recent request for
//! a key ever delivers its outcome; older ones are superseded and their
//! results dropped. The backend itself is reached through a
//! [`transport::Transport`], with an HTTP implementation over reqwest.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod model;
pub mod telemetry;
pub mod trading;
pub mod transport;
