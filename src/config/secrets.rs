//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for session credentials.

pub use secrecy::{ExposeSecret, SecretString};
