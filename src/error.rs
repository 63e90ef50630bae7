//! Error types for tickersync.
//!
//! Transport problems are never surfaced here; they travel as failure
//! outcomes. These are the errors a caller can get back synchronously.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid action key: {0:?}")]
    InvalidAction(String),

    #[error("invalid quantity: {0} (must be a positive whole number)")]
    InvalidQuantity(i64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected payload for {expected}: {source}")]
    Decode {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
