//! Bounded-batch consumer for a Pub/Sub subscription.
//!
//! A [`Client`] checks that its identity may pull and acknowledge on the
//! subscription, then pulls at most a fixed number of messages, hands each to
//! a [`Sink`](sink::Sink) and acknowledges the ones the sink accepted.
//! Anything not acknowledged is redelivered by the service on a later run.

pub mod client;
pub mod consumer;
pub mod credentials;
pub mod error;
pub mod model;
pub mod permissions;
pub mod sink;
pub mod transport;

pub use client::Client;
pub use consumer::{BatchReport, ConsumerOptions};
pub use credentials::Credentials;
pub use error::BackendError;
