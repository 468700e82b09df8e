//! Access to the queue service.
//!
//! [`Transport`] is the seam between the batch logic and the network. The
//! Google Cloud implementation talks to Pub/Sub; [`MemoryTransport`] keeps a
//! subscription in process and is what the test suites run against.

use async_trait::async_trait;

use crate::{
    error::TransportError,
    model::{AckId, Message, SubscriptionRef},
};

mod google;
mod memory;

pub use google::GooglePubsub;
pub use memory::{CallCounts, MemoryTransport};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the subset of `permissions` the caller holds on the subscription.
    async fn test_permissions(
        &self,
        subscription: &SubscriptionRef,
        permissions: &[String],
    ) -> Result<Vec<String>, TransportError>;

    /// Pulls at most `max_messages` messages. An empty result means nothing
    /// is currently available.
    async fn pull(
        &self,
        subscription: &SubscriptionRef,
        max_messages: usize,
    ) -> Result<Vec<Message>, TransportError>;

    async fn acknowledge(
        &self,
        subscription: &SubscriptionRef,
        ack_id: &AckId,
    ) -> Result<(), TransportError>;
}
