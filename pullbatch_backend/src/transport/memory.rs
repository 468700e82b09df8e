//! In-process subscription used as a test double for the queue service.
//!
//! Messages published here follow the service's delivery rules closely enough
//! for the batch logic to be exercised end to end:
//! - a pull leases messages in publication order under a fresh ack id
//! - acknowledged messages are gone for good
//! - leased messages come back when their ack deadline expires
//!
//! Failures can be injected per call to simulate transport problems.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Transport;
use crate::{
    error::TransportError,
    model::{AckId, Message, SubscriptionRef},
};

#[derive(Clone)]
struct StoredMessage {
    seq: u64,
    id: String,
    payload: Vec<u8>,
    ordering_key: Option<String>,
    attributes: HashMap<String, String>,
    publish_time: DateTime<Utc>,
    deliveries: u32,
}

/// Number of calls the transport has served, by operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub permission_queries: usize,
    pub pulls: usize,
    pub acks: usize,
    /// `max_messages` of every pull, in call order.
    pub pull_sizes: Vec<usize>,
}

struct State {
    exists: bool,
    granted: HashSet<String>,
    available: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
    acknowledged: Vec<String>,
    failing_acks: HashSet<String>,
    failing_pulls: HashMap<usize, TransportError>,
    permission_failure: Option<TransportError>,
    surplus: usize,
    hang_when_empty: bool,
    next_seq: u64,
    calls: CallCounts,
}

impl Default for State {
    fn default() -> Self {
        Self {
            exists: true,
            granted: HashSet::new(),
            available: VecDeque::new(),
            in_flight: HashMap::new(),
            acknowledged: Vec::new(),
            failing_acks: HashSet::new(),
            failing_pulls: HashMap::new(),
            permission_failure: None,
            surplus: 0,
            hang_when_empty: false,
            next_seq: 0,
            calls: CallCounts::default(),
        }
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn grant(&self, permission: &str) {
        self.state().granted.insert(permission.to_string());
    }

    pub fn revoke(&self, permission: &str) {
        self.state().granted.remove(permission);
    }

    pub fn delete_subscription(&self) {
        self.state().exists = false;
    }

    /// Publishes a message and returns its id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        self.publish_message(payload.into(), None, HashMap::new())
    }

    pub fn publish_with_ordering_key(
        &self,
        payload: impl Into<Vec<u8>>,
        ordering_key: &str,
    ) -> String {
        self.publish_message(payload.into(), Some(ordering_key.to_string()), HashMap::new())
    }

    pub fn publish_with_attributes(
        &self,
        payload: impl Into<Vec<u8>>,
        attributes: HashMap<String, String>,
    ) -> String {
        self.publish_message(payload.into(), None, attributes)
    }

    fn publish_message(
        &self,
        payload: Vec<u8>,
        ordering_key: Option<String>,
        attributes: HashMap<String, String>,
    ) -> String {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;

        let id = (seq + 1).to_string();
        state.available.push_back(StoredMessage {
            seq,
            id: id.clone(),
            payload,
            ordering_key,
            attributes,
            publish_time: Utc::now(),
            deliveries: 0,
        });
        id
    }

    /// Acknowledging the message with this id will fail until cleared.
    pub fn fail_ack_of(&self, message_id: &str) {
        self.state().failing_acks.insert(message_id.to_string());
    }

    pub fn clear_ack_failures(&self) {
        self.state().failing_acks.clear();
    }

    /// The `nth` pull (counting from 1 over the transport's lifetime) fails.
    pub fn fail_pull(&self, nth: usize, error: TransportError) {
        self.state().failing_pulls.insert(nth, error);
    }

    pub fn fail_permission_query(&self, error: TransportError) {
        self.state().permission_failure = Some(error);
    }

    /// Every pull returns up to `extra` messages beyond what was asked for.
    pub fn oversupply(&self, extra: usize) {
        self.state().surplus = extra;
    }

    /// A pull finding nothing to deliver waits forever instead of returning
    /// empty, like a server holding the request open for new messages.
    pub fn hang_when_empty(&self) {
        self.state().hang_when_empty = true;
    }

    /// Returns every leased but unacknowledged message to the subscription,
    /// as the service does once the ack deadline passes.
    pub fn expire_ack_deadlines(&self) {
        let mut state = self.state();
        let mut returned: Vec<StoredMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
        returned.extend(state.available.drain(..));
        returned.sort_by_key(|message| message.seq);
        state.available = returned.into();
    }

    pub fn available(&self) -> usize {
        self.state().available.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Ids of acknowledged messages, in acknowledgment order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.state().acknowledged.clone()
    }

    /// How many times the message has been handed out by a pull.
    pub fn deliveries(&self, message_id: &str) -> u32 {
        let state = self.state();
        state
            .available
            .iter()
            .chain(state.in_flight.values())
            .find(|message| message.id == message_id)
            .map_or(0, |message| message.deliveries)
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    fn lease(
        &self,
        subscription: &SubscriptionRef,
        max_messages: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let mut state = self.state();
        state.calls.pulls += 1;
        state.calls.pull_sizes.push(max_messages);

        let nth = state.calls.pulls;
        if let Some(error) = state.failing_pulls.remove(&nth) {
            return Err(error);
        }
        if !state.exists {
            return Err(not_found(subscription));
        }

        let take = (max_messages + state.surplus).min(state.available.len());
        let leased: Vec<StoredMessage> = state.available.drain(..take).collect();
        let mut messages = Vec::with_capacity(take);
        for mut stored in leased {
            stored.deliveries += 1;
            let ack_id = format!("ack-{}", Uuid::new_v4());

            messages.push(Message {
                id: stored.id.clone(),
                ack_id: AckId(ack_id.clone()),
                payload: stored.payload.clone(),
                publish_time: Some(stored.publish_time),
                ordering_key: stored.ordering_key.clone(),
                attributes: stored.attributes.clone(),
            });
            state.in_flight.insert(ack_id, stored);
        }

        Ok(messages)
    }
}

fn not_found(subscription: &SubscriptionRef) -> TransportError {
    TransportError::NotFound {
        resource: subscription.resource_name(),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn test_permissions(
        &self,
        subscription: &SubscriptionRef,
        permissions: &[String],
    ) -> Result<Vec<String>, TransportError> {
        let mut state = self.state();
        state.calls.permission_queries += 1;

        if let Some(error) = state.permission_failure.clone() {
            return Err(error);
        }
        if !state.exists {
            return Err(not_found(subscription));
        }

        Ok(permissions
            .iter()
            .filter(|permission| state.granted.contains(*permission))
            .cloned()
            .collect())
    }

    async fn pull(
        &self,
        subscription: &SubscriptionRef,
        max_messages: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let messages = self.lease(subscription, max_messages)?;
        let hang = messages.is_empty() && self.state().hang_when_empty;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(messages)
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionRef,
        ack_id: &AckId,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.acks += 1;

        if !state.exists {
            return Err(not_found(subscription));
        }

        let message_id = match state.in_flight.get(&ack_id.0) {
            Some(message) => message.id.clone(),
            None => {
                return Err(TransportError::Other {
                    message: format!("unknown or expired ack id {}", ack_id.0),
                });
            }
        };
        if state.failing_acks.contains(&message_id) {
            return Err(TransportError::Unavailable {
                message: format!("acknowledge of {message_id} timed out"),
            });
        }

        state.in_flight.remove(&ack_id.0);
        state.acknowledged.push(message_id);
        Ok(())
    }
}
