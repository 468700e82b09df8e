use chrono::{DateTime, TimeZone, Utc};
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use std::collections::HashMap;

/// Token the service requires to confirm receipt of one delivery.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AckId(pub String);

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub ack_id: AckId,
    pub payload: Vec<u8>,
    pub publish_time: Option<DateTime<Utc>>,
    pub ordering_key: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Message {
    pub fn from_pubsub(ack_id: impl Into<String>, message: &PubsubMessage) -> Self {
        let publish_time = message
            .publish_time
            .as_ref()
            .map(|t| Utc.timestamp_opt(t.seconds, t.nanos.try_into().unwrap_or(0)))
            .and_then(|lr| match lr {
                chrono::LocalResult::Single(dt) => Some(dt),
                _ => None,
            });

        let ordering_key = Some(message.ordering_key.clone()).filter(|key| !key.is_empty());

        Self {
            id: message.message_id.clone(),
            ack_id: AckId(ack_id.into()),
            payload: message.data.to_vec(),
            publish_time,
            ordering_key,
            attributes: message.attributes.clone(),
        }
    }
}
