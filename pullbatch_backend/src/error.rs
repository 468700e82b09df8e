use std::{io, path::PathBuf};

use thiserror::Error;

use crate::permissions::MissingPermissions;

#[derive(Debug, Error)]
pub enum InvalidSubscription {
    #[error("invalid project id {0:?}")]
    Project(String),

    #[error("invalid subscription name {0:?}")]
    Name(String),
}

/// Failure to turn a credential file into an authenticated identity.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credentials file {} does not exist", .path.display())]
    NotFound { path: PathBuf },

    #[error("credentials file {} could not be read", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credentials file {} is not a service account key: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("credentials for {principal} were rejected: {message}")]
    Rejected { principal: String, message: String },
}

/// Failure reported by the queue service or the network path to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{resource} was not found")]
    NotFound { resource: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    #[error("{message}")]
    Other { message: String },
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("subscription {subscription} does not exist")]
    SubscriptionNotFound { subscription: String },

    #[error("missing permissions on {subscription}: {missing}")]
    Missing {
        subscription: String,
        missing: MissingPermissions,
    },

    #[error("could not query permissions on {subscription}")]
    Query {
        subscription: String,
        #[source]
        source: TransportError,
    },
}

/// Failure of the downstream sink for one message.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("payload of message {message_id} is not valid UTF-8")]
    Encoding { message_id: String },

    #[error("event of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("failed to write event")]
    Io(#[from] io::Error),

    /// The sink cannot accept any further message.
    #[error("sink is unavailable")]
    Unavailable(#[source] io::Error),
}

impl SinkError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failure that aborts the whole batch.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("pull failed after {processed} acknowledged messages")]
    Pull {
        processed: usize,
        #[source]
        source: TransportError,
    },

    #[error("sink failed after {processed} acknowledged messages")]
    SinkUnavailable {
        processed: usize,
        #[source]
        source: SinkError,
    },
}

impl ConsumerError {
    /// Messages acknowledged before the batch was aborted.
    pub fn processed(&self) -> usize {
        match self {
            Self::Pull { processed, .. } | Self::SinkUnavailable { processed, .. } => *processed,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    InvalidSubscription(#[from] InvalidSubscription),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("could not connect to the queue service")]
    Connect(#[source] TransportError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}
