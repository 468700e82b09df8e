use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use google_cloud_gax::grpc::{Code, Status};
use google_cloud_pubsub::{
    client::{
        google_cloud_auth::{
            credentials::CredentialsFile,
            project::{create_token_source_from_credentials, Config},
            token_source::TokenSource,
        },
        Client, ClientConfig,
    },
    subscriber::ReceivedMessage,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::Transport;
use crate::{
    credentials::Credentials,
    error::{BackendError, CredentialError, TransportError},
    model::{AckId, Message, SubscriptionRef},
};

const PUBSUB_SCOPES: &[&str] = &["https://www.googleapis.com/auth/pubsub"];
const PUBSUB_REST_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct TestIamPermissionsRequest<'a> {
    permissions: &'a [String],
}

#[derive(Deserialize)]
struct TestIamPermissionsResponse {
    #[serde(default)]
    permissions: Vec<String>,
}

/// Google Cloud Pub/Sub over gRPC, with IAM checks through the REST API.
pub struct GooglePubsub {
    client: Client,
    token_source: Box<dyn TokenSource>,
    http: reqwest::Client,
    // Pulled messages keyed by ack id, until they are acknowledged.
    leased: Mutex<HashMap<String, ReceivedMessage>>,
}

impl GooglePubsub {
    /// Authenticates with the service account key. The key is exchanged for
    /// an access token once, so a revoked or disabled key fails here rather
    /// than on the first queue call.
    pub async fn connect(credentials: &Credentials) -> Result<Self, BackendError> {
        let rejected = |message: String| CredentialError::Rejected {
            principal: credentials.principal().to_string(),
            message,
        };

        let key = CredentialsFile::new_from_file(credentials.path().display().to_string())
            .await
            .map_err(|err| rejected(err.to_string()))?;

        let config = Config {
            scopes: Some(PUBSUB_SCOPES),
            ..Default::default()
        };
        let token_source = create_token_source_from_credentials(&key, &config)
            .await
            .map_err(|err| rejected(err.to_string()))?;
        token_source
            .token()
            .await
            .map_err(|err| rejected(err.to_string()))?;
        log::debug!("authenticated as {}", credentials.principal());

        let client_config = ClientConfig::default()
            .with_credentials(key)
            .await
            .map_err(|err| rejected(err.to_string()))?;
        let client = Client::new(client_config).await.map_err(|err| {
            BackendError::Connect(TransportError::Unavailable {
                message: err.to_string(),
            })
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                BackendError::Connect(TransportError::Other {
                    message: err.to_string(),
                })
            })?;

        Ok(Self {
            client,
            token_source,
            http,
            leased: Mutex::new(HashMap::new()),
        })
    }
}

fn status_error(resource: &str, status: Status) -> TransportError {
    let message = status.message().to_string();
    match status.code() {
        Code::NotFound => TransportError::NotFound {
            resource: resource.to_string(),
        },
        Code::PermissionDenied => TransportError::PermissionDenied { message },
        Code::Unauthenticated => TransportError::Unauthenticated { message },
        Code::Unavailable | Code::DeadlineExceeded => TransportError::Unavailable { message },
        code => TransportError::Other {
            message: format!("{code:?}: {message}"),
        },
    }
}

fn http_error(resource: &str, status: StatusCode, body: String) -> TransportError {
    match status {
        StatusCode::NOT_FOUND => TransportError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::FORBIDDEN => TransportError::PermissionDenied { message: body },
        StatusCode::UNAUTHORIZED => TransportError::Unauthenticated { message: body },
        status if status.is_server_error() => TransportError::Unavailable {
            message: format!("{status}: {body}"),
        },
        status => TransportError::Other {
            message: format!("{status}: {body}"),
        },
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() {
        TransportError::Unavailable {
            message: err.to_string(),
        }
    } else {
        TransportError::Other {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for GooglePubsub {
    async fn test_permissions(
        &self,
        subscription: &SubscriptionRef,
        permissions: &[String],
    ) -> Result<Vec<String>, TransportError> {
        let resource = subscription.resource_name();
        let token = self
            .token_source
            .token()
            .await
            .map_err(|err| TransportError::Unauthenticated {
                message: err.to_string(),
            })?;

        let response = self
            .http
            .post(format!("{PUBSUB_REST_ENDPOINT}/{resource}:testIamPermissions"))
            .bearer_auth(&token.access_token)
            .json(&TestIamPermissionsRequest { permissions })
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(&resource, status, body));
        }

        let granted: TestIamPermissionsResponse =
            response.json().await.map_err(request_error)?;
        Ok(granted.permissions)
    }

    async fn pull(
        &self,
        subscription: &SubscriptionRef,
        max_messages: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let resource = subscription.resource_name();
        let max_messages = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let received = self
            .client
            .subscription(&resource)
            .pull(max_messages, None)
            .await
            .map_err(|status| status_error(&resource, status))?;

        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(received
            .into_iter()
            .map(|received| {
                let message = Message::from_pubsub(received.ack_id(), &received.message);
                leased.insert(received.ack_id().to_string(), received);
                message
            })
            .collect())
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionRef,
        ack_id: &AckId,
    ) -> Result<(), TransportError> {
        let received = self
            .leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ack_id.0);

        match received {
            Some(received) => received
                .ack()
                .await
                .map_err(|status| status_error(&subscription.resource_name(), status)),
            None => Err(TransportError::Other {
                message: format!("ack id {} was not issued by this client", ack_id.0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_codes_map_to_transport_errors() {
        let resource = "projects/p/subscriptions/s";

        assert_eq!(
            status_error(resource, Status::new(Code::NotFound, "gone")),
            TransportError::NotFound {
                resource: resource.to_string()
            }
        );
        assert_eq!(
            status_error(resource, Status::new(Code::Unavailable, "reset")),
            TransportError::Unavailable {
                message: "reset".to_string()
            }
        );
        assert!(matches!(
            status_error(resource, Status::new(Code::Internal, "boom")),
            TransportError::Other { .. }
        ));
    }

    #[test]
    fn http_statuses_map_to_transport_errors() {
        let resource = "projects/p/subscriptions/s";

        assert!(matches!(
            http_error(resource, StatusCode::NOT_FOUND, String::new()),
            TransportError::NotFound { .. }
        ));
        assert!(matches!(
            http_error(resource, StatusCode::FORBIDDEN, String::new()),
            TransportError::PermissionDenied { .. }
        ));
        assert!(matches!(
            http_error(resource, StatusCode::SERVICE_UNAVAILABLE, String::new()),
            TransportError::Unavailable { .. }
        ));
    }

    #[test]
    fn permission_response_without_grants_is_empty() {
        let response: TestIamPermissionsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.permissions.is_empty());
    }
}
