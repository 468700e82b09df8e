use std::{collections::HashSet, fmt};

use crate::{
    error::{PermissionError, TransportError},
    model::SubscriptionRef,
    transport::Transport,
};

/// Pub/Sub grants pulling and acknowledging through a single permission.
pub const PUBSUB_CONSUME: &str = "pubsub.subscriptions.consume";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Capability {
    Pull,
    Acknowledge,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pull => f.write_str("pull"),
            Self::Acknowledge => f.write_str("acknowledge"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RequiredPermission {
    pub capability: Capability,
    pub permission: String,
}

/// The permissions the identity must hold before a batch is consumed.
#[derive(Debug, Clone)]
pub struct RequiredPermissions(Vec<RequiredPermission>);

impl RequiredPermissions {
    pub fn new(pull: impl Into<String>, acknowledge: impl Into<String>) -> Self {
        Self(vec![
            RequiredPermission {
                capability: Capability::Pull,
                permission: pull.into(),
            },
            RequiredPermission {
                capability: Capability::Acknowledge,
                permission: acknowledge.into(),
            },
        ])
    }

    /// Distinct permission names, in declaration order.
    pub fn names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .filter(|required| seen.insert(required.permission.as_str()))
            .map(|required| required.permission.clone())
            .collect()
    }

    fn missing_from(&self, granted: &[String]) -> Vec<RequiredPermission> {
        self.0
            .iter()
            .filter(|required| !granted.contains(&required.permission))
            .cloned()
            .collect()
    }
}

impl Default for RequiredPermissions {
    fn default() -> Self {
        Self::new(PUBSUB_CONSUME, PUBSUB_CONSUME)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MissingPermissions(pub Vec<RequiredPermission>);

impl MissingPermissions {
    pub fn capabilities(&self) -> Vec<Capability> {
        self.0.iter().map(|missing| missing.capability).collect()
    }
}

impl fmt::Display for MissingPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, missing) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} ({})", missing.permission, missing.capability)?;
        }
        Ok(())
    }
}

/// Asks the queue service which of the required permissions the identity
/// holds on `subscription`. Performs exactly one remote query.
pub async fn check_permissions<T: Transport + ?Sized>(
    transport: &T,
    subscription: &SubscriptionRef,
    required: &RequiredPermissions,
) -> Result<(), PermissionError> {
    let names = required.names();
    log::debug!("testing permissions {names:?} on {subscription}");

    let granted = match transport.test_permissions(subscription, &names).await {
        Ok(granted) => granted,
        Err(TransportError::NotFound { .. }) => {
            return Err(PermissionError::SubscriptionNotFound {
                subscription: subscription.resource_name(),
            });
        }
        // A caller without any access to the resource is refused outright
        // instead of being told which permissions it holds.
        Err(TransportError::PermissionDenied { .. }) => Vec::new(),
        Err(source) => {
            return Err(PermissionError::Query {
                subscription: subscription.resource_name(),
                source,
            });
        }
    };

    let missing = required.missing_from(&granted);
    if !missing.is_empty() {
        return Err(PermissionError::Missing {
            subscription: subscription.resource_name(),
            missing: MissingPermissions(missing),
        });
    }

    log::debug!("permissions granted on {subscription}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn subscription() -> SubscriptionRef {
        SubscriptionRef::new("my-project", "events").unwrap()
    }

    fn split_permissions() -> RequiredPermissions {
        RequiredPermissions::new("queue.pull", "queue.ack")
    }

    #[test]
    fn shared_permission_is_queried_once() {
        assert_eq!(RequiredPermissions::default().names(), vec![PUBSUB_CONSUME]);
        assert_eq!(split_permissions().names(), vec!["queue.pull", "queue.ack"]);
    }

    #[tokio::test]
    async fn passes_when_every_permission_is_granted() {
        let transport = MemoryTransport::new();
        transport.grant(PUBSUB_CONSUME);

        check_permissions(&transport, &subscription(), &RequiredPermissions::default())
            .await
            .unwrap();

        assert_eq!(transport.calls().permission_queries, 1);
    }

    #[tokio::test]
    async fn reports_only_the_missing_capability() {
        let transport = MemoryTransport::new();
        transport.grant("queue.pull");

        let err = check_permissions(&transport, &subscription(), &split_permissions())
            .await
            .unwrap_err();

        match err {
            PermissionError::Missing { missing, .. } => {
                assert_eq!(missing.capabilities(), vec![Capability::Acknowledge]);
                assert_eq!(missing.to_string(), "queue.ack (acknowledge)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shared_permission_missing_blocks_both_capabilities() {
        let transport = MemoryTransport::new();

        let err = check_permissions(&transport, &subscription(), &RequiredPermissions::default())
            .await
            .unwrap_err();

        match err {
            PermissionError::Missing { missing, .. } => assert_eq!(
                missing.capabilities(),
                vec![Capability::Pull, Capability::Acknowledge]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_subscription_is_reported() {
        let transport = MemoryTransport::new();
        transport.grant(PUBSUB_CONSUME);
        transport.delete_subscription();

        let err = check_permissions(&transport, &subscription(), &RequiredPermissions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::SubscriptionNotFound { .. }));
    }

    #[tokio::test]
    async fn access_denied_counts_as_missing_everything() {
        let transport = MemoryTransport::new();
        transport.fail_permission_query(TransportError::PermissionDenied {
            message: "caller has no access".to_string(),
        });

        let err = check_permissions(&transport, &subscription(), &RequiredPermissions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::Missing { .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_a_query_error() {
        let transport = MemoryTransport::new();
        transport.fail_permission_query(TransportError::Unavailable {
            message: "connection reset".to_string(),
        });

        let err = check_permissions(&transport, &subscription(), &RequiredPermissions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PermissionError::Query { .. }));
        assert_eq!(transport.calls().pulls, 0);
    }
}
