use std::{fmt, num::NonZeroUsize};

use crate::error::InvalidSubscription;

mod message;
pub use message::{AckId, Message};

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProjectId(pub String);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionName(pub String);

/// A subscription within a project, fixed for the lifetime of one invocation.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SubscriptionRef {
    project: ProjectId,
    name: SubscriptionName,
}

impl SubscriptionRef {
    /// Accepts either a bare subscription name or the fully qualified
    /// `projects/{project}/subscriptions/{name}` form for the same project.
    pub fn new(
        project_id: impl Into<String>,
        subscription_name: impl Into<String>,
    ) -> Result<Self, InvalidSubscription> {
        let project_id = project_id.into();
        let subscription_name = subscription_name.into();

        if project_id.is_empty() || project_id.contains('/') {
            return Err(InvalidSubscription::Project(project_id));
        }

        let name = match subscription_name.strip_prefix("projects/") {
            Some(rest) => {
                let mut parts = rest.splitn(3, '/');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(project), Some("subscriptions"), Some(name))
                        if project == project_id && !name.is_empty() && !name.contains('/') =>
                    {
                        name.to_string()
                    }
                    _ => return Err(InvalidSubscription::Name(subscription_name)),
                }
            }
            None if subscription_name.is_empty() || subscription_name.contains('/') => {
                return Err(InvalidSubscription::Name(subscription_name));
            }
            None => subscription_name,
        };

        Ok(Self {
            project: ProjectId(project_id),
            name: SubscriptionName(name),
        })
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn name(&self) -> &SubscriptionName {
        &self.name
    }

    pub fn resource_name(&self) -> String {
        format!("projects/{}/subscriptions/{}", self.project.0, self.name.0)
    }
}

impl fmt::Display for SubscriptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

/// Upper bound on the messages pulled and acknowledged in one invocation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BatchBound(NonZeroUsize);

impl BatchBound {
    pub fn new(max_messages: usize) -> Option<Self> {
        NonZeroUsize::new(max_messages).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl From<NonZeroUsize> for BatchBound {
    fn from(value: NonZeroUsize) -> Self {
        Self(value)
    }
}
