use crate::{
    consumer::{self, BatchReport, ConsumerOptions},
    credentials::Credentials,
    error::{BackendError, ConsumerError, PermissionError},
    model::{BatchBound, SubscriptionRef},
    permissions::{self, RequiredPermissions},
    sink::Sink,
    transport::{GooglePubsub, Transport},
};

/// A consumer bound to one subscription for the length of an invocation.
pub struct Client<T> {
    transport: T,
    subscription: SubscriptionRef,
    permissions: RequiredPermissions,
    options: ConsumerOptions,
}

impl Client<GooglePubsub> {
    pub async fn connect(
        credentials: &Credentials,
        subscription: SubscriptionRef,
    ) -> Result<Self, BackendError> {
        let transport = GooglePubsub::connect(credentials).await?;
        Ok(Self::new(transport, subscription))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, subscription: SubscriptionRef) -> Self {
        Self {
            transport,
            subscription,
            permissions: RequiredPermissions::default(),
            options: ConsumerOptions::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: RequiredPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscription(&self) -> &SubscriptionRef {
        &self.subscription
    }

    pub async fn check_permissions(&self) -> Result<(), PermissionError> {
        permissions::check_permissions(&self.transport, &self.subscription, &self.permissions).await
    }

    /// Consumes at most `max_messages` messages. The processed count is
    /// [`BatchReport::processed`].
    pub async fn process_messages<S: Sink + ?Sized>(
        &self,
        max_messages: BatchBound,
        sink: &S,
    ) -> Result<BatchReport, ConsumerError> {
        consumer::process_messages(
            &self.transport,
            &self.subscription,
            max_messages,
            self.options,
            sink,
        )
        .await
    }
}
