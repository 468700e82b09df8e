use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::stream;
use futures_util::StreamExt;

use crate::{
    error::{ConsumerError, SinkError},
    model::{BatchBound, Message, SubscriptionRef},
    sink::Sink,
    transport::Transport,
};

pub const DEFAULT_PULL_SIZE: usize = 100;
pub const MAX_PULL_SIZE: usize = 1000;
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Most messages asked for in a single pull request.
    pub pull_size: NonZeroUsize,
    /// Messages of one pull handed to the sink at the same time.
    pub concurrency: NonZeroUsize,
    /// How long a single pull may wait for messages. A pull still pending
    /// after this counts as an empty one.
    pub pull_wait: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            pull_size: NonZeroUsize::new(DEFAULT_PULL_SIZE).unwrap_or(NonZeroUsize::MIN),
            concurrency: NonZeroUsize::MIN,
            pull_wait: DEFAULT_PULL_WAIT,
        }
    }
}

/// What happened to the messages of one batch.
///
/// `pulled == processed + processing_failures + ack_failures` when the batch
/// completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub pulls: usize,
    pub pulled: usize,
    /// Messages both delivered to the sink and acknowledged.
    pub processed: usize,
    pub processing_failures: usize,
    pub ack_failures: usize,
}

enum Outcome {
    Acknowledged,
    ProcessingFailed,
    AckFailed,
    SinkUnavailable(SinkError),
    /// Not handed to the sink because it had already become unavailable.
    Skipped,
}

/// Pulls until `bound` messages have been received or the subscription has
/// nothing more to give, delivering each to `sink` and acknowledging it once
/// the sink accepted it.
pub async fn process_messages<T, S>(
    transport: &T,
    subscription: &SubscriptionRef,
    bound: BatchBound,
    options: ConsumerOptions,
    sink: &S,
) -> Result<BatchReport, ConsumerError>
where
    T: Transport + ?Sized,
    S: Sink + ?Sized,
{
    let mut report = BatchReport::default();

    while report.pulled < bound.get() {
        let request = (bound.get() - report.pulled).min(options.pull_size.get());

        report.pulls += 1;
        let pull = transport.pull(subscription, request);
        let mut messages = match tokio::time::timeout(options.pull_wait, pull).await {
            Ok(result) => result.map_err(|source| ConsumerError::Pull {
                processed: report.processed,
                source,
            })?,
            Err(_) => {
                log::debug!("pull on {subscription} still waiting after {:?}", options.pull_wait);
                Vec::new()
            }
        };

        if messages.is_empty() {
            log::debug!("no more messages available on {subscription}");
            break;
        }
        if messages.len() > request {
            log::warn!(
                "pull of {request} returned {} messages, leaving the surplus unacknowledged",
                messages.len()
            );
            messages.truncate(request);
        }

        report.pulled += messages.len();
        log::debug!("pulled {} messages from {subscription}", messages.len());

        let sink_gone = AtomicBool::new(false);
        let mut unavailable = None;
        let mut outcomes = stream::iter(messages)
            .map(|message| handle(transport, subscription, sink, &sink_gone, message))
            .buffer_unordered(options.concurrency.get());

        // Deliveries already in flight run to completion so their acks are counted.
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Outcome::Acknowledged => report.processed += 1,
                Outcome::ProcessingFailed => report.processing_failures += 1,
                Outcome::AckFailed => report.ack_failures += 1,
                Outcome::SinkUnavailable(source) => {
                    sink_gone.store(true, Ordering::SeqCst);
                    unavailable.get_or_insert(source);
                }
                Outcome::Skipped => {}
            }
        }

        if let Some(source) = unavailable {
            return Err(ConsumerError::SinkUnavailable {
                processed: report.processed,
                source,
            });
        }
    }

    log::debug!("{report:?}");
    Ok(report)
}

async fn handle<T, S>(
    transport: &T,
    subscription: &SubscriptionRef,
    sink: &S,
    sink_gone: &AtomicBool,
    message: Message,
) -> Outcome
where
    T: Transport + ?Sized,
    S: Sink + ?Sized,
{
    if sink_gone.load(Ordering::SeqCst) {
        return Outcome::Skipped;
    }
    if let Err(err) = sink.deliver(&message).await {
        if err.is_unavailable() {
            return Outcome::SinkUnavailable(err);
        }
        log::warn!(
            "processing message {} failed, leaving it for redelivery: {err}",
            message.id
        );
        return Outcome::ProcessingFailed;
    }

    match transport.acknowledge(subscription, &message.ack_id).await {
        Ok(()) => {
            log::trace!("acknowledged message {}", message.id);
            Outcome::Acknowledged
        }
        Err(err) => {
            log::warn!("acknowledging message {} failed: {err}", message.id);
            Outcome::AckFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{atomic::AtomicUsize, Mutex},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{error::TransportError, transport::MemoryTransport};

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<String>>,
        rejected: HashSet<Vec<u8>>,
    }

    #[async_trait]
    impl Sink for Recorder {
        async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
            if self.rejected.contains(&message.payload) {
                return Err(SinkError::Encoding {
                    message_id: message.id.clone(),
                });
            }
            self.delivered.lock().unwrap().push(message.id.clone());
            Ok(())
        }
    }

    struct Gone;

    #[async_trait]
    impl Sink for Gone {
        async fn deliver(&self, _message: &Message) -> Result<(), SinkError> {
            Err(SinkError::Unavailable(std::io::ErrorKind::ConnectionRefused.into()))
        }
    }

    /// Tracks how many deliveries run at the same time.
    #[derive(Default)]
    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Sink for Slow {
        async fn deliver(&self, _message: &Message) -> Result<(), SinkError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn subscription() -> SubscriptionRef {
        SubscriptionRef::new("my-project", "events").unwrap()
    }

    fn bound(n: usize) -> BatchBound {
        BatchBound::new(n).unwrap()
    }

    fn options(pull_size: usize, concurrency: usize) -> ConsumerOptions {
        ConsumerOptions {
            pull_size: NonZeroUsize::new(pull_size).unwrap(),
            concurrency: NonZeroUsize::new(concurrency).unwrap(),
            ..ConsumerOptions::default()
        }
    }

    #[tokio::test]
    async fn pulls_are_split_by_pull_size() {
        let transport = MemoryTransport::new();
        for i in 0..7 {
            transport.publish(format!("m{i}"));
        }

        let report = process_messages(
            &transport,
            &subscription(),
            bound(7),
            options(3, 1),
            &Recorder::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.processed, 7);
        assert_eq!(report.pulls, 3);
        assert_eq!(transport.calls().pull_sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn stops_pulling_when_the_subscription_is_drained() {
        let transport = MemoryTransport::new();
        transport.publish("only");

        let report = process_messages(
            &transport,
            &subscription(),
            bound(50),
            options(10, 1),
            &Recorder::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(transport.calls().pull_sizes, vec![10, 10]);
    }

    #[tokio::test]
    async fn surplus_from_the_transport_is_not_processed() {
        let transport = MemoryTransport::new();
        for i in 0..10 {
            transport.publish(format!("m{i}"));
        }
        transport.oversupply(4);
        let sink = Recorder::default();

        let report = process_messages(&transport, &subscription(), bound(3), options(10, 1), &sink)
            .await
            .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(sink.delivered.lock().unwrap().len(), 3);
        assert_eq!(transport.acknowledged().len(), 3);
    }

    #[tokio::test]
    async fn pull_failure_mid_batch_keeps_earlier_acks() {
        let transport = MemoryTransport::new();
        for i in 0..6 {
            transport.publish(format!("m{i}"));
        }
        transport.fail_pull(
            2,
            TransportError::Unauthenticated {
                message: "token expired".to_string(),
            },
        );

        let err = process_messages(
            &transport,
            &subscription(),
            bound(6),
            options(3, 1),
            &Recorder::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConsumerError::Pull { processed: 3, .. }));
        assert_eq!(transport.acknowledged().len(), 3);
        assert_eq!(transport.available(), 3);
    }

    #[tokio::test]
    async fn unavailable_sink_aborts_the_batch() {
        let transport = MemoryTransport::new();
        transport.publish("a");
        transport.publish("b");

        let err = process_messages(&transport, &subscription(), bound(2), options(2, 1), &Gone)
            .await
            .unwrap_err();

        assert!(matches!(err, ConsumerError::SinkUnavailable { processed: 0, .. }));
        assert!(transport.acknowledged().is_empty());
    }

    /// Fails every `poison` payload as unavailable and accepts the rest
    /// after a short delay.
    struct DiesOn {
        poison: Vec<u8>,
    }

    #[async_trait]
    impl Sink for DiesOn {
        async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
            if message.payload == self.poison {
                return Err(SinkError::Unavailable(
                    std::io::ErrorKind::ConnectionRefused.into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn unavailable_sink_still_counts_acks_already_in_flight() {
        let transport = MemoryTransport::new();
        for payload in ["a", "dead", "b", "c", "d"] {
            transport.publish(payload);
        }
        let sink = DiesOn {
            poison: b"dead".to_vec(),
        };

        let err = process_messages(&transport, &subscription(), bound(5), options(5, 3), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ConsumerError::SinkUnavailable { .. }));
        assert_eq!(err.processed(), 2);
        assert_eq!(transport.acknowledged().len(), err.processed());
        assert_eq!(transport.in_flight(), 3);
    }

    #[tokio::test]
    async fn pull_that_waits_on_an_empty_subscription_ends_the_batch() {
        let transport = MemoryTransport::new();
        for i in 0..5 {
            transport.publish(format!("m{i}"));
        }
        transport.hang_when_empty();
        let options = ConsumerOptions {
            pull_wait: Duration::from_millis(50),
            ..options(10, 1)
        };

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            process_messages(&transport, &subscription(), bound(10), options, &Recorder::default()),
        )
        .await
        .expect("batch should end once the pull wait elapses")
        .unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.pulls, 2);
    }

    #[tokio::test]
    async fn empty_subscription_that_waits_processes_nothing() {
        let transport = MemoryTransport::new();
        transport.hang_when_empty();
        let options = ConsumerOptions {
            pull_wait: Duration::from_millis(50),
            ..options(10, 1)
        };

        let report = process_messages(
            &transport,
            &subscription(),
            bound(10),
            options,
            &Recorder::default(),
        )
        .await
        .unwrap();

        assert_eq!(report, BatchReport { pulls: 1, ..BatchReport::default() });
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let transport = MemoryTransport::new();
        for i in 0..8 {
            transport.publish(format!("m{i}"));
        }
        let sink = Slow::default();

        let report = process_messages(&transport, &subscription(), bound(8), options(8, 3), &sink)
            .await
            .unwrap();

        assert_eq!(report.processed, 8);
        assert!(sink.peak.load(Ordering::SeqCst) <= 3);
        assert!(sink.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn report_accounts_for_every_pulled_message() {
        let transport = MemoryTransport::new();
        transport.publish("ok");
        transport.publish("bad");
        let flaky = transport.publish("ok too");
        transport.fail_ack_of(&flaky);
        let sink = Recorder {
            rejected: HashSet::from([b"bad".to_vec()]),
            ..Default::default()
        };

        let report = process_messages(&transport, &subscription(), bound(3), options(3, 1), &sink)
            .await
            .unwrap();

        assert_eq!(
            report,
            BatchReport {
                pulls: 1,
                pulled: 3,
                processed: 1,
                processing_failures: 1,
                ack_failures: 1,
            }
        );
    }
}
