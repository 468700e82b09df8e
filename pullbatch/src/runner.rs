use std::{process::ExitCode, time::Duration};

use pullbatch_backend::{
    error::{BackendError, SinkError},
    model::{BatchBound, SubscriptionRef},
    sink::{Sink, StdoutSink},
    transport::Transport,
    BatchReport, Client, Credentials,
};
use thiserror::Error;

use crate::{
    args::{Args, SinkKind},
    logging,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("could not open the sink")]
    Sink(#[source] SinkError),

    #[error("socket sink is not supported on this platform")]
    UnsupportedSink,

    #[error("run did not finish within {0:?}")]
    Timeout(Duration),
}

/// Checks permissions and, only once they are confirmed, consumes one batch.
pub async fn execute<T, S>(
    client: &Client<T>,
    max_messages: BatchBound,
    sink: &S,
) -> Result<BatchReport, BackendError>
where
    T: Transport,
    S: Sink + ?Sized,
{
    client.check_permissions().await?;
    log::debug!(
        "permissions confirmed on {}, consuming up to {} messages",
        client.subscription(),
        max_messages.get()
    );

    Ok(client.process_messages(max_messages, sink).await?)
}

pub async fn run(args: &Args) -> Result<BatchReport, RunError> {
    match args.timeout() {
        Some(limit) => tokio::time::timeout(limit, run_batch(args))
            .await
            .map_err(|_| RunError::Timeout(limit))?,
        None => run_batch(args).await,
    }
}

async fn run_batch(args: &Args) -> Result<BatchReport, RunError> {
    let subscription = SubscriptionRef::new(&args.project_id, &args.subscription_name)
        .map_err(BackendError::from)?;
    let credentials = Credentials::from_file(&args.credentials_file)
        .await
        .map_err(BackendError::from)?;
    let sink = open_sink(args)?;

    let client = Client::connect(&credentials, subscription)
        .await?
        .with_options(args.consumer_options());

    Ok(execute(&client, args.max_messages.into(), sink.as_ref()).await?)
}

/// Logs how the run ended and maps it to the process exit status.
pub fn report(outcome: &Result<BatchReport, RunError>) -> ExitCode {
    match outcome {
        Ok(report) => {
            log::debug!("{report:?}");
            log::info!("Received and acknowledged {} messages", report.processed);
            ExitCode::SUCCESS
        }
        Err(err) => {
            logging::critical(err);
            ExitCode::FAILURE
        }
    }
}

fn open_sink(args: &Args) -> Result<Box<dyn Sink>, RunError> {
    match args.sink {
        SinkKind::Stdout => Ok(Box::new(StdoutSink::new())),
        #[cfg(unix)]
        SinkKind::Socket => {
            let path = args.socket_path.as_deref().ok_or_else(|| {
                RunError::Sink(SinkError::Unavailable(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no socket path given",
                )))
            })?;
            let sink = pullbatch_backend::sink::SocketSink::connect(path, args.location.as_str())
                .map_err(RunError::Sink)?;
            Ok(Box::new(sink))
        }
        #[cfg(not(unix))]
        SinkKind::Socket => Err(RunError::UnsupportedSink),
    }
}
