use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use pullbatch_backend::{
    consumer::{ConsumerOptions, MAX_PULL_SIZE},
    sink::DEFAULT_LOCATION,
};

use crate::logging::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// One JSON event per line on standard output.
    Stdout,
    /// One datagram per event on a Unix datagram socket.
    Socket,
}

/// Pull one bounded batch of messages from a Pub/Sub subscription, forward
/// them and acknowledge the ones that were delivered.
#[derive(Parser, Debug)]
#[command(name = "pullbatch", version)]
pub struct Args {
    /// Google Cloud project that owns the subscription.
    #[arg(short = 'p', long, env = "PULLBATCH_PROJECT_ID")]
    pub project_id: String,

    /// Subscription name, bare or as projects/{project}/subscriptions/{name}.
    #[arg(short = 's', long, env = "PULLBATCH_SUBSCRIPTION")]
    pub subscription_name: String,

    /// Service account key file.
    #[arg(short = 'c', long, env = "PULLBATCH_CREDENTIALS_FILE")]
    pub credentials_file: PathBuf,

    /// Most messages to pull and acknowledge in this run.
    #[arg(short = 'm', long, env = "PULLBATCH_MAX_MESSAGES", default_value = "100")]
    pub max_messages: NonZeroUsize,

    #[arg(
        short = 'l',
        long,
        env = "PULLBATCH_LOG_LEVEL",
        value_enum,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    /// Most messages asked for in a single pull request.
    #[arg(long, env = "PULLBATCH_PULL_SIZE", default_value = "100", value_parser = parse_pull_size)]
    pub pull_size: NonZeroUsize,

    /// Messages handed to the sink at the same time.
    #[arg(long, env = "PULLBATCH_CONCURRENCY", default_value = "1")]
    pub concurrency: NonZeroUsize,

    /// Milliseconds a pull may wait for messages before the subscription
    /// counts as drained.
    #[arg(long, env = "PULLBATCH_PULL_WAIT_MS", default_value = "5000")]
    pub pull_wait_ms: u64,

    #[arg(long, env = "PULLBATCH_SINK", value_enum, default_value_t = SinkKind::Stdout)]
    pub sink: SinkKind,

    /// Socket the events are sent to with `--sink socket`.
    #[arg(long, env = "PULLBATCH_SOCKET_PATH", required_if_eq("sink", "socket"))]
    pub socket_path: Option<PathBuf>,

    /// Location tag in the socket event header.
    #[arg(long, env = "PULLBATCH_LOCATION", default_value = DEFAULT_LOCATION)]
    pub location: String,

    /// Give up on the whole run after this many seconds.
    #[arg(long, env = "PULLBATCH_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,
}

impl Args {
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            pull_size: self.pull_size,
            concurrency: self.concurrency,
            pull_wait: Duration::from_millis(self.pull_wait_ms),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn parse_pull_size(value: &str) -> Result<NonZeroUsize, String> {
    let size: NonZeroUsize = value.parse().map_err(|err| format!("{err}"))?;
    if size.get() > MAX_PULL_SIZE {
        return Err(format!("must be at most {MAX_PULL_SIZE}"));
    }
    Ok(size)
}
