use async_trait::async_trait;
use tokio::{
    io::{self, AsyncWriteExt, Stdout},
    sync::Mutex,
};

use super::{render_event, Sink};
use crate::{error::SinkError, model::Message};

/// Writes one JSON event per line to standard output.
pub struct StdoutSink {
    out: Mutex<Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        let mut line = render_event(message)?.to_string();
        line.push('\n');

        let mut out = self.out.lock().await;
        match out.write_all(line.as_bytes()).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                return Err(SinkError::Unavailable(err));
            }
            Err(err) => return Err(err.into()),
        }
        out.flush().await?;
        Ok(())
    }
}
