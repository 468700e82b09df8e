use std::{io, path::Path};

use async_trait::async_trait;
use tokio::net::UnixDatagram;

use super::{render_event, Sink};
use crate::{error::SinkError, model::Message};

/// Largest datagram the analysis queue socket accepts.
pub const MAX_EVENT_SIZE: usize = 65535;

/// Sends each event as one datagram, framed as `1:{location}:{event}`, to a
/// Unix datagram socket.
pub struct SocketSink {
    socket: UnixDatagram,
    location: String,
}

impl SocketSink {
    pub fn connect(path: impl AsRef<Path>, location: impl Into<String>) -> Result<Self, SinkError> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path.as_ref()).map_err(SinkError::Unavailable)?;

        Ok(Self {
            socket,
            location: location.into(),
        })
    }

    fn frame(&self, message: &Message) -> Result<Vec<u8>, SinkError> {
        let event = render_event(message)?;
        let frame = format!("1:{}:{}", self.location, event).into_bytes();

        if frame.len() > MAX_EVENT_SIZE {
            return Err(SinkError::TooLarge {
                size: frame.len(),
                max: MAX_EVENT_SIZE,
            });
        }
        Ok(frame)
    }
}

#[async_trait]
impl Sink for SocketSink {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        let frame = self.frame(message)?;

        match self.socket.send(&frame).await {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                Err(SinkError::Unavailable(err))
            }
            Err(err) => Err(err.into()),
        }
    }
}
