use futures::{SinkExt, StreamExt};
use std::io;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{self, Duration};
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::{self, Frame};

/// A client connection, reading and writing whole frames.
pub struct Connection {
    pub id: Uuid,
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    idle_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection::with_codec(stream, FrameCodec::default())
    }

    pub fn with_codec(stream: TcpStream, codec: FrameCodec) -> Connection {
        let (reader, writer) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            reader: FramedRead::new(reader, codec.clone()),
            writer: FramedWrite::new(writer, codec),
            idle_timeout: None,
        }
    }

    /// Fails reads that wait longer than `timeout` for the next frame.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Connection {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Reads the next frame.
    ///
    /// `Ok(None)` means the peer closed the connection. A malformed frame the stream recovers
    /// from comes back as `Ok(Some(Err(_)))`, while `Err(_)` is terminal and nothing more can be
    /// read.
    pub async fn read_frame(&mut self) -> Result<Option<Result<Frame, frame::Error>>, frame::Error> {
        let next = match self.idle_timeout {
            Some(timeout) => time::timeout(timeout, self.reader.next())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
            None => self.reader.next().await,
        };

        next.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), frame::Error> {
        self.writer.send(frame).await
    }
}
