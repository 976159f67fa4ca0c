//! [`FrameTransport`] over an async tokio-tungstenite `WebSocketStream`.
//!
//! The stream is split into a read half and a write half, each behind its own
//! lock, so one thread can wait for a frame while another sends. Every call is
//! driven to completion with [`Handle::block_on`], which means:
//!
//! - the runtime behind the handle must be a multi-thread runtime, and
//! - calls must come from threads that are not runtime workers, such as plain
//!   `std::thread`s or [`tokio::task::spawn_blocking`].
//!
//! Deadlines are enforced with tokio timers. Moving the read deadline takes
//! effect on a read that is already waiting, and [`FrameTransport::shutdown`]
//! ends it with [`Error::ConnectionClosed`].

use std::{future::Future, io, time::Instant};

use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    runtime::Handle,
    sync::watch,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{
        Error as WsError, Message,
        protocol::{CloseFrame as WsCloseFrame, frame::coding::CloseCode as WsCloseCode},
    },
};

use super::transport::{Frame, FrameTransport};
use crate::{
    close::{CloseCode, CloseFrame},
    config::MessageType,
    error::{Error, Result},
};

/// What a waiting read watches besides the socket.
#[derive(Debug, Clone, Copy, Default)]
struct ReadControl {
    deadline: Option<Instant>,
    shut: bool,
}

/// Blocking frame transport backed by a tokio-tungstenite stream.
pub struct TungsteniteTransport<S> {
    handle: Handle,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    read_control: watch::Sender<ReadControl>,
    write_deadline: Mutex<Option<Instant>>,
    local: String,
    peer: String,
}

impl<S> TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established WebSocket stream.
    ///
    /// `handle` drives every operation; `local` and `peer` are reported as the
    /// connection's addresses.
    pub fn new(
        ws: WebSocketStream<S>,
        handle: Handle,
        local: impl Into<String>,
        peer: impl Into<String>,
    ) -> Self {
        let (writer, reader) = ws.split();
        let (read_control, _) = watch::channel(ReadControl::default());
        Self {
            handle,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            read_control,
            write_deadline: Mutex::new(None),
            local: local.into(),
            peer: peer.into(),
        }
    }

    async fn recv(
        reader: &mut SplitStream<WebSocketStream<S>>,
        mut control: watch::Receiver<ReadControl>,
    ) -> Result<Frame> {
        loop {
            let current = *control.borrow_and_update();
            if current.shut {
                return Err(Error::ConnectionClosed);
            }
            let expired = async {
                match current.deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };

            let next = tokio::select! {
                next = reader.next() => next,
                _ = control.changed() => continue,
                () = expired => return Err(timed_out("read")),
            };

            match next {
                Some(Ok(Message::Binary(data))) => return Ok(Frame::Binary(data)),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Frame::Text(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Frame::Close(frame.map(|f| {
                        CloseFrame::new(CloseCode::from(u16::from(f.code)), f.reason.as_str())
                    })));
                }
                // Ping, pong and raw frames are handled by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ws_error(e)),
                None => return Err(Error::closed_by_peer(CloseCode::Abnormal, "stream ended")),
            }
        }
    }

    fn send(&self, message: Message, deadline: Option<Instant>, op: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        self.handle
            .block_on(with_deadline(deadline, op, writer.send(message)))
    }
}

impl TungsteniteTransport<TcpStream> {
    /// Wrap a server-side stream accepted over plain TCP.
    pub fn from_tcp(ws: WebSocketStream<TcpStream>, handle: Handle) -> io::Result<Self> {
        let local = ws.get_ref().local_addr()?.to_string();
        let peer = ws.get_ref().peer_addr()?.to_string();
        Ok(Self::new(ws, handle, local, peer))
    }
}

impl TungsteniteTransport<MaybeTlsStream<TcpStream>> {
    /// Wrap a client stream returned by `tokio_tungstenite::connect_async`.
    ///
    /// Addresses are read from the TCP socket of a plain `ws://` stream. TLS
    /// streams report both as `"unknown"`; use [`new`](Self::new) to supply
    /// them, for example from [`Addr::from_url`](crate::Addr::from_url)`(url).as_str()`.
    pub fn from_client(
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        handle: Handle,
    ) -> io::Result<Self> {
        let (local, peer) = match ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => {
                (tcp.local_addr()?.to_string(), tcp.peer_addr()?.to_string())
            }
            _ => ("unknown".to_string(), "unknown".to_string()),
        };
        Ok(Self::new(ws, handle, local, peer))
    }
}

fn timed_out(op: &str) -> Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{op} deadline exceeded")).into()
}

fn ws_error(e: WsError) -> Error {
    match e {
        WsError::Io(e) => e.into(),
        WsError::ConnectionClosed => Error::closed_by_peer(CloseCode::Normal, ""),
        WsError::AlreadyClosed => Error::ConnectionClosed,
        other => io::Error::other(other).into(),
    }
}

async fn with_deadline<F>(deadline: Option<Instant>, op: &str, fut: F) -> Result<()>
where
    F: Future<Output = std::result::Result<(), WsError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at.into(), fut)
            .await
            .map_err(|_| timed_out(op))?
            .map_err(ws_error),
        None => fut.await.map_err(ws_error),
    }
}

impl<S> FrameTransport for TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn next_frame(&self) -> Result<Frame> {
        let mut reader = self.reader.lock();
        let control = self.read_control.subscribe();
        self.handle.block_on(Self::recv(&mut reader, control))
    }

    fn write_frame(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        let message = match kind {
            MessageType::Binary => Message::Binary(Bytes::copy_from_slice(payload)),
            MessageType::Text => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Message::Text(text.into())
            }
        };
        let deadline = *self.write_deadline.lock();
        self.send(message, deadline, "write")
    }

    fn write_close(&self, frame: &CloseFrame, deadline: Instant) -> Result<()> {
        let close = WsCloseFrame {
            code: WsCloseCode::from(u16::from(frame.code)),
            reason: frame.reason.clone().into(),
        };
        self.send(Message::Close(Some(close)), Some(deadline), "close")
    }

    fn shutdown(&self, deadline: Instant) -> Result<()> {
        self.read_control.send_modify(|control| control.shut = true);
        let mut writer = self.writer.lock();
        match self
            .handle
            .block_on(with_deadline(Some(deadline), "shutdown", writer.close()))
        {
            Err(Error::ConnectionClosed) | Err(Error::ClosedByPeer { .. }) => Ok(()),
            other => other,
        }
    }

    fn local_addr(&self) -> String {
        self.local.clone()
    }

    fn peer_addr(&self) -> String {
        self.peer.clone()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.read_control
            .send_modify(|control| control.deadline = deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        *self.write_deadline.lock() = deadline;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, sync::Arc, time::Duration};

    use tokio::net::TcpListener;

    use super::*;
    use crate::native::Conn;

    type ClientConn = Conn<TungsteniteTransport<MaybeTlsStream<TcpStream>>>;
    type ServerConn = Conn<TungsteniteTransport<TcpStream>>;

    async fn connected_pair() -> (Arc<ClientConn>, Arc<ServerConn>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });

        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let server = accept.await.unwrap();

        let handle = Handle::current();
        let client = TungsteniteTransport::from_client(client, handle.clone()).unwrap();
        let server = TungsteniteTransport::from_tcp(server, handle).unwrap();
        (Arc::new(Conn::new(client)), Arc::new(Conn::new(server)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bytes_cross_a_real_socket() {
        let (client, server) = connected_pair().await;
        assert_eq!(client.remote_addr(), server.local_addr());

        let writer = tokio::task::spawn_blocking(move || {
            assert_eq!(client.write(b"hello").unwrap(), 5);
            assert_eq!(client.write(b", ").unwrap(), 2);
            assert_eq!(client.write(b"world").unwrap(), 5);
            client.close().unwrap();
            assert!(client.write(b"late").unwrap_err().is_closed());
        });

        let received = tokio::task::spawn_blocking(move || {
            let mut received = Vec::new();
            (&*server).read_to_end(&mut received).unwrap();
            received
        })
        .await
        .unwrap();

        writer.await.unwrap();
        assert_eq!(received, b"hello, world");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_ends_a_pending_read_when_the_peer_is_silent() {
        let (client, server) = connected_pair().await;

        let reader = {
            let client = Arc::clone(&client);
            tokio::task::spawn_blocking(move || client.read(&mut [0u8; 16]))
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::task::spawn_blocking(move || client.close())
            .await
            .unwrap()
            .unwrap();

        let read = tokio::time::timeout(Duration::from_secs(3), reader)
            .await
            .expect("read still pending after close")
            .unwrap();
        assert_eq!(read.unwrap(), 0);
        drop(server);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_deadline_times_out() {
        let (client, _server) = connected_pair().await;

        let result = tokio::task::spawn_blocking(move || {
            client
                .set_read_deadline(Some(Instant::now() + Duration::from_millis(50)))
                .unwrap();
            client.read(&mut [0u8; 16])
        })
        .await
        .unwrap();

        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partial_reads_of_one_frame() {
        let (client, server) = connected_pair().await;

        let chunks = tokio::task::spawn_blocking(move || {
            client.write(b"0123456789").unwrap();
            let mut buf = [0u8; 4];
            let mut chunks = Vec::new();
            for _ in 0..3 {
                let n = server.read(&mut buf).unwrap();
                chunks.push(buf[..n].to_vec());
            }
            chunks
        })
        .await
        .unwrap();

        assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    }
}
