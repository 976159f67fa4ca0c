//! Cooperative (single-threaded, event-driven) stream connections.
//!
//! In a browser the WebSocket is driven by the event loop: messages, errors
//! and closure arrive as callbacks, and nothing may block. [`Conn`] bridges
//! those callbacks to an async byte stream:
//!
//! - every inbound message is appended to a shared buffer and wakes the
//!   reader through a single-slot signal, so bursts coalesce into one wake-up;
//! - the close event (or an error event) fires a one-shot close signal that
//!   wakes every pending read;
//! - reads drain the buffer first, so data received before closure is never
//!   lost.
//!
//! The event source is abstracted by [`EventSocket`]; the browser binding is
//! [`browser::BrowserSocket`], available on `wasm32`.

#[cfg(target_arch = "wasm32")]
pub mod browser;
mod signal;

use std::{
    pin::pin,
    sync::{Arc, Weak},
    time::Instant,
};

use bytes::{Buf, BytesMut};
use futures::future::{self, Either};
use parking_lot::{Mutex, RwLock};

use self::signal::{DataSignal, Trigger};
use crate::{
    Connection,
    addr::Addr,
    close::{CloseCode, CloseFrame},
    error::{Error, Result},
};

/// Connection state as reported by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Open and able to communicate.
    Open,
    /// Closing handshake in progress.
    Closing,
    /// Closed, or the connection could not be opened.
    Closed,
}

impl ReadyState {
    /// Returns `true` for [`Closing`](Self::Closing) and [`Closed`](Self::Closed).
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl From<u16> for ReadyState {
    fn from(state: u16) -> Self {
        match state {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// An event-driven WebSocket.
///
/// The socket reports what happens to it through the [`EventSink`] handed to
/// [`install_handlers`](EventSocket::install_handlers). Callbacks run on the
/// same thread as the connection and must not block.
pub trait EventSocket: Sized + 'static {
    /// Registration handle returned by `install_handlers`.
    type Handlers;

    /// Register message, open, close and error callbacks feeding `sink`.
    fn install_handlers(&self, sink: EventSink<Self>) -> Result<Self::Handlers>;

    /// Unregister the callbacks installed earlier.
    fn remove_handlers(&self, handlers: Self::Handlers);

    /// Current state of the underlying socket.
    fn ready_state(&self) -> ReadyState;

    /// Queue `payload` as one binary message.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Start the closing handshake.
    fn close(&self) -> Result<()>;

    /// URL the socket was opened with.
    fn url(&self) -> String;
}

struct Lifecycle<H> {
    handlers: Option<H>,
    first_err: Option<Error>,
}

struct Shared<S: EventSocket> {
    socket: S,
    lifecycle: Mutex<Lifecycle<S::Handlers>>,
    inbound: RwLock<BytesMut>,
    data: DataSignal,
    opened: Trigger,
    closed: Trigger,
}

impl<S: EventSocket> Shared<S> {
    fn drain(&self, buf: &mut [u8]) -> usize {
        let mut inbound = self.inbound.write();
        let n = inbound.len().min(buf.len());
        buf[..n].copy_from_slice(&inbound[..n]);
        inbound.advance(n);
        n
    }

    fn latch(&self, err: Error) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.first_err.is_none() {
            lifecycle.first_err = Some(err);
        }
    }

    fn first_err(&self) -> Option<Error> {
        self.lifecycle.lock().first_err.clone()
    }

    fn release_handlers(&self) {
        let handlers = self.lifecycle.lock().handlers.take();
        if let Some(handlers) = handlers {
            self.socket.remove_handlers(handlers);
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.is_fired() && !self.socket.ready_state().is_closing()
    }

    /// Hand out what is left of the buffer, then the terminal outcome.
    fn read_after_close(&self, buf: &mut [u8]) -> Result<usize> {
        match self.drain(buf) {
            0 => self.first_err().map_or(Ok(0), Err),
            n => Ok(n),
        }
    }
}

impl<S: EventSocket> Drop for Shared<S> {
    fn drop(&mut self) {
        if let Some(handlers) = self.lifecycle.get_mut().handlers.take() {
            self.socket.remove_handlers(handlers);
        }
    }
}

/// Receiving end of a socket's callbacks.
///
/// Holds only a weak reference: events arriving after every [`Conn`] handle is
/// gone are ignored.
pub struct EventSink<S: EventSocket> {
    shared: Weak<Shared<S>>,
}

impl<S: EventSocket> Clone for EventSink<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<S: EventSocket> EventSink<S> {
    /// A data message arrived.
    pub fn on_message(&self, data: &[u8]) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.inbound.write().extend_from_slice(data);
        tracing::trace!(len = data.len(), "message received");
        shared.data.notify();
    }

    /// The handshake completed.
    pub fn on_open(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.opened.fire();
        }
    }

    /// The socket closed with `code`.
    ///
    /// A graceful code ends the stream cleanly; any other code becomes the
    /// error returned once buffered data has been read.
    pub fn on_close(&self, code: u16, reason: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let frame = CloseFrame::new(CloseCode::from(code), reason);
        let code = frame.code;
        if !code.is_graceful() {
            shared.latch(Error::browser("close", frame.reason_or_code()));
        }
        tracing::debug!(%code, "websocket close event");
        shared.closed.fire();
    }

    /// The socket reported an error. The connection is closed.
    pub fn on_error(&self, message: Option<String>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "websocket error event".to_string());
        tracing::debug!(%message, "websocket error event");
        shared.latch(Error::browser("error", message));
        if shared.closed.fire()
            && let Err(e) = shared.socket.close()
        {
            tracing::warn!(error = %e, "failed to close websocket after error");
        }
    }

    /// Unregister the socket's callbacks.
    ///
    /// Must not be called from inside one of those callbacks; bindings defer
    /// it to a later turn of the event loop.
    pub fn release_handlers(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release_handlers();
        }
    }
}

/// A byte-stream connection over an event-driven socket.
///
/// Cloning yields another handle to the same connection.
pub struct Conn<S: EventSocket> {
    shared: Arc<Shared<S>>,
    local: Addr,
    remote: Addr,
}

impl<S: EventSocket> Clone for Conn<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            local: self.local.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<S: EventSocket> Conn<S> {
    /// Wrap `socket` and start listening to its events.
    pub fn new(socket: S) -> Result<Self> {
        let remote = Addr::from_url(&socket.url());
        let shared = Arc::new(Shared {
            socket,
            lifecycle: Mutex::new(Lifecycle {
                handlers: None,
                first_err: None,
            }),
            inbound: RwLock::new(BytesMut::new()),
            data: DataSignal::new(),
            opened: Trigger::new(),
            closed: Trigger::new(),
        });

        let sink = EventSink {
            shared: Arc::downgrade(&shared),
        };
        let handlers = shared.socket.install_handlers(sink)?;
        shared.lifecycle.lock().handlers = Some(handlers);

        Ok(Self {
            shared,
            local: Addr::unspecified(),
            remote,
        })
    }

    /// The wrapped socket.
    pub fn get_ref(&self) -> &S {
        &self.shared.socket
    }

    /// Current state of the underlying socket.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.socket.ready_state()
    }

    /// Number of received bytes not yet read.
    pub fn buffered(&self) -> usize {
        self.shared.inbound.read().len()
    }

    /// Wait until the socket is open.
    ///
    /// Fails with the recorded error if the socket closes first.
    pub async fn wait_open(&self) -> Result<()> {
        if self.shared.closed.is_fired() {
            return Err(self.shared.first_err().unwrap_or(Error::ConnectionClosed));
        }
        if self.shared.socket.ready_state() == ReadyState::Open {
            return Ok(());
        }

        let opened = pin!(self.shared.opened.wait());
        let closed = pin!(self.shared.closed.wait());
        match future::select(opened, closed).await {
            Either::Left(_) => Ok(()),
            Either::Right(_) => Err(self.shared.first_err().unwrap_or(Error::ConnectionClosed)),
        }
    }

    /// Read bytes into `buf`, waiting until at least one is available.
    ///
    /// Data received before the socket closed is always handed out first.
    /// After that, returns `Ok(0)` for a graceful close and the recorded error
    /// otherwise.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.shared.is_open() {
            return self.shared.read_after_close(buf);
        }

        loop {
            let n = self.shared.drain(buf);
            if n > 0 {
                return Ok(n);
            }

            let data = pin!(self.shared.data.wait());
            let closed = pin!(self.shared.closed.wait());
            if let Either::Right(_) = future::select(data, closed).await {
                return self.shared.read_after_close(buf);
            }
        }
    }

    /// Send all of `buf` as one binary message.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.shared.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.shared.socket.send(buf)?;
        tracing::trace!(len = buf.len(), "message sent");
        Ok(buf.len())
    }

    /// Close the connection and release the socket's callbacks.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub fn close(&self) -> Result<()> {
        if !self.shared.closed.fire() {
            return Ok(());
        }
        let result = self.shared.socket.close();
        self.shared.release_handlers();
        tracing::debug!(remote = %self.remote, "connection closed");
        result
    }

    /// Always [`Addr::unspecified`].
    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    /// Host and port of the socket's URL.
    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }
}

impl<S: EventSocket> Connection for Conn<S> {
    fn local_addr(&self) -> Addr {
        self.local.clone()
    }

    fn remote_addr(&self) -> Addr {
        self.remote.clone()
    }

    fn close(&self) -> Result<()> {
        Conn::close(self)
    }

    // Browsers expose no socket deadlines.
    fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }

    fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }
}

impl<S: EventSocket> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("remote", &self.remote)
            .field("ready_state", &self.ready_state())
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use futures::{FutureExt, executor::LocalPool, task::LocalSpawnExt};
    use wasm_bindgen_test::wasm_bindgen_test;

    use super::*;

    #[derive(Default)]
    struct MockState {
        ready: Mutex<u16>,
        sink: Mutex<Option<EventSink<MockSocket>>>,
        installed: Mutex<usize>,
        removed: Mutex<usize>,
        sent: Mutex<Vec<Vec<u8>>>,
        closes: Mutex<usize>,
    }

    /// Scriptable socket; tests drive its events through `sink()`.
    #[derive(Clone, Default)]
    struct MockSocket(Arc<MockState>);

    impl MockSocket {
        fn open() -> Self {
            let socket = Self::default();
            *socket.0.ready.lock() = 1;
            socket
        }

        fn sink(&self) -> EventSink<MockSocket> {
            self.0.sink.lock().clone().unwrap()
        }

        fn set_ready(&self, state: u16) {
            *self.0.ready.lock() = state;
        }
    }

    impl EventSocket for MockSocket {
        type Handlers = ();

        fn install_handlers(&self, sink: EventSink<Self>) -> Result<()> {
            *self.0.sink.lock() = Some(sink);
            *self.0.installed.lock() += 1;
            Ok(())
        }

        fn remove_handlers(&self, (): ()) {
            *self.0.removed.lock() += 1;
        }

        fn ready_state(&self) -> ReadyState {
            ReadyState::from(*self.0.ready.lock())
        }

        fn send(&self, payload: &[u8]) -> Result<()> {
            self.0.sent.lock().push(payload.to_vec());
            Ok(())
        }

        fn close(&self) -> Result<()> {
            *self.0.closes.lock() += 1;
            self.set_ready(3);
            Ok(())
        }

        fn url(&self) -> String {
            "wss://echo.example.com/socket".to_string()
        }
    }

    fn connect() -> (MockSocket, Conn<MockSocket>) {
        let socket = MockSocket::open();
        let conn = Conn::new(socket.clone()).unwrap();
        (socket, conn)
    }

    #[test]
    #[wasm_bindgen_test]
    fn ready_state_from_numeric_values() {
        assert_eq!(ReadyState::from(0), ReadyState::Connecting);
        assert_eq!(ReadyState::from(1), ReadyState::Open);
        assert_eq!(ReadyState::from(2), ReadyState::Closing);
        assert_eq!(ReadyState::from(3), ReadyState::Closed);
        assert!(ReadyState::Closing.is_closing());
        assert!(!ReadyState::Open.is_closing());
    }

    #[test]
    #[wasm_bindgen_test]
    fn buffered_messages_coalesce() {
        let (socket, conn) = connect();
        let sink = socket.sink();
        sink.on_message(b"ab");
        sink.on_message(b"cd");
        sink.on_message(b"");
        assert_eq!(conn.buffered(), 4);

        let mut buf = [0u8; 3];
        assert_eq!(conn.read(&mut buf).now_or_never().unwrap().unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(conn.read(&mut buf).now_or_never().unwrap().unwrap(), 1);
        assert_eq!(buf[0], b'd');
        assert!(conn.read(&mut buf).now_or_never().is_none());
    }

    #[test]
    fn suspended_read_wakes_on_message_then_close() {
        let (socket, conn) = connect();
        let mut pool = LocalPool::new();
        let results = Rc::new(RefCell::new(Vec::new()));

        let reader = conn.clone();
        let out = Rc::clone(&results);
        pool.spawner()
            .spawn_local(async move {
                let mut buf = [0u8; 16];
                loop {
                    let n = reader.read(&mut buf).await.unwrap();
                    out.borrow_mut().push(buf[..n].to_vec());
                    if n == 0 {
                        break;
                    }
                }
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(results.borrow().is_empty());

        socket.sink().on_message(b"hello");
        pool.run_until_stalled();
        assert_eq!(*results.borrow(), vec![b"hello".to_vec()]);

        socket.sink().on_close(1000, "");
        pool.run_until_stalled();
        assert_eq!(*results.borrow(), vec![b"hello".to_vec(), Vec::new()]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn abnormal_close_error_follows_buffered_data() {
        let (socket, conn) = connect();
        let sink = socket.sink();
        sink.on_message(b"tail");
        sink.on_close(1006, "");

        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).now_or_never().unwrap().unwrap(), 4);
        for _ in 0..2 {
            match conn.read(&mut buf).now_or_never().unwrap().unwrap_err() {
                Error::Browser { kind, reason } => {
                    assert_eq!(kind, "close");
                    assert_eq!(reason, "code 1006: connection unexpectedly closed");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn graceful_close_codes_end_the_stream() {
        for code in [1000, 1005] {
            let (socket, conn) = connect();
            socket.sink().on_close(code, "bye");
            assert_eq!(
                conn.read(&mut [0u8; 4]).now_or_never().unwrap().unwrap(),
                0,
                "code {code}"
            );
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn close_reason_is_kept() {
        let (socket, conn) = connect();
        socket.sink().on_close(4000, "kicked");
        match conn.read(&mut [0u8; 4]).now_or_never().unwrap().unwrap_err() {
            Error::Browser { reason, .. } => assert_eq!(reason, "kicked"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn error_event_closes_the_socket() {
        let (socket, conn) = connect();
        let sink = socket.sink();
        sink.on_error(None);
        sink.on_close(1006, "");
        sink.release_handlers();

        assert_eq!(*socket.0.closes.lock(), 1);
        assert_eq!(*socket.0.removed.lock(), 1);
        match conn.read(&mut [0u8; 4]).now_or_never().unwrap().unwrap_err() {
            Error::Browser { kind, reason } => {
                assert_eq!(kind, "error");
                assert_eq!(reason, "websocket error event");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(conn.write(b"x").unwrap_err().is_closed());
    }

    #[test]
    #[wasm_bindgen_test]
    fn write_sends_one_message_while_open() {
        let (socket, conn) = connect();
        assert_eq!(conn.write(b"frame").unwrap(), 5);
        assert_eq!(*socket.0.sent.lock(), vec![b"frame".to_vec()]);

        socket.set_ready(2);
        assert!(conn.write(b"late").unwrap_err().is_closed());
        assert_eq!(socket.0.sent.lock().len(), 1);
    }

    #[test]
    #[wasm_bindgen_test]
    fn close_is_idempotent() {
        let (socket, conn) = connect();
        let other = conn.clone();

        conn.close().unwrap();
        other.close().unwrap();
        conn.close().unwrap();

        assert_eq!(*socket.0.closes.lock(), 1);
        assert_eq!(*socket.0.installed.lock(), 1);
        assert_eq!(*socket.0.removed.lock(), 1);
        assert!(conn.write(b"x").unwrap_err().is_closed());
        assert_eq!(conn.read(&mut [0u8; 4]).now_or_never().unwrap().unwrap(), 0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn local_close_keeps_buffered_data() {
        let (socket, conn) = connect();
        socket.sink().on_message(b"kept");
        conn.close().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).now_or_never().unwrap().unwrap(), 4);
        assert_eq!(&buf[..4], b"kept");
        assert_eq!(conn.read(&mut buf).now_or_never().unwrap().unwrap(), 0);
    }

    #[test]
    fn local_close_wakes_a_suspended_read() {
        let (_socket, conn) = connect();
        let mut pool = LocalPool::new();
        let result = Rc::new(RefCell::new(None));

        let reader = conn.clone();
        let out = Rc::clone(&result);
        pool.spawner()
            .spawn_local(async move {
                *out.borrow_mut() = Some(reader.read(&mut [0u8; 4]).await.unwrap());
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(result.borrow().is_none());
        conn.close().unwrap();
        pool.run_until_stalled();
        assert_eq!(*result.borrow(), Some(0));
    }

    #[test]
    #[wasm_bindgen_test]
    fn events_after_drop_are_ignored() {
        let (socket, conn) = connect();
        let sink = socket.sink();
        drop(conn);

        assert_eq!(*socket.0.removed.lock(), 1);
        sink.on_message(b"late");
        sink.on_error(Some("late".into()));
        sink.on_close(1006, "");
        assert_eq!(*socket.0.closes.lock(), 0);
    }

    // `Instant::now` is unavailable in the browser.
    #[test]
    fn deadlines_are_accepted_and_ignored() {
        let (_socket, conn) = connect();
        let at = Some(Instant::now());
        assert!(conn.set_deadline(at).is_ok());
        assert!(conn.set_read_deadline(at).is_ok());
        assert!(conn.set_write_deadline(None).is_ok());
    }

    #[test]
    #[wasm_bindgen_test]
    fn addresses() {
        let (_socket, conn) = connect();
        assert_eq!(conn.remote_addr().as_str(), "echo.example.com:443");
        assert_eq!(conn.local_addr(), &Addr::unspecified());
        assert_eq!(Connection::local_addr(&conn).network(), "websocket");
    }

    #[test]
    fn wait_open_resolves_on_open_event() {
        let socket = MockSocket::default();
        let conn = Conn::new(socket.clone()).unwrap();
        let mut pool = LocalPool::new();
        let opened = Rc::new(RefCell::new(None));

        let waiter = conn.clone();
        let out = Rc::clone(&opened);
        pool.spawner()
            .spawn_local(async move {
                *out.borrow_mut() = Some(waiter.wait_open().await.is_ok());
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(opened.borrow().is_none());

        socket.set_ready(1);
        socket.sink().on_open();
        pool.run_until_stalled();
        assert_eq!(*opened.borrow(), Some(true));
    }

    #[test]
    #[wasm_bindgen_test]
    fn wait_open_fails_when_handshake_fails() {
        let socket = MockSocket::default();
        let conn = Conn::new(socket.clone()).unwrap();
        let sink = socket.sink();
        sink.on_error(Some("connection refused".into()));
        sink.on_close(1006, "");

        match conn.wait_open().now_or_never().unwrap().unwrap_err() {
            Error::Browser { kind, reason } => {
                assert_eq!(kind, "error");
                assert_eq!(reason, "connection refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
