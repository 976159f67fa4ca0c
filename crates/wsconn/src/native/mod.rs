//! Native (threaded, blocking) stream connections.
//!
//! [`Conn`] turns any [`FrameTransport`] into a byte stream implementing
//! [`std::io::Read`] and [`std::io::Write`]. Every write becomes one frame.
//! Reads consume frames piecewise: a frame larger than the caller's buffer is
//! handed out over several reads, and empty frames are skipped.
//!
//! # Locking
//!
//! Reads hold the frame cursor lock for their whole duration, so fetching the
//! next frame and consuming it form one step. Writes, write deadline changes
//! and close share a second, independent lock. A read blocked on the network
//! therefore never holds up a write.

pub mod memory;
pub mod transport;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;

pub use self::transport::{Frame, FrameTransport};
use crate::{
    Connection,
    addr::Addr,
    close::CloseFrame,
    config::ConnConfig,
    error::{Error, Result},
};

/// Read-side state: the frame being consumed and the latched end of stream.
#[derive(Default)]
struct ReadState {
    /// Unread remainder of the current frame.
    frame: Option<Bytes>,
    /// First terminal outcome; `Ok` is a clean end-of-stream.
    end: Option<Result<()>>,
}

/// A byte-stream connection over a blocking frame transport.
pub struct Conn<T> {
    transport: T,
    config: ConnConfig,
    reader: Mutex<ReadState>,
    writer: Mutex<()>,
    closed: AtomicBool,
    local: Addr,
    remote: Addr,
}

impl<T: FrameTransport> Conn<T> {
    /// Wrap an open transport with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::build(transport, ConnConfig::default())
    }

    /// Wrap an open transport with a custom configuration.
    pub fn with_config(transport: T, config: ConnConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    fn build(transport: T, config: ConnConfig) -> Self {
        let local = Addr::new(transport.local_addr());
        let remote = Addr::new(transport.peer_addr());
        Self {
            transport,
            config,
            reader: Mutex::new(ReadState::default()),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
            local,
            remote,
        }
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    /// The wrapped transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Read bytes into `buf`, blocking until at least one is available.
    ///
    /// Returns `Ok(0)` at end of stream: after the peer closed with a graceful
    /// code or no code at all, or after this connection was closed locally.
    /// Any other close code fails with [`Error::ClosedByPeer`]. A failure is latched and
    /// returned again by every later call.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.reader.lock();
        loop {
            if let Some(frame) = state.frame.as_mut() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                frame.advance(n);
                if frame.is_empty() {
                    state.frame = None;
                }
                if n > 0 {
                    return Ok(n);
                }
            }

            if let Some(end) = &state.end {
                return end.clone().map(|()| 0);
            }

            match self.next_payload() {
                Ok(Some(payload)) => {
                    tracing::trace!(len = payload.len(), "frame received");
                    state.frame = Some(payload);
                }
                Ok(None) => {
                    tracing::debug!(remote = %self.remote, "stream ended");
                    state.end = Some(Ok(()));
                }
                Err(e) => {
                    tracing::debug!(remote = %self.remote, error = %e, "read failed");
                    state.end = Some(Err(e));
                }
            }
        }
    }

    /// Fetch the next data payload, `None` at end of stream.
    fn next_payload(&self) -> Result<Option<Bytes>> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.transport.next_frame() {
            Ok(Frame::Close(Some(frame))) if !frame.code.is_graceful() && !self.is_closed() => {
                Err(Error::closed_by_peer(frame.code, frame.reason))
            }
            Ok(frame) => Ok(frame.into_payload()),
            Err(Error::ClosedByPeer { code, .. }) if code.is_graceful() => Ok(None),
            // Tearing down the transport fails a blocked read; that is our own close.
            Err(_) if self.is_closed() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write all of `buf` as a single frame.
    ///
    /// On success the returned count is always `buf.len()`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let _guard = self.writer.lock();
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.transport.write_frame(self.config.message_type, buf)?;
        tracing::trace!(len = buf.len(), "frame sent");
        Ok(buf.len())
    }

    /// Close the connection.
    ///
    /// Only the first call does anything: it sends a close frame, waiting at
    /// most the configured grace period, then shuts the transport down. Its
    /// result combines both steps. Every other call, concurrent or later,
    /// returns `Ok(())`.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let _guard = self.writer.lock();
        let deadline = Instant::now() + self.config.close_timeout;
        let frame = CloseFrame::normal(self.config.close_reason.clone());
        let sent = self.transport.write_close(&frame, deadline);
        let shut = self.transport.shutdown(deadline);
        tracing::debug!(
            remote = %self.remote,
            close_frame_sent = sent.is_ok(),
            "connection closed"
        );
        Error::combine(sent, shut)
    }

    /// Local endpoint address.
    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    /// Remote endpoint address.
    pub fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    /// Set the deadline for reads; `None` clears it.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.transport.set_read_deadline(deadline)
    }

    /// Set the deadline for writes; `None` clears it.
    ///
    /// Waits for an in-flight write to finish first.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        let _guard = self.writer.lock();
        self.transport.set_write_deadline(deadline)
    }
}

impl<T: FrameTransport> Connection for Conn<T> {
    fn local_addr(&self) -> Addr {
        self.local.clone()
    }

    fn remote_addr(&self) -> Addr {
        self.remote.clone()
    }

    fn close(&self) -> Result<()> {
        Conn::close(self)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        Conn::set_read_deadline(self, deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        Conn::set_write_deadline(self, deadline)
    }
}

impl<T: FrameTransport> io::Read for &Conn<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(self, buf).map_err(Into::into)
    }
}

impl<T: FrameTransport> io::Read for Conn<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(self, buf).map_err(Into::into)
    }
}

impl<T: FrameTransport> io::Write for &Conn<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: FrameTransport> io::Write for Conn<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T> std::fmt::Debug for Conn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
