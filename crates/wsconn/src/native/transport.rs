//! The blocking frame transport a native connection is built on.

use std::time::Instant;

use bytes::Bytes;

use crate::{close::CloseFrame, config::MessageType, error::Result};

/// One inbound message delivered by a [`FrameTransport`].
///
/// Control frames other than close (ping, pong) are answered by the transport
/// and never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary data message.
    Binary(Bytes),
    /// Text data message, as UTF-8 bytes.
    Text(Bytes),
    /// Close control frame, with its status if the peer sent one.
    Close(Option<CloseFrame>),
}

impl Frame {
    /// Payload of a data frame, `None` for close.
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Self::Binary(data) | Self::Text(data) => Some(data),
            Self::Close(_) => None,
        }
    }
}

/// A blocking, frame-oriented WebSocket connection.
///
/// Implementations must allow one thread inside [`next_frame`] while another
/// is inside [`write_frame`] or [`write_close`]. The native connection never
/// calls `next_frame` from two threads at once, and never overlaps two writes.
///
/// A peer close surfaces either as [`Frame::Close`] or as
/// [`Error::ClosedByPeer`](crate::Error::ClosedByPeer) carrying the status code.
///
/// [`next_frame`]: FrameTransport::next_frame
/// [`write_frame`]: FrameTransport::write_frame
/// [`write_close`]: FrameTransport::write_close
pub trait FrameTransport: Send + Sync {
    /// Block until the next complete inbound message arrives.
    fn next_frame(&self) -> Result<Frame>;

    /// Send `payload` as one complete message.
    fn write_frame(&self, kind: MessageType, payload: &[u8]) -> Result<()>;

    /// Send a close control frame, giving up at `deadline`.
    fn write_close(&self, frame: &CloseFrame, deadline: Instant) -> Result<()>;

    /// Tear the connection down, giving up at `deadline`.
    fn shutdown(&self, deadline: Instant) -> Result<()>;

    /// Local endpoint address.
    fn local_addr(&self) -> String;

    /// Remote endpoint address.
    fn peer_addr(&self) -> String;

    /// Deadline for `next_frame`; `None` blocks forever.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()>;

    /// Deadline for `write_frame`; `None` blocks forever.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for Box<T> {
    fn next_frame(&self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn write_frame(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        (**self).write_frame(kind, payload)
    }

    fn write_close(&self, frame: &CloseFrame, deadline: Instant) -> Result<()> {
        (**self).write_close(frame, deadline)
    }

    fn shutdown(&self, deadline: Instant) -> Result<()> {
        (**self).shutdown(deadline)
    }

    fn local_addr(&self) -> String {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> String {
        (**self).peer_addr()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        (**self).set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        (**self).set_write_deadline(deadline)
    }
}
