//! In-process frame transport.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Frames written on one
//! end are read, whole and in order, on the other. Deadlines are honored the
//! way a socket honors them: a read past its deadline fails with
//! [`io::ErrorKind::TimedOut`], and moving the deadline wakes a blocked read.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use super::transport::{Frame, FrameTransport};
use crate::{
    close::{CloseCode, CloseFrame},
    config::MessageType,
    error::{Error, Result},
};

#[derive(Default)]
struct PipeState {
    frames: VecDeque<Frame>,
    closed: bool,
    read_deadline: Option<Instant>,
}

/// One direction of a memory link.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

/// One end of an in-memory frame link.
pub struct MemoryTransport {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    write_deadline: Mutex<Option<Instant>>,
    shut: AtomicBool,
    local: String,
    peer: String,
}

fn timed_out(op: &str) -> Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{op} deadline exceeded")).into()
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

impl MemoryTransport {
    /// Create two connected ends named `memory:0` and `memory:1`.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_addrs("memory:0", "memory:1")
    }

    /// Create two connected ends with the given addresses.
    pub fn pair_with_addrs(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (a, b) = (a.into(), b.into());
        let forward = Arc::new(Pipe::default());
        let backward = Arc::new(Pipe::default());

        let left = Self {
            inbound: Arc::clone(&backward),
            outbound: Arc::clone(&forward),
            write_deadline: Mutex::new(None),
            shut: AtomicBool::new(false),
            local: a.clone(),
            peer: b.clone(),
        };
        let right = Self {
            inbound: forward,
            outbound: backward,
            write_deadline: Mutex::new(None),
            shut: AtomicBool::new(false),
            local: b,
            peer: a,
        };
        (left, right)
    }

    fn push(&self, frame: Frame) -> Result<()> {
        if self.shut.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut state = self.outbound.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory link closed").into());
        }
        state.frames.push_back(frame);
        drop(state);
        self.outbound.ready.notify_one();
        Ok(())
    }
}

impl FrameTransport for MemoryTransport {
    fn next_frame(&self) -> Result<Frame> {
        let mut state = self.inbound.state.lock();
        loop {
            if self.shut.load(Ordering::Acquire) {
                return Err(Error::ConnectionClosed);
            }
            if let Some(frame) = state.frames.pop_front() {
                return Ok(frame);
            }
            if state.closed {
                return Err(Error::closed_by_peer(CloseCode::Abnormal, ""));
            }
            match state.read_deadline {
                Some(deadline) if Instant::now() >= deadline => return Err(timed_out("read")),
                Some(deadline) => {
                    self.inbound.ready.wait_until(&mut state, deadline);
                }
                None => self.inbound.ready.wait(&mut state),
            }
        }
    }

    fn write_frame(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        if deadline_passed(*self.write_deadline.lock()) {
            return Err(timed_out("write"));
        }
        let payload = Bytes::copy_from_slice(payload);
        let frame = match kind {
            MessageType::Binary => Frame::Binary(payload),
            MessageType::Text => {
                std::str::from_utf8(&payload)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Frame::Text(payload)
            }
        };
        self.push(frame)
    }

    fn write_close(&self, frame: &CloseFrame, deadline: Instant) -> Result<()> {
        if !frame.code.is_allowed() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("close code {} cannot be sent", frame.code),
            )
            .into());
        }
        if deadline_passed(Some(deadline)) {
            return Err(timed_out("close"));
        }
        self.push(Frame::Close(Some(frame.clone())))
    }

    fn shutdown(&self, _deadline: Instant) -> Result<()> {
        self.shut.store(true, Ordering::Release);
        self.outbound.close();
        self.inbound.close();
        Ok(())
    }

    fn local_addr(&self) -> String {
        self.local.clone()
    }

    fn peer_addr(&self) -> String {
        self.peer.clone()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.inbound.state.lock().read_deadline = deadline;
        self.inbound.ready.notify_all();
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        *self.write_deadline.lock() = deadline;
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }
}
