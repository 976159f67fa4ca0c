//! # hpx-wsconn
//!
//! Byte-stream connections over WebSocket.
//!
//! A WebSocket carries whole messages; many protocols want a plain byte
//! stream instead. This crate adapts one to the other:
//!
//! - every write is sent as exactly one message;
//! - reads hand out message payloads piecewise and in order, with message
//!   boundaries erased;
//! - a graceful close from the peer reads as end of stream, any other close
//!   as an error.
//!
//! Two backends share that contract:
//!
//! - [`native`] (non-`wasm32`): a blocking [`native::Conn`] over any
//!   [`native::FrameTransport`], implementing [`std::io::Read`] and
//!   [`std::io::Write`]. A tokio-tungstenite transport is included behind the
//!   default `tungstenite` feature.
//! - [`cooperative`]: an async [`cooperative::Conn`] driven by socket events,
//!   with the browser binding available on `wasm32`.
//!
//! [`Conn`] names the backend for the current target. Both implement
//! [`Connection`], the operations they have in common.
//!
//! ```no_run
//! # #[cfg(not(target_arch = "wasm32"))]
//! # fn main() -> hpx_wsconn::Result<()> {
//! use std::io::{Read, Write};
//!
//! use hpx_wsconn::{Conn, MemoryTransport};
//!
//! let (a, b) = MemoryTransport::pair();
//! let (mut client, mut server) = (Conn::new(a), Conn::new(b));
//!
//! client.write_all(b"hello")?;
//! client.close()?;
//!
//! let mut received = Vec::new();
//! server.read_to_end(&mut received)?;
//! assert_eq!(received, b"hello");
//! # Ok(())
//! # }
//! # #[cfg(target_arch = "wasm32")]
//! # fn main() {}
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod addr;
pub mod close;
pub mod config;
pub mod cooperative;
mod error;
#[cfg(not(target_arch = "wasm32"))]
pub mod native;

use std::time::Instant;

pub use self::{
    addr::Addr,
    close::{CloseCode, CloseFrame},
    config::{ConnConfig, MessageType},
    error::{Error, Result},
};
#[cfg(target_arch = "wasm32")]
pub use self::cooperative::browser::{BrowserConn as Conn, BrowserSocket};
#[cfg(not(target_arch = "wasm32"))]
pub use self::native::{Conn, Frame, FrameTransport, memory::MemoryTransport};
#[cfg(all(not(target_arch = "wasm32"), feature = "tungstenite"))]
pub use self::native::tungstenite::TungsteniteTransport;

/// Operations every stream connection supports.
///
/// Reading and writing are not part of the trait: the native backend blocks,
/// the cooperative one is async.
pub trait Connection {
    /// Local endpoint address.
    fn local_addr(&self) -> Addr;

    /// Remote endpoint address.
    fn remote_addr(&self) -> Addr;

    /// Close the connection. Only the first call has any effect.
    fn close(&self) -> Result<()>;

    /// Set the read deadline; `None` clears it.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()>;

    /// Set the write deadline; `None` clears it.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()>;

    /// Set both deadlines, read first.
    ///
    /// If the read deadline cannot be set the write deadline is left alone.
    fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }
}
