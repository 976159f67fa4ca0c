// The close code table is sourced primarily from the tungstenite-rs library, which can be found at:
// https://github.com/snapview/tungstenite-rs/blob/42b8797e8b7f39efb7d9322dc8af3e9089db4f7d/src/protocol/frame/coding.rs#L117
//
// Original contributions by:
// Copyright (c) 2017 Alexey Galakhov
// Copyright (c) 2016 Jason Housley
// Licensed under both MIT and Apache 2.0 licenses
//
// Licensed under the Apache License, Version 2.0 (the "License");
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is provided "AS IS", WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. See the License for specific language governing permissions and limitations.
//

//! Close status codes and their stream-level meaning.
//!
//! A byte stream only knows two ways to end: a clean end-of-stream or a
//! failure. [`GRACEFUL_CLOSE_CODES`] is the table that decides which side of
//! that line a WebSocket close status falls on.

use std::fmt;

use self::CloseCode::*;

/// Close codes that end the byte stream cleanly instead of failing it.
///
/// A peer closing with any of these codes is reported as end-of-stream.
/// Everything else surfaces as an error.
pub const GRACEFUL_CLOSE_CODES: &[CloseCode] = &[Normal, Status];

/// Status codes representing the reasons why an endpoint is closing the WebSocket connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum CloseCode {
    /// Normal closure; the purpose of the connection has been fulfilled.
    Normal,
    /// The endpoint is going away, such as a server shutting down or a page being left.
    Away,
    /// The endpoint terminated the connection because of a protocol error.
    Protocol,
    /// The endpoint received a type of data it cannot accept.
    Unsupported,
    /// No status code was included in the closing frame.
    Status,
    /// The connection was closed without a closing frame being sent or received.
    Abnormal,
    /// The message data was inconsistent with the type of the message.
    Invalid,
    /// Generic policy violation.
    Policy,
    /// The message was too large to process.
    Size,
    /// The client expected an extension the server did not negotiate.
    Extension,
    /// Unexpected server-side condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded; try again later.
    Again,
    #[doc(hidden)]
    /// TLS handshake failure, never sent on the wire.
    Tls,
    #[doc(hidden)]
    /// Reserved for future use by the protocol.
    Reserved(u16),
    #[doc(hidden)]
    /// Registered with IANA for libraries and frameworks.
    Iana(u16),
    #[doc(hidden)]
    /// Private use by applications.
    Library(u16),
    #[doc(hidden)]
    /// Outside of the range of acceptable close codes.
    Bad(u16),
}

impl CloseCode {
    /// Check if this CloseCode is allowed on the wire.
    pub fn is_allowed(self) -> bool {
        !matches!(self, Bad(_) | Reserved(_) | Status | Abnormal | Tls)
    }

    /// Returns `true` when a peer closing with this code ends the stream cleanly.
    pub fn is_graceful(self) -> bool {
        GRACEFUL_CLOSE_CODES.contains(&self)
    }

    /// Best-effort human readable reason for a close that carried no text.
    pub fn describe(self) -> String {
        match self {
            Abnormal => "code 1006: connection unexpectedly closed".to_string(),
            code => format!("unexpected code: {}", u16::from(code)),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => Normal,
            1001 => Away,
            1002 => Protocol,
            1003 => Unsupported,
            1005 => Status,
            1006 => Abnormal,
            1007 => Invalid,
            1008 => Policy,
            1009 => Size,
            1010 => Extension,
            1011 => Error,
            1012 => Restart,
            1013 => Again,
            1015 => Tls,
            1..=999 => Bad(code),
            1016..=2999 => Reserved(code),
            3000..=3999 => Iana(code),
            4000..=4999 => Library(code),
            _ => Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            Normal => 1000,
            Away => 1001,
            Protocol => 1002,
            Unsupported => 1003,
            Status => 1005,
            Abnormal => 1006,
            Invalid => 1007,
            Policy => 1008,
            Size => 1009,
            Extension => 1010,
            Error => 1011,
            Restart => 1012,
            Again => 1013,
            Tls => 1015,
            Reserved(code) => code,
            Iana(code) => code,
            Library(code) => code,
            Bad(code) => code,
        }
    }
}

/// Status code and reason carried by a close control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: CloseCode,
    /// UTF-8 reason text, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal closure with the given reason.
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(Normal, reason)
    }

    /// Reason text if present, otherwise a description of the code.
    pub fn reason_or_code(&self) -> String {
        if self.reason.is_empty() {
            self.code.describe()
        } else {
            self.reason.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::wasm_bindgen_test;

    use super::*;

    #[test]
    #[wasm_bindgen_test]
    fn graceful_codes() {
        assert!(CloseCode::from(1000).is_graceful());
        assert!(CloseCode::from(1005).is_graceful());

        for code in [1001, 1002, 1006, 1011, 3000, 4000] {
            assert!(!CloseCode::from(code).is_graceful(), "code {code}");
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn code_roundtrip_keeps_unknown_values() {
        assert_eq!(CloseCode::from(4321), Library(4321));
        assert_eq!(u16::from(Library(4321)), 4321);
        assert_eq!(CloseCode::from(0), Bad(0));
        assert_eq!(CloseCode::from(2000), Reserved(2000));
    }

    #[test]
    #[wasm_bindgen_test]
    fn describe_abnormal_and_unexpected() {
        assert_eq!(
            Abnormal.describe(),
            "code 1006: connection unexpectedly closed"
        );
        assert_eq!(Away.describe(), "unexpected code: 1001");
        assert_eq!(CloseFrame::new(Away, "").reason_or_code(), "unexpected code: 1001");
        assert_eq!(CloseFrame::new(Away, "bye").reason_or_code(), "bye");
    }

    #[test]
    #[wasm_bindgen_test]
    fn status_is_not_allowed_on_the_wire() {
        assert!(!Status.is_allowed());
        assert!(!Abnormal.is_allowed());
        assert!(Normal.is_allowed());
    }
}
