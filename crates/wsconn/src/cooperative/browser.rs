//! Browser binding for the cooperative connection.
//!
//! Wraps a `web_sys::WebSocket`. Callbacks are registered with
//! `addEventListener`, so other listeners on the same socket keep working,
//! and are removed once the socket closes. Removal never happens inside a
//! callback: close and error handlers schedule it on a later microtask.

use wasm_bindgen::{JsCast, JsValue, closure::Closure};
use web_sys::{BinaryType, CloseEvent, ErrorEvent, Event, MessageEvent, WebSocket};

use super::{Conn, EventSink, EventSocket, ReadyState};
use crate::error::{Error, Result};

/// A cooperative connection over a browser WebSocket.
pub type BrowserConn = Conn<BrowserSocket>;

/// A browser WebSocket receiving binary messages as `ArrayBuffer`s.
pub struct BrowserSocket {
    ws: WebSocket,
}

/// Listeners registered on a [`BrowserSocket`].
pub struct BrowserHandlers {
    message: Closure<dyn FnMut(MessageEvent)>,
    open: Closure<dyn FnMut(Event)>,
    close: Closure<dyn FnMut(CloseEvent)>,
    error: Closure<dyn FnMut(Event)>,
}

impl BrowserHandlers {
    fn listeners(&self) -> [(&'static str, &js_sys::Function); 4] {
        [
            ("message", self.message.as_ref().unchecked_ref()),
            ("open", self.open.as_ref().unchecked_ref()),
            ("close", self.close.as_ref().unchecked_ref()),
            ("error", self.error.as_ref().unchecked_ref()),
        ]
    }
}

fn js_error(kind: &str, value: JsValue) -> Error {
    let reason = value.as_string().unwrap_or_else(|| format!("{value:?}"));
    Error::browser(kind, reason)
}

impl BrowserSocket {
    /// Wrap an existing socket, switching it to `ArrayBuffer` delivery.
    pub fn new(ws: WebSocket) -> Self {
        ws.set_binary_type(BinaryType::Arraybuffer);
        Self { ws }
    }

    /// The wrapped socket.
    pub fn websocket(&self) -> &WebSocket {
        &self.ws
    }
}

impl EventSocket for BrowserSocket {
    type Handlers = BrowserHandlers;

    fn install_handlers(&self, sink: EventSink<Self>) -> Result<BrowserHandlers> {
        let on_message = sink.clone();
        let message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let data = event.data();
            if data.has_type::<js_sys::ArrayBuffer>() {
                let buffer = data.unchecked_into::<js_sys::ArrayBuffer>();
                on_message.on_message(&js_sys::Uint8Array::new(&buffer).to_vec());
            } else if let Some(text) = data.as_string() {
                on_message.on_message(text.as_bytes());
            }
        });

        let on_open = sink.clone();
        let open = Closure::<dyn FnMut(Event)>::new(move |_: Event| on_open.on_open());

        let on_close = sink.clone();
        let close = Closure::<dyn FnMut(CloseEvent)>::new(move |event: CloseEvent| {
            on_close.on_close(event.code(), &event.reason());
            let sink = on_close.clone();
            wasm_bindgen_futures::spawn_local(async move { sink.release_handlers() });
        });

        let on_error = sink;
        let error = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            let message = event.dyn_ref::<ErrorEvent>().map(ErrorEvent::message);
            on_error.on_error(message);
            let sink = on_error.clone();
            wasm_bindgen_futures::spawn_local(async move { sink.release_handlers() });
        });

        let handlers = BrowserHandlers {
            message,
            open,
            close,
            error,
        };
        for (name, callback) in handlers.listeners() {
            self.ws
                .add_event_listener_with_callback(name, callback)
                .map_err(|e| js_error("listen", e))?;
        }
        Ok(handlers)
    }

    fn remove_handlers(&self, handlers: BrowserHandlers) {
        for (name, callback) in handlers.listeners() {
            if let Err(e) = self.ws.remove_event_listener_with_callback(name, callback) {
                tracing::warn!(event = name, error = ?e, "failed to remove websocket listener");
            }
        }
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.ws.ready_state())
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        self.ws
            .send_with_js_u8_array(&js_sys::Uint8Array::from(payload))
            .map_err(|e| js_error("send", e))
    }

    fn close(&self) -> Result<()> {
        self.ws.close().map_err(|e| js_error("close", e))
    }

    fn url(&self) -> String {
        self.ws.url()
    }
}

impl Conn<BrowserSocket> {
    /// Wrap a browser WebSocket, open or still connecting.
    pub fn from_websocket(ws: WebSocket) -> Result<Self> {
        Conn::new(BrowserSocket::new(ws))
    }

    /// Open a WebSocket to `url` and wait for the handshake.
    pub async fn connect(url: &str) -> Result<Self> {
        let ws = WebSocket::new(url).map_err(|e| js_error("connect", e))?;
        let conn = Self::from_websocket(ws)?;
        if let Err(e) = conn.wait_open().await {
            let _ = conn.close();
            return Err(e);
        }
        Ok(conn)
    }
}
