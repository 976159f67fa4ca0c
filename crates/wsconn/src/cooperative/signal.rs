//! Wake-up primitives for the cooperative backend.

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

use futures::{
    FutureExt, StreamExt,
    channel::{mpsc, oneshot},
    future::Shared,
    lock::Mutex as AsyncMutex,
};
use parking_lot::Mutex;

/// A one-shot broadcast: fires at most once and wakes every waiter.
pub(crate) struct Trigger {
    fired: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
    rx: Shared<oneshot::Receiver<()>>,
}

impl Trigger {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx: rx.shared(),
        }
    }

    /// Fire the trigger. Returns `true` for the call that actually fired it.
    pub(crate) fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
        true
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the trigger has fired.
    pub(crate) fn wait(&self) -> impl Future<Output = ()> + 'static {
        let rx = self.rx.clone();
        async move {
            let _ = rx.await;
        }
    }
}

/// Single-slot "more data" signal.
///
/// Notifications made while one is already pending are dropped: the reader
/// drains the whole buffer on every wake-up.
pub(crate) struct DataSignal {
    tx: Mutex<mpsc::Sender<()>>,
    rx: AsyncMutex<mpsc::Receiver<()>>,
}

impl DataSignal {
    pub(crate) fn new() -> Self {
        // One sender on a zero-buffer channel leaves exactly one slot.
        let (tx, rx) = mpsc::channel(0);
        Self {
            tx: Mutex::new(tx),
            rx: AsyncMutex::new(rx),
        }
    }

    /// Non-blocking notify.
    pub(crate) fn notify(&self) {
        let _ = self.tx.lock().try_send(());
    }

    /// Resolves at the next pending notification.
    pub(crate) async fn wait(&self) {
        self.rx.lock().await.next().await;
    }
}
