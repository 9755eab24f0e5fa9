//! Pins: per-operation completion signals attached to blob records.
//!
//! A record carries the set of operations currently reading it, producing
//! it, or blocking its removal. Anyone who needs the record idle takes a
//! snapshot of those signals under the state lock, releases the lock and
//! waits for every one of them to fire. Pins are never polled.

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PinId(u64);

impl PinId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Owning side of a pin, held by the operation using the record(s).
///
/// Firing happens on [`release`](Self::release) or on drop, whichever
/// comes first.
pub(crate) struct PinSignal {
    id: PinId,
    tx: watch::Sender<bool>,
}

impl PinSignal {
    pub(crate) fn new(id: PinId) -> Self {
        let (tx, _) = watch::channel(false);
        Self { id, tx }
    }

    pub(crate) fn id(&self) -> PinId {
        self.id
    }

    /// Handle to store in the pinned records.
    pub(crate) fn handle(&self) -> PinHandle {
        PinHandle {
            id: self.id,
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn waiter(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub(crate) fn release(self) {
        self.tx.send_replace(true);
    }
}

/// Observing side of a pin, stored in a record's [`PinSet`].
#[derive(Clone)]
pub(crate) struct PinHandle {
    id: PinId,
    rx: watch::Receiver<bool>,
}

/// Bag of pins currently held on one record.
#[derive(Clone, Default)]
pub(crate) struct PinSet {
    pins: Vec<PinHandle>,
}

impl PinSet {
    pub(crate) fn with(handle: PinHandle) -> Self {
        Self { pins: vec![handle] }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pins.len()
    }

    pub(crate) fn add(&mut self, handle: PinHandle) {
        self.pins.push(handle);
    }

    /// Remove one occurrence of pin `id`; `false` if it was not held.
    pub(crate) fn remove(&mut self, id: PinId) -> bool {
        match self.pins.iter().position(|pin| pin.id == id) {
            Some(index) => {
                self.pins.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pins.clear();
    }

    /// Snapshot of the signals to wait on for this set to drain.
    pub(crate) fn waiters(&self) -> Vec<watch::Receiver<bool>> {
        self.pins.iter().map(|pin| pin.rx.clone()).collect()
    }
}

/// Wait until every signal in `waiters` has fired (or its owner is gone).
pub(crate) async fn wait_released(waiters: Vec<watch::Receiver<bool>>) {
    for mut rx in waiters {
        // A closed channel means the owner dropped its signal: released too.
        let _ = rx.wait_for(|released| *released).await;
    }
}
