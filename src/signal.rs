//! Typed change notifications
//!
//! Each tracker owns one `Signal<T>` per kind of change it reports. Observers
//! hold a `Subscription<T>` and drain it when convenient; dropping the
//! subscription unsubscribes.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub struct Signal<T> {
    senders: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self { senders: Vec::new() }
    }

    pub fn subscribe(&mut self) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.push(sender);
        Subscription { receiver }
    }

    /// Deliver `value` to every live subscription, forgetting dropped ones.
    pub fn emit(&mut self, value: T) {
        self.senders.retain(|sender| sender.send(value.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.senders.iter().filter(|sender| !sender.is_closed()).count()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription<T> {
    receiver: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Non-blocking: next queued notification, if any
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued so far, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
