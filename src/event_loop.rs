//! Event Dispatch Loop
//!
//! Events are offered to registered dispatchers in registration order until one
//! claims them. Whenever the incoming queue runs dry, idle observers run once
//! and the outgoing request queue is flushed before the loop blocks.

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::gateway::{Event, Gateway};

pub trait EventDispatcher {
    /// Returns `Ok(true)` if the event was claimed. An error counts as
    /// "not claimed" unless it is fatal.
    fn dispatch_event(&mut self, event: &Event) -> Result<bool>;
}

pub trait IdleObserver {
    /// Called once per loop turn, after the incoming queue has been drained
    /// and before requests are flushed
    fn on_idle(&mut self) -> Result<()>;
}

/// Something the loop can wait on for incoming data
pub trait Readiness {
    fn wait_readable(&self) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

type DispatcherRef = Weak<RefCell<dyn EventDispatcher>>;
type IdleObserverRef = Weak<RefCell<dyn IdleObserver>>;

#[derive(Default)]
struct Registrations {
    next_id: u64,
    dispatchers: Vec<(RegistrationId, DispatcherRef)>,
    idle_observers: Vec<(RegistrationId, IdleObserverRef)>,
}

impl Registrations {
    fn allocate_id(&mut self) -> RegistrationId {
        self.next_id += 1;
        RegistrationId(self.next_id)
    }
}

/// Shared handle to the loop's dispatcher and idle observer lists.
///
/// Registrations hold weak references: the owner keeps the object alive, and a
/// dropped object is skipped. Changing the lists from inside a callback is
/// allowed; the loop iterates a snapshot and re-checks membership before each
/// call.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RefCell<Registrations>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dispatcher<D>(&self, dispatcher: &Rc<RefCell<D>>) -> RegistrationId
    where
        D: EventDispatcher + 'static,
    {
        let dispatcher: Rc<RefCell<dyn EventDispatcher>> = dispatcher.clone();
        let mut inner = self.inner.borrow_mut();
        let id = inner.allocate_id();
        inner.dispatchers.push((id, Rc::downgrade(&dispatcher)));
        trace!("Registered dispatcher {:?}", id);
        id
    }

    pub fn register_idle_observer<O>(&self, observer: &Rc<RefCell<O>>) -> RegistrationId
    where
        O: IdleObserver + 'static,
    {
        let observer: Rc<RefCell<dyn IdleObserver>> = observer.clone();
        let mut inner = self.inner.borrow_mut();
        let id = inner.allocate_id();
        inner.idle_observers.push((id, Rc::downgrade(&observer)));
        trace!("Registered idle observer {:?}", id);
        id
    }

    /// Returns false if `id` was not registered
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.dispatchers.len() + inner.idle_observers.len();
        inner.dispatchers.retain(|(registered, _)| *registered != id);
        inner.idle_observers.retain(|(registered, _)| *registered != id);
        before != inner.dispatchers.len() + inner.idle_observers.len()
    }

    pub fn is_registered(&self, id: RegistrationId) -> bool {
        let inner = self.inner.borrow();
        inner.dispatchers.iter().any(|(registered, _)| *registered == id)
            || inner.idle_observers.iter().any(|(registered, _)| *registered == id)
    }

    #[cfg(test)]
    pub fn dispatcher_count(&self) -> usize {
        self.inner.borrow().dispatchers.len()
    }

    fn dispatchers(&self) -> Vec<(RegistrationId, DispatcherRef)> {
        self.inner.borrow().dispatchers.clone()
    }

    fn idle_observers(&self) -> Vec<(RegistrationId, IdleObserverRef)> {
        self.inner.borrow().idle_observers.clone()
    }
}

pub struct EventLoop {
    gateway: Rc<dyn Gateway>,
    registry: Registry,
    quit: mpsc::Receiver<()>,
}

impl EventLoop {
    /// `quit` ends `run` when a message arrives or every sender is dropped
    pub fn new(gateway: Rc<dyn Gateway>, quit: mpsc::Receiver<()>) -> Self {
        Self {
            gateway,
            registry: Registry::new(),
            quit,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Run until a quit request arrives.
    ///
    /// Returns an error only for fatal (connection) failures.
    pub async fn run(&mut self, readiness: &impl Readiness) -> Result<()> {
        info!("Starting event loop");

        loop {
            self.dispatch_pending()?;
            self.run_idle()?;
            self.gateway.flush()?;

            // Round trips made while idle can pull events into the connection's
            // buffer, where socket readiness will never report them.
            if let Some(event) = self.gateway.poll_for_event()? {
                self.dispatch(&event)?;
                continue;
            }

            tokio::select! {
                () = readiness.wait_readable() => {}
                _ = self.quit.recv() => {
                    info!("Quit requested, leaving event loop");
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch every event that can be read without blocking
    pub fn dispatch_pending(&self) -> Result<usize> {
        let mut count = 0;
        while let Some(event) = self.gateway.poll_for_event()? {
            self.dispatch(&event)?;
            count += 1;
        }
        Ok(count)
    }

    /// Offer `event` to each dispatcher in turn; returns whether one claimed it
    pub fn dispatch(&self, event: &Event) -> Result<bool> {
        trace!("Dispatching {:?}", event);

        for (id, dispatcher) in self.registry.dispatchers() {
            if !self.registry.is_registered(id) {
                continue;
            }
            let Some(dispatcher) = dispatcher.upgrade() else {
                continue;
            };
            let result = match dispatcher.try_borrow_mut() {
                Ok(mut dispatcher) => dispatcher.dispatch_event(event),
                Err(_) => {
                    warn!("Dispatcher {:?} re-entered, skipping", id);
                    continue;
                }
            };
            match result {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("Error dispatching {:?}: {}", event, e),
            }
        }

        report_unclaimed(event);
        Ok(false)
    }

    /// Invoke every idle observer once
    pub fn run_idle(&self) -> Result<()> {
        for (id, observer) in self.registry.idle_observers() {
            if !self.registry.is_registered(id) {
                continue;
            }
            let Some(observer) = observer.upgrade() else {
                continue;
            };
            let result = match observer.try_borrow_mut() {
                Ok(mut observer) => observer.on_idle(),
                Err(_) => {
                    warn!("Idle observer {:?} re-entered, skipping", id);
                    continue;
                }
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("Error in idle observer {:?}: {}", id, e),
            }
        }
        Ok(())
    }
}

fn report_unclaimed(event: &Event) {
    match event {
        Event::Error {
            code,
            sequence,
            major_opcode,
            minor_opcode,
        } => warn!(
            "X11 error: error_code={}, major_opcode={}, minor_opcode={}, sequence={}",
            code, major_opcode, minor_opcode, sequence
        ),
        _ => debug!("Unhandled event: {:?}", event),
    }
}
