//! Active Window Tracker
//!
//! Follows the EWMH `_NET_ACTIVE_WINDOW` property on the root window.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, warn};
use x11rb::protocol::xproto::{AtomEnum, EventMask};

use crate::error::{Error, Result};
use crate::event_loop::{EventDispatcher, RegistrationId, Registry};
use crate::gateway::{Atom, Event, Gateway, NONE, WindowHandle};
use crate::signal::{Signal, Subscription};

pub struct ActiveWindowTracker {
    gateway: Rc<dyn Gateway>,
    registry: Registry,
    registration: Option<RegistrationId>,
    net_active_window: Atom,
    active_window: WindowHandle,
    changed: Signal<WindowHandle>,
}

impl ActiveWindowTracker {
    /// Fails with a capability error if the window manager does not list
    /// `_NET_ACTIVE_WINDOW` in `_NET_SUPPORTED`.
    pub fn new(gateway: Rc<dyn Gateway>, registry: &Registry) -> Result<Rc<RefCell<Self>>> {
        let root = gateway.root_window();
        let net_supported = gateway.intern_atom("_NET_SUPPORTED")?;
        let net_active_window = gateway.intern_atom("_NET_ACTIVE_WINDOW")?;

        let supported = gateway
            .get_property(root, net_supported, AtomEnum::ATOM.into())?
            .unwrap_or_default();
        if !supported.contains(&net_active_window) {
            return Err(Error::capability(
                "window manager does not support _NET_ACTIVE_WINDOW",
            ));
        }

        gateway.select_events(root, EventMask::PROPERTY_CHANGE)?;

        let mut tracker = Self {
            gateway,
            registry: registry.clone(),
            registration: None,
            net_active_window,
            active_window: NONE,
            changed: Signal::new(),
        };
        tracker.active_window = tracker.read_active_window()?;
        info!("Active window tracking started, active=0x{:x}", tracker.active_window);

        let tracker = Rc::new(RefCell::new(tracker));
        let registration = registry.register_dispatcher(&tracker);
        tracker.borrow_mut().registration = Some(registration);
        Ok(tracker)
    }

    /// Current active window, `NONE` if there is none
    pub fn active_window(&self) -> WindowHandle {
        self.active_window
    }

    pub fn subscribe(&mut self) -> Subscription<WindowHandle> {
        self.changed.subscribe()
    }

    fn read_active_window(&self) -> Result<WindowHandle> {
        let values = self.gateway.get_property(
            self.gateway.root_window(),
            self.net_active_window,
            AtomEnum::WINDOW.into(),
        )?;
        match values.as_deref() {
            None => Ok(NONE),
            Some([window]) => Ok(*window),
            Some(other) => Err(Error::bad_reply(format!(
                "_NET_ACTIVE_WINDOW has {} values, expected 1",
                other.len()
            ))),
        }
    }

    fn refresh(&mut self) -> Result<()> {
        let window = self.read_active_window()?;
        if window != self.active_window {
            debug!("Active window 0x{:x} -> 0x{:x}", self.active_window, window);
            self.active_window = window;
            self.changed.emit(window);
        }
        Ok(())
    }
}

impl EventDispatcher for ActiveWindowTracker {
    fn dispatch_event(&mut self, event: &Event) -> Result<bool> {
        match *event {
            Event::PropertyNotify { window, atom } if window == self.gateway.root_window() => {
                if atom == self.net_active_window {
                    self.refresh()?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Drop for ActiveWindowTracker {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.registry.unregister(registration);
        }
        let root = self.gateway.root_window();
        if let Err(e) = self.gateway.deselect_events(root, EventMask::PROPERTY_CHANGE) {
            warn!("Failed to deselect root property events: {}", e);
        }
    }
}
