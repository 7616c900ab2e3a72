//! Key State Tracker
//!
//! Watches a fixed set of keycodes through XInput2 raw events, which are
//! delivered regardless of which window has focus, and reports whether any of
//! them is held.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, trace, warn};
use x11rb::protocol::xinput;

use crate::error::{Error, Result};
use crate::event_loop::{EventDispatcher, RegistrationId, Registry};
use crate::gateway::{Event, Gateway};
use crate::signal::{Signal, Subscription};

/// Version requested from the server; raw events need at least 2.0
const XINPUT_VERSION: (u16, u16) = (2, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyCodeState {
    code: u32,
    pressed: bool,
}

pub struct KeyStateTracker {
    gateway: Rc<dyn Gateway>,
    registry: Registry,
    registration: Option<RegistrationId>,
    keys: Vec<KeyCodeState>,
    any_key_pressed: bool,
    changed: Signal<bool>,
}

impl KeyStateTracker {
    /// Every watched key starts out released. Fails with a capability error
    /// without XInput 2.
    pub fn new(
        gateway: Rc<dyn Gateway>,
        registry: &Registry,
        watched: &[u32],
    ) -> Result<Rc<RefCell<Self>>> {
        if !gateway.has_extension(xinput::X11_EXTENSION_NAME)? {
            return Err(Error::capability("XInput extension not available"));
        }
        let (major, minor) = gateway.query_input_version(XINPUT_VERSION.0, XINPUT_VERSION.1)?;
        if major < 2 {
            return Err(Error::capability(format!(
                "XInput 2 required, server has {}.{}",
                major, minor
            )));
        }

        gateway.select_raw_key_events(true)?;
        info!("Watching keycodes {:?} (XInput {}.{})", watched, major, minor);

        let mut keys: Vec<KeyCodeState> = Vec::with_capacity(watched.len());
        for &code in watched {
            if !keys.iter().any(|key| key.code == code) {
                keys.push(KeyCodeState {
                    code,
                    pressed: false,
                });
            }
        }

        let tracker = Rc::new(RefCell::new(Self {
            gateway,
            registry: registry.clone(),
            registration: None,
            keys,
            any_key_pressed: false,
            changed: Signal::new(),
        }));
        let registration = registry.register_dispatcher(&tracker);
        tracker.borrow_mut().registration = Some(registration);
        Ok(tracker)
    }

    pub fn any_key_pressed(&self) -> bool {
        self.any_key_pressed
    }

    pub fn subscribe(&mut self) -> Subscription<bool> {
        self.changed.subscribe()
    }
}

impl EventDispatcher for KeyStateTracker {
    fn dispatch_event(&mut self, event: &Event) -> Result<bool> {
        let (keycode, pressed) = match *event {
            Event::KeyPress { keycode } => (keycode, true),
            Event::KeyRelease { keycode } => (keycode, false),
            _ => return Ok(false),
        };

        let Some(key) = self.keys.iter_mut().find(|key| key.code == keycode) else {
            return Ok(true);
        };
        trace!("Watched key {} pressed={}", keycode, pressed);
        key.pressed = pressed;

        let any_key_pressed = self.keys.iter().any(|key| key.pressed);
        if any_key_pressed != self.any_key_pressed {
            debug!("Watched keys held: {}", any_key_pressed);
            self.any_key_pressed = any_key_pressed;
            self.changed.emit(any_key_pressed);
        }
        Ok(true)
    }
}

impl Drop for KeyStateTracker {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.registry.unregister(registration);
        }
        if let Err(e) = self.gateway.select_raw_key_events(false) {
            warn!("Failed to deselect raw key events: {}", e);
        }
    }
}
