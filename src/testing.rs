//! In-memory display server for tests
//!
//! `FakeGateway` keeps a small window tree, root properties and a queue of
//! pending events, and records every request that would have gone to the
//! server so tests can assert on the exact sequence.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use x11rb::protocol::xproto::EventMask;

use crate::error::{Error, Result};
use crate::gateway::event_mask::EventMaskRegistry;
use crate::gateway::{
    Atom, Event, Gateway, Geometry, Rect, ShapeKind, WindowAttributes, WindowChanges,
    WindowHandle,
};

pub const ROOT: WindowHandle = 1;

/// BadWindow
const BAD_WINDOW: u8 = 3;

/// First id handed out by `generate_id`
const FIRST_CLIENT_ID: u32 = 0x0400_0000;

/// First atom id handed out by `intern_atom`
const FIRST_ATOM: Atom = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateWindow {
        window: WindowHandle,
        parent: WindowHandle,
        bounds: Rect,
        attributes: WindowAttributes,
    },
    ConfigureWindow {
        window: WindowHandle,
        changes: WindowChanges,
    },
    MapWindow(WindowHandle),
    UnmapWindow(WindowHandle),
    DestroyWindow(WindowHandle),
    SelectEvents {
        window: WindowHandle,
        mask: u32,
    },
    DeselectEvents {
        window: WindowHandle,
        mask: u32,
    },
    SetShape {
        window: WindowHandle,
        kind: ShapeKind,
        rects: Vec<Rect>,
    },
    SelectRawKeyEvents(bool),
}

#[derive(Debug, Clone)]
enum PropertyValue {
    Values(Vec<u32>),
    Malformed,
}

#[derive(Debug, Clone, Copy)]
struct FakeWindow {
    parent: Option<WindowHandle>,
    geometry: Geometry,
}

pub struct FakeGateway {
    next_id: Cell<u32>,
    atoms: RefCell<HashMap<String, Atom>>,
    properties: RefCell<HashMap<(WindowHandle, Atom), PropertyValue>>,
    windows: RefCell<HashMap<WindowHandle, FakeWindow>>,
    extensions: RefCell<HashSet<&'static str>>,
    input_version: Cell<(u16, u16)>,
    events: RefCell<VecDeque<Event>>,
    requests: RefCell<Vec<Request>>,
    masks: RefCell<EventMaskRegistry>,
    flushes: Cell<usize>,
}

impl FakeGateway {
    /// A 1920x1080 root with SHAPE and XInput 2.2 available
    pub fn new() -> Self {
        let gateway = Self {
            next_id: Cell::new(FIRST_CLIENT_ID),
            atoms: RefCell::new(HashMap::new()),
            properties: RefCell::new(HashMap::new()),
            windows: RefCell::new(HashMap::new()),
            extensions: RefCell::new(HashSet::from(["SHAPE", "XInputExtension"])),
            input_version: Cell::new((2, 2)),
            events: RefCell::new(VecDeque::new()),
            requests: RefCell::new(Vec::new()),
            masks: RefCell::new(EventMaskRegistry::new()),
            flushes: Cell::new(0),
        };
        gateway.windows.borrow_mut().insert(
            ROOT,
            FakeWindow {
                parent: None,
                geometry: Geometry {
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080,
                    border_width: 0,
                },
            },
        );
        gateway
    }

    /// A root whose window manager advertises `_NET_ACTIVE_WINDOW`, with
    /// `active` as the current value
    pub fn with_ewmh(active: WindowHandle) -> Self {
        let gateway = Self::new();
        let supported = gateway.atom("_NET_ACTIVE_WINDOW");
        gateway.set_property(ROOT, "_NET_SUPPORTED", Some(vec![supported]));
        gateway.set_property(ROOT, "_NET_ACTIVE_WINDOW", Some(vec![active]));
        gateway
    }

    pub fn atom(&self, name: &str) -> Atom {
        let mut atoms = self.atoms.borrow_mut();
        let next = FIRST_ATOM + atoms.len() as Atom;
        *atoms.entry(name.to_string()).or_insert(next)
    }

    pub fn add_window(&self, window: WindowHandle, parent: WindowHandle, geometry: Geometry) {
        self.windows.borrow_mut().insert(
            window,
            FakeWindow {
                parent: Some(parent),
                geometry,
            },
        );
    }

    pub fn reparent_window(&self, window: WindowHandle, parent: WindowHandle, x: i16, y: i16) {
        if let Some(fake) = self.windows.borrow_mut().get_mut(&window) {
            fake.parent = Some(parent);
            fake.geometry.x = x;
            fake.geometry.y = y;
        }
    }

    pub fn remove_window(&self, window: WindowHandle) {
        self.windows.borrow_mut().remove(&window);
    }

    /// `None` deletes the property
    pub fn set_property(&self, window: WindowHandle, name: &str, values: Option<Vec<u32>>) {
        let atom = self.atom(name);
        let mut properties = self.properties.borrow_mut();
        match values {
            Some(values) => {
                properties.insert((window, atom), PropertyValue::Values(values));
            }
            None => {
                properties.remove(&(window, atom));
            }
        }
    }

    /// Make reads of the property fail as a reply of the wrong type would
    pub fn set_malformed_property(&self, window: WindowHandle, name: &str) {
        let atom = self.atom(name);
        self.properties
            .borrow_mut()
            .insert((window, atom), PropertyValue::Malformed);
    }

    pub fn remove_extension(&self, name: &'static str) {
        self.extensions.borrow_mut().remove(name);
    }

    pub fn set_input_version(&self, major: u16, minor: u16) {
        self.input_version.set((major, minor));
    }

    pub fn push_event(&self, event: Event) {
        self.events.borrow_mut().push_back(event);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    /// Return and forget the requests recorded so far
    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    /// Event mask currently in effect on `window`
    pub fn mask(&self, window: WindowHandle) -> u32 {
        self.masks.borrow().mask(window)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.get()
    }

    fn record(&self, request: Request) {
        self.requests.borrow_mut().push(request);
    }

    fn window(&self, window: WindowHandle) -> Result<FakeWindow> {
        self.windows
            .borrow()
            .get(&window)
            .copied()
            .ok_or_else(|| Error::Protocol {
                message: format!("BadWindow 0x{:x}", window),
                code: BAD_WINDOW,
                sequence: 0,
            })
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway for FakeGateway {
    fn root_window(&self) -> WindowHandle {
        ROOT
    }

    fn generate_id(&self) -> Result<u32> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Ok(id)
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        Ok(self.atom(name))
    }

    fn get_property(
        &self,
        window: WindowHandle,
        property: Atom,
        _type: Atom,
    ) -> Result<Option<Vec<u32>>> {
        match self.properties.borrow().get(&(window, property)) {
            None => Ok(None),
            Some(PropertyValue::Values(values)) => Ok(Some(values.clone())),
            Some(PropertyValue::Malformed) => {
                Err(Error::bad_reply(format!("bad property reply for atom {}", property)))
            }
        }
    }

    fn create_window(
        &self,
        window: WindowHandle,
        parent: WindowHandle,
        bounds: Rect,
        attributes: &WindowAttributes,
    ) -> Result<()> {
        self.record(Request::CreateWindow {
            window,
            parent,
            bounds,
            attributes: *attributes,
        });
        Ok(())
    }

    fn configure_window(&self, window: WindowHandle, changes: &WindowChanges) -> Result<()> {
        self.record(Request::ConfigureWindow {
            window,
            changes: *changes,
        });
        Ok(())
    }

    fn map_window(&self, window: WindowHandle) -> Result<()> {
        self.record(Request::MapWindow(window));
        Ok(())
    }

    fn unmap_window(&self, window: WindowHandle) -> Result<()> {
        self.record(Request::UnmapWindow(window));
        Ok(())
    }

    fn destroy_window(&self, window: WindowHandle) -> Result<()> {
        self.record(Request::DestroyWindow(window));
        Ok(())
    }

    fn select_events(&self, window: WindowHandle, mask: EventMask) -> Result<()> {
        let mask = u32::from(mask);
        self.masks.borrow_mut().select(window, mask);
        self.record(Request::SelectEvents { window, mask });
        Ok(())
    }

    fn deselect_events(&self, window: WindowHandle, mask: EventMask) -> Result<()> {
        let mask = u32::from(mask);
        self.masks.borrow_mut().deselect(window, mask);
        self.record(Request::DeselectEvents { window, mask });
        Ok(())
    }

    fn set_shape(&self, window: WindowHandle, kind: ShapeKind, rects: &[Rect]) -> Result<()> {
        self.record(Request::SetShape {
            window,
            kind,
            rects: rects.to_vec(),
        });
        Ok(())
    }

    fn query_parent(&self, window: WindowHandle) -> Result<Option<WindowHandle>> {
        Ok(self.window(window)?.parent)
    }

    fn get_geometry(&self, window: WindowHandle) -> Result<Geometry> {
        Ok(self.window(window)?.geometry)
    }

    fn has_extension(&self, name: &'static str) -> Result<bool> {
        Ok(self.extensions.borrow().contains(name))
    }

    fn query_input_version(&self, _major: u16, _minor: u16) -> Result<(u16, u16)> {
        Ok(self.input_version.get())
    }

    fn select_raw_key_events(&self, enabled: bool) -> Result<()> {
        self.record(Request::SelectRawKeyEvents(enabled));
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<Event>> {
        Ok(self.events.borrow_mut().pop_front())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.set(self.flushes.get() + 1);
        Ok(())
    }
}
