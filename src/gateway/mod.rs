//! Display Server Gateway
//!
//! The request/response boundary between the indicator and the X server.
//! Everything above this module speaks in the plain types defined here; the
//! x11rb-backed implementation lives in [`x11`], and tests use an in-memory
//! fake.

pub mod event_mask;
pub mod x11;

use x11rb::protocol::xproto::EventMask;

use crate::error::Result;

/// X11 window id. `NONE` means "no window".
pub type WindowHandle = u32;

pub type Atom = u32;

pub const NONE: WindowHandle = x11rb::NONE;

/// Window geometry relative to the immediate parent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }
}

/// Which of a window's two shape masks a region applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    /// Pixels that are painted
    Bounding,
    /// Pixels that accept pointer input
    Input,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowAttributes {
    pub background_pixel: u32,
    pub override_redirect: bool,
}

/// Fields of a ConfigureWindow request; unset fields are left alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowChanges {
    pub x: Option<i16>,
    pub y: Option<i16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub raise: bool,
}

impl WindowChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(mut self, x: i16, y: i16) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn size(mut self, width: u16, height: u16) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn raise(mut self) -> Self {
        self.raise = true;
        self
    }
}

/// An incoming protocol event, decoded to the fields the indicator uses.
///
/// `synthetic` is set when the event was delivered through SendEvent rather
/// than generated by the server itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PropertyNotify {
        window: WindowHandle,
        atom: Atom,
    },
    ConfigureNotify {
        window: WindowHandle,
        geometry: Geometry,
        synthetic: bool,
    },
    GravityNotify {
        window: WindowHandle,
        x: i16,
        y: i16,
        synthetic: bool,
    },
    ReparentNotify {
        window: WindowHandle,
        parent: WindowHandle,
        x: i16,
        y: i16,
        synthetic: bool,
    },
    DestroyNotify {
        window: WindowHandle,
    },
    MapNotify {
        window: WindowHandle,
    },
    UnmapNotify {
        window: WindowHandle,
    },
    CirculateNotify {
        window: WindowHandle,
    },
    /// XInput2 raw key press
    KeyPress {
        keycode: u32,
    },
    /// XInput2 raw key release
    KeyRelease {
        keycode: u32,
    },
    /// Error reply to a request nobody waited on
    Error {
        code: u8,
        sequence: u16,
        major_opcode: u8,
        minor_opcode: u16,
    },
    Other {
        response_type: u8,
    },
}

impl Event {
    /// The window an event is about, for window-scoped events
    pub fn window(&self) -> Option<WindowHandle> {
        match *self {
            Event::PropertyNotify { window, .. }
            | Event::ConfigureNotify { window, .. }
            | Event::GravityNotify { window, .. }
            | Event::ReparentNotify { window, .. }
            | Event::DestroyNotify { window }
            | Event::MapNotify { window }
            | Event::UnmapNotify { window }
            | Event::CirculateNotify { window } => Some(window),
            _ => None,
        }
    }
}

/// Requests the indicator makes of the display server.
///
/// Round-trip methods (`intern_atom`, `get_property`, `query_parent`,
/// `get_geometry`, `has_extension`, `query_input_version`) block until the
/// reply arrives and are only used on construction paths. Everything else is
/// queued and goes out on the next `flush`.
pub trait Gateway {
    fn root_window(&self) -> WindowHandle;

    fn generate_id(&self) -> Result<u32>;

    fn intern_atom(&self, name: &str) -> Result<Atom>;

    /// Read a format-32 property of type `type_`.
    ///
    /// `Ok(None)` if the property does not exist. A reply of another type or
    /// format, or one that was not read completely, is a protocol error.
    fn get_property(
        &self,
        window: WindowHandle,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u32>>>;

    fn create_window(
        &self,
        window: WindowHandle,
        parent: WindowHandle,
        bounds: Rect,
        attributes: &WindowAttributes,
    ) -> Result<()>;

    fn configure_window(&self, window: WindowHandle, changes: &WindowChanges) -> Result<()>;

    fn map_window(&self, window: WindowHandle) -> Result<()>;

    fn unmap_window(&self, window: WindowHandle) -> Result<()>;

    fn destroy_window(&self, window: WindowHandle) -> Result<()>;

    /// Add `mask` to the events selected on `window`. Reference counted per
    /// bit across callers.
    fn select_events(&self, window: WindowHandle, mask: EventMask) -> Result<()>;

    /// Release one reference to each bit in `mask`; bits whose count drops to
    /// zero are cleared on the server.
    fn deselect_events(&self, window: WindowHandle, mask: EventMask) -> Result<()>;

    fn set_shape(&self, window: WindowHandle, kind: ShapeKind, rects: &[Rect]) -> Result<()>;

    /// Parent of `window`, or `None` for a root window
    fn query_parent(&self, window: WindowHandle) -> Result<Option<WindowHandle>>;

    fn get_geometry(&self, window: WindowHandle) -> Result<Geometry>;

    fn has_extension(&self, name: &'static str) -> Result<bool>;

    /// Negotiate the XInput version; returns the server's (major, minor)
    fn query_input_version(&self, major: u16, minor: u16) -> Result<(u16, u16)>;

    /// Select (or stop selecting) raw key press/release events from all
    /// master devices on the root window
    fn select_raw_key_events(&self, enabled: bool) -> Result<()>;

    /// Next already-received event, without blocking
    fn poll_for_event(&self) -> Result<Option<Event>>;

    fn flush(&self) -> Result<()>;
}
