//! x11rb-backed Display Server Gateway

use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot};

use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shape::{ConnectionExt as ShapeExt, SK, SO};
use x11rb::protocol::xinput::{self, ConnectionExt as XInputExt, XIEventMask};
use x11rb::protocol::xproto::{
    ChangeWindowAttributesAux, ClipOrdering, ConfigureWindowAux, ConnectionExt as XProtoExt,
    CreateWindowAux, EventMask, Rectangle, StackMode, WindowClass,
};
use x11rb::protocol::Event as XEvent;
use x11rb::rust_connection::RustConnection;

use super::event_mask::EventMaskRegistry;
use super::{
    Atom, Event, Gateway, Geometry, Rect, ShapeKind, WindowAttributes, WindowChanges,
    WindowHandle,
};
use crate::error::{Error, Result};
use crate::event_loop::Readiness;

/// Set in `response_type` for events delivered through SendEvent
const SEND_EVENT_BIT: u8 = 0x80;

/// XIAllMasterDevices
const ALL_MASTER_DEVICES: u16 = 1;

/// How often the socket watcher checks whether anyone still listens
const WATCH_TIMEOUT: Duration = Duration::from_millis(100);

pub struct X11Gateway {
    conn: RustConnection,
    root: WindowHandle,
    masks: RefCell<EventMaskRegistry>,
}

impl X11Gateway {
    /// Connect to the display named by `$DISPLAY`
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| Error::Connection(format!("could not get screen {}", screen_num)))?;
        if root == x11rb::NONE {
            return Err(Error::Connection("could not find root window".into()));
        }

        info!("Connected to X server, screen {}, root window 0x{:x}", screen_num, root);

        Ok(Self {
            conn,
            root,
            masks: RefCell::new(EventMaskRegistry::new()),
        })
    }

    /// Start a blocking watcher on the X11 socket that wakes the loop when
    /// the server has sent something. Events are still read on the loop's
    /// thread. The watcher stops shortly after the handle is dropped.
    pub fn readiness(&self) -> Result<SocketReadiness> {
        let fd = self.conn.stream().as_raw_fd();
        let poll = mio::Poll::new().map_err(|e| watch_error("create poll", e))?;
        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(0),
                mio::Interest::READABLE,
            )
            .map_err(|e| watch_error("register the X11 socket", e))?;

        let readable = Arc::new(Notify::new());
        let (alive, watched) = oneshot::channel();
        let notify = readable.clone();
        tokio::task::spawn_blocking(move || watch_socket(poll, alive, notify));

        Ok(SocketReadiness {
            readable,
            _watched: watched,
        })
    }

    fn write_event_mask(&self, window: WindowHandle, mask: u32) -> Result<()> {
        // The window may already be gone; a BadWindow here is expected.
        self.conn
            .change_window_attributes(
                window,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::from(mask)),
            )?
            .ignore_error();
        Ok(())
    }
}

/// Wakeups from the X11 socket watcher
pub struct SocketReadiness {
    readable: Arc<Notify>,
    _watched: oneshot::Receiver<()>,
}

impl Readiness for SocketReadiness {
    fn wait_readable(&self) -> impl Future<Output = ()> {
        self.readable.notified()
    }
}

fn watch_error(action: &str, e: io::Error) -> Error {
    Error::Connection(format!("failed to {}: {}", action, e))
}

fn watch_socket(mut poll: mio::Poll, alive: oneshot::Sender<()>, readable: Arc<Notify>) {
    let mut events = mio::Events::with_capacity(1);
    while !alive.is_closed() {
        match poll.poll(&mut events, Some(WATCH_TIMEOUT)) {
            Ok(()) if !events.is_empty() => readable.notify_one(),
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => warn!("Polling the X11 socket failed: {}", e),
        }
    }
    debug!("X11 socket watcher stopped");
}

impl Drop for X11Gateway {
    fn drop(&mut self) {
        let windows: Vec<WindowHandle> = self.masks.borrow().windows().collect();
        for window in windows {
            if let Err(e) = self.write_event_mask(window, 0) {
                warn!("Failed to reset event mask on window 0x{:x}: {}", window, e);
            }
        }
        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush X11 requests on shutdown: {}", e);
        }
    }
}

impl Gateway for X11Gateway {
    fn root_window(&self) -> WindowHandle {
        self.root
    }

    fn generate_id(&self) -> Result<u32> {
        Ok(self.conn.generate_id()?)
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn get_property(
        &self,
        window: WindowHandle,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u32>>> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, u32::MAX)?
            .reply()?;

        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        if reply.type_ != type_ || reply.format != 32 || reply.bytes_after != 0 {
            return Err(Error::bad_reply(format!(
                "bad property reply for atom {} on window 0x{:x}: type {}, format {}, {} bytes left",
                property, window, reply.type_, reply.format, reply.bytes_after
            )));
        }

        let values: Vec<u32> = reply
            .value32()
            .ok_or_else(|| Error::bad_reply("property value is not format 32"))?
            .collect();
        if values.len() != reply.value_len as usize {
            return Err(Error::bad_reply(format!(
                "truncated property: expected {} items, got {}",
                reply.value_len,
                values.len()
            )));
        }
        Ok(Some(values))
    }

    fn create_window(
        &self,
        window: WindowHandle,
        parent: WindowHandle,
        bounds: Rect,
        attributes: &WindowAttributes,
    ) -> Result<()> {
        let aux = CreateWindowAux::new()
            .background_pixel(attributes.background_pixel)
            .override_redirect(u32::from(attributes.override_redirect));
        self.conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            parent,
            bounds.x,
            bounds.y,
            bounds.width,
            bounds.height,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )?;
        Ok(())
    }

    fn configure_window(&self, window: WindowHandle, changes: &WindowChanges) -> Result<()> {
        let mut aux = ConfigureWindowAux::new();
        aux.x = changes.x.map(i32::from);
        aux.y = changes.y.map(i32::from);
        aux.width = changes.width.map(u32::from);
        aux.height = changes.height.map(u32::from);
        if changes.raise {
            aux = aux.stack_mode(StackMode::ABOVE);
        }
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn map_window(&self, window: WindowHandle) -> Result<()> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn unmap_window(&self, window: WindowHandle) -> Result<()> {
        self.conn.unmap_window(window)?;
        Ok(())
    }

    fn destroy_window(&self, window: WindowHandle) -> Result<()> {
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn select_events(&self, window: WindowHandle, mask: EventMask) -> Result<()> {
        let changed = self.masks.borrow_mut().select(window, u32::from(mask));
        match changed {
            Some(new_mask) => self.write_event_mask(window, new_mask),
            None => Ok(()),
        }
    }

    fn deselect_events(&self, window: WindowHandle, mask: EventMask) -> Result<()> {
        let changed = self.masks.borrow_mut().deselect(window, u32::from(mask));
        match changed {
            Some(new_mask) => self.write_event_mask(window, new_mask),
            None => Ok(()),
        }
    }

    fn set_shape(&self, window: WindowHandle, kind: ShapeKind, rects: &[Rect]) -> Result<()> {
        let kind = match kind {
            ShapeKind::Bounding => SK::BOUNDING,
            ShapeKind::Input => SK::INPUT,
        };
        let rectangles: Vec<Rectangle> = rects
            .iter()
            .map(|rect| Rectangle {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
            })
            .collect();
        self.conn.shape_rectangles(
            SO::SET,
            kind,
            ClipOrdering::UNSORTED,
            window,
            0,
            0,
            &rectangles,
        )?;
        Ok(())
    }

    fn query_parent(&self, window: WindowHandle) -> Result<Option<WindowHandle>> {
        let parent = self.conn.query_tree(window)?.reply()?.parent;
        Ok((parent != x11rb::NONE).then_some(parent))
    }

    fn get_geometry(&self, window: WindowHandle) -> Result<Geometry> {
        let reply = self.conn.get_geometry(window)?.reply()?;
        Ok(Geometry {
            x: reply.x,
            y: reply.y,
            width: reply.width,
            height: reply.height,
            border_width: reply.border_width,
        })
    }

    fn has_extension(&self, name: &'static str) -> Result<bool> {
        let present = self.conn.extension_information(name)?.is_some();
        debug!("Extension {}: present={}", name, present);
        Ok(present)
    }

    fn query_input_version(&self, major: u16, minor: u16) -> Result<(u16, u16)> {
        let reply = self.conn.xinput_xi_query_version(major, minor)?.reply()?;
        Ok((reply.major_version, reply.minor_version))
    }

    fn select_raw_key_events(&self, enabled: bool) -> Result<()> {
        let mask = if enabled {
            XIEventMask::RAW_KEY_PRESS | XIEventMask::RAW_KEY_RELEASE
        } else {
            XIEventMask::from(0u32)
        };
        self.conn.xinput_xi_select_events(
            self.root,
            &[xinput::EventMask {
                deviceid: ALL_MASTER_DEVICES,
                mask: vec![mask],
            }],
        )?;
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<Event>> {
        Ok(self.conn.poll_for_event()?.map(Event::from))
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

fn is_synthetic(response_type: u8) -> bool {
    response_type & SEND_EVENT_BIT != 0
}

impl From<XEvent> for Event {
    fn from(event: XEvent) -> Self {
        match event {
            XEvent::PropertyNotify(e) => Event::PropertyNotify {
                window: e.window,
                atom: e.atom,
            },
            XEvent::ConfigureNotify(e) => Event::ConfigureNotify {
                window: e.window,
                geometry: Geometry {
                    x: e.x,
                    y: e.y,
                    width: e.width,
                    height: e.height,
                    border_width: e.border_width,
                },
                synthetic: is_synthetic(e.response_type),
            },
            XEvent::GravityNotify(e) => Event::GravityNotify {
                window: e.window,
                x: e.x,
                y: e.y,
                synthetic: is_synthetic(e.response_type),
            },
            XEvent::ReparentNotify(e) => Event::ReparentNotify {
                window: e.window,
                parent: e.parent,
                x: e.x,
                y: e.y,
                synthetic: is_synthetic(e.response_type),
            },
            XEvent::DestroyNotify(e) => Event::DestroyNotify { window: e.window },
            XEvent::MapNotify(e) => Event::MapNotify { window: e.window },
            XEvent::UnmapNotify(e) => Event::UnmapNotify { window: e.window },
            XEvent::CirculateNotify(e) => Event::CirculateNotify { window: e.window },
            XEvent::XinputRawKeyPress(e) => Event::KeyPress { keycode: e.detail },
            XEvent::XinputRawKeyRelease(e) => Event::KeyRelease { keycode: e.detail },
            XEvent::Error(e) => Event::Error {
                code: e.error_code,
                sequence: e.sequence,
                major_opcode: e.major_opcode,
                minor_opcode: e.minor_opcode,
            },
            other => Event::Other {
                response_type: other.response_type() & !SEND_EVENT_BIT,
            },
        }
    }
}
