//! Border Window
//!
//! A single override-redirect window painted in the indicator color and
//! shaped into a hollow frame: four strips along the edges, with an empty
//! input shape so pointer events fall through to whatever is below.

use std::rc::Rc;

use tracing::{debug, info, warn};
use x11rb::protocol::shape;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, Rect, ShapeKind, WindowAttributes, WindowChanges, WindowHandle};

pub struct BorderWindow {
    gateway: Rc<dyn Gateway>,
    window: WindowHandle,
    border_width: u16,
    mapped: bool,
}

impl BorderWindow {
    /// Create the (unmapped) window. Fails with a capability error without
    /// the SHAPE extension.
    pub fn new(gateway: Rc<dyn Gateway>, config: &Config) -> Result<Self> {
        if !gateway.has_extension(shape::X11_EXTENSION_NAME)? {
            return Err(Error::capability("SHAPE extension not available"));
        }

        let window = gateway.generate_id()?;
        gateway.create_window(
            window,
            gateway.root_window(),
            Rect::new(0, 0, 1, 1),
            &WindowAttributes {
                background_pixel: config.border_color,
                override_redirect: true,
            },
        )?;
        gateway.set_shape(window, ShapeKind::Input, &[])?;
        info!(
            "Created border window 0x{:x} (color 0x{:08x}, width {})",
            window, config.border_color, config.border_width
        );

        Ok(Self {
            gateway,
            window,
            border_width: config.border_width,
            mapped: false,
        })
    }

    #[cfg(test)]
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    #[cfg(test)]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn set_position(&self, x: i16, y: i16) -> Result<()> {
        self.gateway
            .configure_window(self.window, &WindowChanges::new().position(x, y))
    }

    /// Resize and reshape to a frame of the configured width
    pub fn set_size(&self, width: u16, height: u16) -> Result<()> {
        let width = width.max(1);
        let height = height.max(1);
        self.gateway
            .configure_window(self.window, &WindowChanges::new().size(width, height))?;
        self.gateway.set_shape(
            self.window,
            ShapeKind::Bounding,
            &frame_rects(width, height, self.border_width),
        )?;
        self.gateway.set_shape(self.window, ShapeKind::Input, &[])
    }

    /// Map if needed, and raise above everything else
    pub fn show(&mut self) -> Result<()> {
        if !self.mapped {
            debug!("Showing border window");
            self.gateway.map_window(self.window)?;
            self.mapped = true;
        }
        self.gateway
            .configure_window(self.window, &WindowChanges::new().raise())
    }

    pub fn hide(&mut self) -> Result<()> {
        if self.mapped {
            debug!("Hiding border window");
            self.gateway.unmap_window(self.window)?;
            self.mapped = false;
        }
        Ok(())
    }
}

impl Drop for BorderWindow {
    fn drop(&mut self) {
        if let Err(e) = self.gateway.destroy_window(self.window) {
            warn!("Failed to destroy border window 0x{:x}: {}", self.window, e);
        }
    }
}

/// Top, bottom, left and right strips of a `thickness` wide frame around a
/// `width` x `height` area. Strips overlap at the corners.
pub fn frame_rects(width: u16, height: u16, thickness: u16) -> [Rect; 4] {
    let far_x = clamp_i16(i32::from(width) - i32::from(thickness));
    let far_y = clamp_i16(i32::from(height) - i32::from(thickness));
    [
        Rect::new(0, 0, width, thickness),
        Rect::new(0, far_y, width, thickness),
        Rect::new(0, 0, thickness, height),
        Rect::new(far_x, 0, thickness, height),
    ]
}

pub(crate) fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
