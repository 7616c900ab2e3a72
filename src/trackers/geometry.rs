//! Window Geometry Chain
//!
//! Tracks one target window together with every ancestor up to the root, so
//! that the target's position relative to the root stays current when a frame
//! or any other ancestor moves. Nodes are kept in a map keyed by window; each
//! node records its parent link and its geometry relative to that parent.
//!
//! Teardown happens in two phases: [`GeometryChain::unsubscribe`] releases
//! every event selection (target first, root last) and leaves the dispatch
//! loop, and only then are the nodes dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;
use tracing::{debug, trace, warn};
use x11rb::protocol::xproto::EventMask;

use crate::error::{Error, Result};
use crate::event_loop::{EventDispatcher, RegistrationId, Registry};
use crate::gateway::{Event, Gateway, Geometry, WindowHandle};
use crate::signal::{Signal, Subscription};

bitflags! {
    /// Which parts of a window's geometry moved
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GeometryChange: u8 {
        const POSITION = 1 << 0;
        const SIZE = 1 << 1;
        const BORDER_WIDTH = 1 << 2;
    }
}

impl GeometryChange {
    fn between(old: &Geometry, new: &Geometry) -> Self {
        let mut change = Self::empty();
        if (old.x, old.y) != (new.x, new.y) {
            change |= Self::POSITION;
        }
        if (old.width, old.height) != (new.width, new.height) {
            change |= Self::SIZE;
        }
        if old.border_width != new.border_width {
            change |= Self::BORDER_WIDTH;
        }
        change
    }
}

#[derive(Debug, Clone)]
struct TrackerNode {
    parent: Option<WindowHandle>,
    geometry: Geometry,
    subscribed: bool,
    destroyed: bool,
}

/// Change notifications for the chain's target window
#[derive(Default)]
struct ChainSignals {
    position: Signal<()>,
    size: Signal<()>,
    border_width: Signal<()>,
    destroyed: Signal<()>,
}

/// Subscriptions to every change a [`GeometryChain`] reports
pub struct ChainSubscriptions {
    pub position: Subscription<()>,
    pub size: Subscription<()>,
    pub border_width: Subscription<()>,
    pub destroyed: Subscription<()>,
}

pub struct GeometryChain {
    gateway: Rc<dyn Gateway>,
    registry: Registry,
    registration: Option<RegistrationId>,
    target: WindowHandle,
    nodes: HashMap<WindowHandle, TrackerNode>,
    signals: ChainSignals,
}

impl GeometryChain {
    /// Track `target` and its ancestors.
    ///
    /// Every node selects structure events before its parent and geometry are
    /// queried, so no change between the query and the selection is missed.
    pub fn new(
        gateway: Rc<dyn Gateway>,
        registry: &Registry,
        target: WindowHandle,
    ) -> Result<Rc<RefCell<Self>>> {
        let mut chain = Self {
            gateway,
            registry: registry.clone(),
            registration: None,
            target,
            nodes: HashMap::new(),
            signals: ChainSignals::default(),
        };
        if let Err(e) = chain.track_from(target) {
            chain.unsubscribe();
            return Err(e);
        }
        debug!(
            "Tracking geometry of 0x{:x} through {} windows",
            target,
            chain.nodes.len()
        );

        let chain = Rc::new(RefCell::new(chain));
        let registration = registry.register_dispatcher(&chain);
        chain.borrow_mut().registration = Some(registration);
        Ok(chain)
    }

    pub fn target(&self) -> WindowHandle {
        self.target
    }

    pub fn subscribe(&mut self) -> ChainSubscriptions {
        ChainSubscriptions {
            position: self.signals.position.subscribe(),
            size: self.signals.size.subscribe(),
            border_width: self.signals.border_width.subscribe(),
            destroyed: self.signals.destroyed.subscribe(),
        }
    }

    /// Target x relative to the root
    pub fn x(&self) -> i32 {
        self.position_of(self.target).map_or(0, |(x, _)| x)
    }

    /// Target y relative to the root
    pub fn y(&self) -> i32 {
        self.position_of(self.target).map_or(0, |(_, y)| y)
    }

    pub fn width(&self) -> u16 {
        self.target_geometry().width
    }

    pub fn height(&self) -> u16 {
        self.target_geometry().height
    }

    pub fn border_width(&self) -> u16 {
        self.target_geometry().border_width
    }

    /// Position of a tracked window relative to the root: its own offset plus
    /// its parent's position. The root itself is at the origin.
    pub fn position_of(&self, window: WindowHandle) -> Option<(i32, i32)> {
        let mut node = self.nodes.get(&window)?;
        let (mut x, mut y) = (0i32, 0i32);
        while let Some(parent) = node.parent {
            x += i32::from(node.geometry.x);
            y += i32::from(node.geometry.y);
            match self.nodes.get(&parent) {
                Some(next) => node = next,
                None => break,
            }
        }
        Some((x, y))
    }

    /// Tracked windows from the target up to the root
    #[cfg(test)]
    pub fn windows(&self) -> Vec<WindowHandle> {
        self.ancestry(self.target)
    }

    #[cfg(test)]
    pub fn is_destroyed(&self) -> bool {
        self.nodes.get(&self.target).is_none_or(|node| node.destroyed)
    }

    /// Release every event selection, target first, and leave the dispatch
    /// loop. Safe to call more than once.
    ///
    /// Every node stays linked from its child, including the partial
    /// ancestry left by a failed rebuild, so walking up from the target
    /// reaches all of them.
    pub fn unsubscribe(&mut self) {
        for window in self.ancestry(self.target) {
            self.release(window);
        }
        if let Some(registration) = self.registration.take() {
            self.registry.unregister(registration);
        }
    }

    fn target_geometry(&self) -> Geometry {
        self.nodes
            .get(&self.target)
            .map(|node| node.geometry)
            .unwrap_or_default()
    }

    /// `window` followed by each of its tracked ancestors
    fn ancestry(&self, window: WindowHandle) -> Vec<WindowHandle> {
        let mut windows = Vec::new();
        let mut current = Some(window);
        while let Some(window) = current {
            let Some(node) = self.nodes.get(&window) else {
                break;
            };
            windows.push(window);
            current = node.parent;
        }
        windows
    }

    /// Select on `window` and each of its ancestors, adding them as nodes
    fn track_from(&mut self, window: WindowHandle) -> Result<()> {
        let mut current = Some(window);
        while let Some(window) = current {
            if self.nodes.contains_key(&window) {
                return Err(Error::bad_reply(format!(
                    "window 0x{:x} appears twice in its own ancestry",
                    window
                )));
            }
            self.gateway
                .select_events(window, EventMask::STRUCTURE_NOTIFY)?;
            self.nodes.insert(
                window,
                TrackerNode {
                    parent: None,
                    geometry: Geometry::default(),
                    subscribed: true,
                    destroyed: false,
                },
            );

            let parent = self.gateway.query_parent(window)?;
            let geometry = self.gateway.get_geometry(window)?;
            if let Some(node) = self.nodes.get_mut(&window) {
                node.parent = parent;
                node.geometry = geometry;
            }
            trace!("Tracking 0x{:x}: parent={:?} {:?}", window, parent, geometry);
            current = parent;
        }
        Ok(())
    }

    fn release(&mut self, window: WindowHandle) {
        let Some(node) = self.nodes.get_mut(&window) else {
            return;
        };
        if !node.subscribed {
            return;
        }
        node.subscribed = false;
        if let Err(e) = self
            .gateway
            .deselect_events(window, EventMask::STRUCTURE_NOTIFY)
        {
            warn!("Failed to deselect structure events on 0x{:x}: {}", window, e);
        }
    }

    fn notify(&mut self, window: WindowHandle, change: GeometryChange) {
        if change.contains(GeometryChange::POSITION) {
            self.signals.position.emit(());
        }
        if window != self.target {
            return;
        }
        if change.contains(GeometryChange::SIZE) {
            self.signals.size.emit(());
        }
        if change.contains(GeometryChange::BORDER_WIDTH) {
            self.signals.border_width.emit(());
        }
    }

    fn configure(&mut self, window: WindowHandle, geometry: Geometry) {
        let Some(node) = self.nodes.get_mut(&window) else {
            return;
        };
        let change = GeometryChange::between(&node.geometry, &geometry);
        node.geometry = geometry;
        if !change.is_empty() {
            trace!("0x{:x} changed {:?}", window, change);
            self.notify(window, change);
        }
    }

    fn gravity(&mut self, window: WindowHandle, x: i16, y: i16) {
        let Some(node) = self.nodes.get(&window) else {
            return;
        };
        let geometry = Geometry { x, y, ..node.geometry };
        self.configure(window, geometry);
    }

    /// Drop everything above `window` and rebuild from its new parent
    fn reparent(
        &mut self,
        window: WindowHandle,
        parent: WindowHandle,
        x: i16,
        y: i16,
    ) -> Result<()> {
        let Some(node) = self.nodes.get(&window) else {
            return Ok(());
        };
        let old_parent = node.parent;
        debug!(
            "0x{:x} reparented from {:?} to 0x{:x}",
            window, old_parent, parent
        );

        let ancestors = old_parent.map(|old| self.ancestry(old)).unwrap_or_default();
        for &ancestor in &ancestors {
            self.release(ancestor);
        }
        for ancestor in ancestors {
            self.nodes.remove(&ancestor);
        }

        if let Some(node) = self.nodes.get_mut(&window) {
            node.parent = Some(parent);
            node.geometry.x = x;
            node.geometry.y = y;
        }
        let rebuilt = self.track_from(parent);
        self.notify(window, GeometryChange::POSITION);
        rebuilt
    }

    fn destroy(&mut self, window: WindowHandle) {
        if window == self.target {
            debug!("Tracked window 0x{:x} destroyed", window);
            if let Some(node) = self.nodes.get_mut(&window) {
                node.destroyed = true;
            }
            self.unsubscribe();
            self.signals.destroyed.emit(());
            return;
        }
        self.release(window);
        if let Some(node) = self.nodes.get_mut(&window) {
            node.destroyed = true;
        }
    }
}

impl EventDispatcher for GeometryChain {
    fn dispatch_event(&mut self, event: &Event) -> Result<bool> {
        let Some(window) = event.window() else {
            return Ok(false);
        };
        match self.nodes.get(&window) {
            Some(node) if node.subscribed && !node.destroyed => {}
            _ => return Ok(false),
        }

        match *event {
            Event::ConfigureNotify {
                geometry,
                synthetic,
                ..
            } => {
                if !synthetic {
                    self.configure(window, geometry);
                }
            }
            Event::GravityNotify { x, y, synthetic, .. } => {
                if !synthetic {
                    self.gravity(window, x, y);
                }
            }
            Event::ReparentNotify {
                parent,
                x,
                y,
                synthetic,
                ..
            } => {
                if !synthetic {
                    self.reparent(window, parent, x, y)?;
                }
            }
            Event::DestroyNotify { .. } => self.destroy(window),
            Event::MapNotify { .. } | Event::UnmapNotify { .. } | Event::CirculateNotify { .. } => {}
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl Drop for GeometryChain {
    fn drop(&mut self) {
        if self.registration.is_some() || self.nodes.values().any(|node| node.subscribed) {
            debug!("Geometry chain for 0x{:x} dropped while subscribed", self.target);
            self.unsubscribe();
        }
    }
}
