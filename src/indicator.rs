//! Active Window Indicator
//!
//! Shows the border around the active window while a watched key is held.
//! Tracker notifications are queued and applied from the idle callback, once
//! per loop turn, right before the outgoing requests are flushed.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::border_window::{BorderWindow, clamp_i16};
use crate::error::Result;
use crate::event_loop::{IdleObserver, RegistrationId, Registry};
use crate::gateway::{Gateway, NONE, WindowHandle};
use crate::signal::Subscription;
use crate::trackers::geometry::{ChainSubscriptions, GeometryChange};
use crate::trackers::{ActiveWindowTracker, GeometryChain, KeyStateTracker};

/// The window currently framed, and its change feeds
struct Highlight {
    chain: Rc<RefCell<GeometryChain>>,
    changes: ChainSubscriptions,
}

pub struct ActiveWindowIndicator {
    gateway: Rc<dyn Gateway>,
    registry: Registry,
    registration: Option<RegistrationId>,
    border: BorderWindow,
    active_window: WindowHandle,
    any_key_pressed: bool,
    highlight: Option<Highlight>,
    active_window_changes: Subscription<WindowHandle>,
    key_state_changes: Subscription<bool>,
    dirty: GeometryChange,
}

impl ActiveWindowIndicator {
    /// Starts from the trackers' current readings and registers for idle
    /// callbacks on `registry`.
    pub fn new(
        gateway: Rc<dyn Gateway>,
        registry: &Registry,
        border: BorderWindow,
        active_window: &mut ActiveWindowTracker,
        key_state: &mut KeyStateTracker,
    ) -> Result<Rc<RefCell<Self>>> {
        let mut indicator = Self {
            gateway,
            registry: registry.clone(),
            registration: None,
            border,
            active_window: active_window.active_window(),
            any_key_pressed: key_state.any_key_pressed(),
            highlight: None,
            active_window_changes: active_window.subscribe(),
            key_state_changes: key_state.subscribe(),
            dirty: GeometryChange::empty(),
        };
        indicator.update()?;

        let indicator = Rc::new(RefCell::new(indicator));
        let registration = registry.register_idle_observer(&indicator);
        indicator.borrow_mut().registration = Some(registration);
        Ok(indicator)
    }

    /// Window currently framed by the border, if any
    pub fn highlighted_window(&self) -> Option<WindowHandle> {
        self.highlight
            .as_ref()
            .map(|highlight| highlight.chain.borrow().target())
    }

    #[cfg(test)]
    pub fn border(&self) -> &BorderWindow {
        &self.border
    }

    pub fn active_window_changed(&mut self, window: WindowHandle) -> Result<()> {
        if window == self.active_window {
            return Ok(());
        }
        self.active_window = window;
        self.update()
    }

    pub fn key_state_changed(&mut self, any_key_pressed: bool) -> Result<()> {
        if any_key_pressed == self.any_key_pressed {
            return Ok(());
        }
        self.any_key_pressed = any_key_pressed;
        self.update()
    }

    fn should_show(&self) -> bool {
        self.any_key_pressed && self.active_window != NONE
    }

    /// Bring the border in line with the active window and key state
    fn update(&mut self) -> Result<()> {
        if !self.should_show() {
            if self.highlight.is_some() {
                self.release_highlight();
            }
            return self.border.hide();
        }

        if self.highlighted_window() == Some(self.active_window) {
            return Ok(());
        }
        self.release_highlight();
        self.highlight_active_window()
    }

    fn highlight_active_window(&mut self) -> Result<()> {
        let target = self.active_window;
        let chain = match GeometryChain::new(self.gateway.clone(), &self.registry, target) {
            Ok(chain) => chain,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Cannot track active window 0x{:x}: {}", target, e);
                return self.border.hide();
            }
        };
        debug!("Highlighting 0x{:x}", target);

        let changes = chain.borrow_mut().subscribe();
        self.highlight = Some(Highlight { chain, changes });
        self.apply_geometry(GeometryChange::POSITION | GeometryChange::SIZE)?;
        self.border.show()
    }

    /// Stop observing the framed window, then let go of its chain
    fn release_highlight(&mut self) {
        self.dirty = GeometryChange::empty();
        let Some(Highlight { chain, changes }) = self.highlight.take() else {
            return;
        };
        drop(changes);
        chain.borrow_mut().unsubscribe();
    }

    /// Fold queued chain notifications into the dirty flags. Returns false
    /// if the framed window was destroyed.
    fn collect_geometry_changes(&mut self) -> bool {
        let Some(highlight) = self.highlight.as_mut() else {
            return true;
        };
        let changes = &mut highlight.changes;
        if !changes.destroyed.drain().is_empty() {
            return false;
        }
        if !changes.position.drain().is_empty() {
            self.dirty |= GeometryChange::POSITION;
        }
        if !changes.size.drain().is_empty() {
            self.dirty |= GeometryChange::SIZE;
        }
        if !changes.border_width.drain().is_empty() {
            // Outer extent depends on the border width
            self.dirty |= GeometryChange::SIZE | GeometryChange::BORDER_WIDTH;
        }
        true
    }

    /// Move and resize the border to the framed window's outer extent
    fn apply_geometry(&mut self, change: GeometryChange) -> Result<()> {
        let Some(highlight) = self.highlight.as_ref() else {
            return Ok(());
        };
        let (x, y, width, height) = {
            let chain = highlight.chain.borrow();
            let border = chain.border_width().saturating_mul(2);
            (
                clamp_i16(chain.x()),
                clamp_i16(chain.y()),
                chain.width().saturating_add(border),
                chain.height().saturating_add(border),
            )
        };
        if change.contains(GeometryChange::POSITION) {
            self.border.set_position(x, y)?;
        }
        if change.contains(GeometryChange::SIZE) {
            self.border.set_size(width, height)?;
        }
        Ok(())
    }
}

impl IdleObserver for ActiveWindowIndicator {
    fn on_idle(&mut self) -> Result<()> {
        // Only the latest reading of each tracker matters
        if let Some(window) = self.active_window_changes.drain().pop() {
            self.active_window_changed(window)?;
        }
        if let Some(pressed) = self.key_state_changes.drain().pop() {
            self.key_state_changed(pressed)?;
        }

        if !self.collect_geometry_changes() {
            debug!("Highlighted window destroyed, hiding border");
            self.release_highlight();
            return self.border.hide();
        }
        let dirty = std::mem::take(&mut self.dirty);
        if !dirty.is_empty() {
            self.apply_geometry(dirty)?;
        }
        Ok(())
    }
}

impl Drop for ActiveWindowIndicator {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.registry.unregister(registration);
        }
        self.release_highlight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event_loop::{EventDispatcher, EventLoop};
    use crate::gateway::{Event, Geometry, Rect, ShapeKind, WindowChanges};
    use crate::testing::{FakeGateway, ROOT, Request};
    use tokio::sync::mpsc;

    const FRAME: WindowHandle = 0x10;
    const CLIENT: WindowHandle = 0x11;
    const OTHER: WindowHandle = 0x20;
    const LEFT_SUPER: u32 = 133;

    struct Harness {
        gateway: Rc<FakeGateway>,
        event_loop: EventLoop,
        _quit: mpsc::Sender<()>,
        active: Rc<RefCell<ActiveWindowTracker>>,
        keys: Rc<RefCell<KeyStateTracker>>,
        indicator: Rc<RefCell<ActiveWindowIndicator>>,
        border_window: WindowHandle,
    }

    impl Harness {
        /// Loop, trackers and indicator wired as in `main`, with CLIENT
        /// active inside FRAME and OTHER a second top-level window
        fn new() -> Self {
            let gateway = Rc::new(FakeGateway::with_ewmh(CLIENT));
            gateway.add_window(FRAME, ROOT, geometry(100, 50, 0));
            gateway.add_window(CLIENT, FRAME, geometry(4, 20, 0));
            gateway.add_window(OTHER, ROOT, geometry(300, 300, 2));

            let (quit, quit_rx) = mpsc::channel(1);
            let event_loop = EventLoop::new(gateway.clone(), quit_rx);
            let registry = event_loop.registry();
            let border = BorderWindow::new(gateway.clone(), &Config::default()).unwrap();
            let border_window = border.window();
            let active = ActiveWindowTracker::new(gateway.clone(), &registry).unwrap();
            let keys = KeyStateTracker::new(gateway.clone(), &registry, &[LEFT_SUPER]).unwrap();
            let indicator = ActiveWindowIndicator::new(
                gateway.clone(),
                &registry,
                border,
                &mut active.borrow_mut(),
                &mut keys.borrow_mut(),
            )
            .unwrap();
            gateway.take_requests();

            Self {
                gateway,
                event_loop,
                _quit: quit,
                active,
                keys,
                indicator,
                border_window,
            }
        }

        /// Queue events, then run one loop turn
        fn turn(&self, events: Vec<Event>) {
            for event in events {
                self.gateway.push_event(event);
            }
            self.event_loop.dispatch_pending().unwrap();
            self.event_loop.run_idle().unwrap();
        }

        fn activate(&self, window: WindowHandle) -> Event {
            self.gateway
                .set_property(ROOT, "_NET_ACTIVE_WINDOW", Some(vec![window]));
            Event::PropertyNotify {
                window: ROOT,
                atom: self.gateway.atom("_NET_ACTIVE_WINDOW"),
            }
        }

        fn highlighted(&self) -> Option<WindowHandle> {
            self.indicator.borrow().highlighted_window()
        }

        fn mapped(&self) -> bool {
            self.indicator.borrow().border().is_mapped()
        }

        fn configures(&self, requests: &[Request]) -> Vec<WindowChanges> {
            requests
                .iter()
                .filter_map(|request| match request {
                    Request::ConfigureWindow { window, changes } if *window == self.border_window => {
                        Some(*changes)
                    }
                    _ => None,
                })
                .collect()
        }
    }

    fn geometry(x: i16, y: i16, border_width: u16) -> Geometry {
        Geometry {
            x,
            y,
            width: 640,
            height: 480,
            border_width,
        }
    }

    fn press() -> Event {
        Event::KeyPress {
            keycode: LEFT_SUPER,
        }
    }

    fn release() -> Event {
        Event::KeyRelease {
            keycode: LEFT_SUPER,
        }
    }

    #[test]
    fn test_hidden_until_key_pressed() {
        let harness = Harness::new();
        assert_eq!(harness.highlighted(), None);
        assert!(!harness.mapped());

        harness.turn(vec![]);
        assert!(harness.gateway.take_requests().is_empty());
    }

    #[test]
    fn test_key_press_frames_active_window() {
        let harness = Harness::new();

        harness.turn(vec![press()]);

        assert_eq!(harness.highlighted(), Some(CLIENT));
        assert!(harness.mapped());
        let requests = harness.gateway.take_requests();
        let configures = harness.configures(&requests);
        assert!(configures.contains(&WindowChanges::new().position(104, 70)));
        assert!(configures.contains(&WindowChanges::new().size(640, 480)));
        assert_eq!(configures.last(), Some(&WindowChanges::new().raise()));
        assert!(requests.contains(&Request::MapWindow(harness.border_window)));
    }

    #[test]
    fn test_key_release_hides_and_releases_chain() {
        let harness = Harness::new();
        harness.turn(vec![press()]);
        harness.gateway.take_requests();

        harness.turn(vec![release()]);

        assert_eq!(harness.highlighted(), None);
        assert!(!harness.mapped());
        assert_eq!(harness.gateway.mask(CLIENT), 0);
        assert_eq!(harness.gateway.mask(FRAME), 0);
        assert!(
            harness
                .gateway
                .requests()
                .contains(&Request::UnmapWindow(harness.border_window))
        );
    }

    #[test]
    fn test_shown_iff_key_held_and_window_active() {
        let harness = Harness::new();
        let mut indicator = harness.indicator.borrow_mut();
        let steps = [
            (CLIENT, false),
            (CLIENT, true),
            (NONE, true),
            (NONE, false),
            (CLIENT, false),
            (NONE, true),
            (CLIENT, true),
            (NONE, false),
        ];
        for (window, pressed) in steps {
            indicator.active_window_changed(window).unwrap();
            indicator.key_state_changed(pressed).unwrap();
            let expected = window != NONE && pressed;
            assert_eq!(
                indicator.border().is_mapped(),
                expected,
                "active=0x{:x} pressed={}",
                window,
                pressed
            );
            let highlighted = expected.then_some(CLIENT);
            assert_eq!(indicator.highlighted_window(), highlighted);
        }
    }

    #[test]
    fn test_focus_change_while_held_moves_border() {
        let harness = Harness::new();
        harness.turn(vec![press()]);
        harness.gateway.take_requests();

        harness.turn(vec![harness.activate(OTHER)]);

        assert_eq!(harness.highlighted(), Some(OTHER));
        assert_eq!(harness.gateway.mask(CLIENT), 0);
        let requests = harness.gateway.take_requests();
        let configures = harness.configures(&requests);
        assert!(configures.contains(&WindowChanges::new().position(300, 300)));
        // 640x480 plus a 2 pixel border on each side
        assert!(configures.contains(&WindowChanges::new().size(644, 484)));
        // Already mapped: raised, not re-mapped
        assert!(!requests.contains(&Request::MapWindow(harness.border_window)));
    }

    #[test]
    fn test_focus_change_while_released_stays_hidden() {
        let harness = Harness::new();

        harness.turn(vec![harness.activate(OTHER)]);

        assert_eq!(harness.highlighted(), None);
        assert_eq!(harness.active.borrow().active_window(), OTHER);
        assert!(harness.gateway.take_requests().is_empty());
    }

    #[test]
    fn test_no_active_window_stays_hidden() {
        let harness = Harness::new();
        harness
            .gateway
            .set_property(ROOT, "_NET_ACTIVE_WINDOW", None);
        let cleared = Event::PropertyNotify {
            window: ROOT,
            atom: harness.gateway.atom("_NET_ACTIVE_WINDOW"),
        };

        harness.turn(vec![cleared, press()]);

        assert_eq!(harness.highlighted(), None);
        assert!(!harness.mapped());
    }

    #[test]
    fn test_burst_of_geometry_changes_is_applied_once() {
        let harness = Harness::new();
        harness.turn(vec![press()]);
        harness.gateway.take_requests();

        let moves = (1..=5)
            .map(|step| Event::ConfigureNotify {
                window: FRAME,
                geometry: geometry(100 + step, 50, 0),
                synthetic: false,
            })
            .collect();
        harness.turn(moves);

        let requests = harness.gateway.take_requests();
        assert_eq!(
            harness.configures(&requests),
            vec![WindowChanges::new().position(109, 70)]
        );
    }

    #[test]
    fn test_border_width_change_resizes() {
        let harness = Harness::new();
        harness.turn(vec![press()]);
        harness.gateway.take_requests();

        harness.turn(vec![Event::ConfigureNotify {
            window: CLIENT,
            geometry: geometry(4, 20, 3),
            synthetic: false,
        }]);

        let requests = harness.gateway.take_requests();
        assert_eq!(
            harness.configures(&requests),
            vec![WindowChanges::new().size(646, 486)]
        );
        let bounding = requests.iter().any(|request| {
            matches!(request, Request::SetShape { kind: ShapeKind::Bounding, rects, .. }
                if rects[0] == Rect::new(0, 0, 646, 5))
        });
        assert!(bounding);
    }

    #[test]
    fn test_destroyed_window_hides_until_next_change() {
        let harness = Harness::new();
        harness.turn(vec![press()]);

        harness.gateway.remove_window(CLIENT);
        harness.turn(vec![Event::DestroyNotify { window: CLIENT }]);

        assert_eq!(harness.highlighted(), None);
        assert!(!harness.mapped());

        harness.turn(vec![harness.activate(OTHER)]);
        assert_eq!(harness.highlighted(), Some(OTHER));
        assert!(harness.mapped());
    }

    #[test]
    fn test_vanished_active_window_is_not_fatal() {
        let harness = Harness::new();
        harness.gateway.remove_window(CLIENT);

        harness.turn(vec![press()]);

        assert_eq!(harness.highlighted(), None);
        assert!(!harness.mapped());
    }

    #[test]
    fn test_teardown_unregisters_chain_before_dropping_it() {
        let harness = Harness::new();
        let registry = harness.event_loop.registry();
        let idle_dispatchers = registry.dispatcher_count();
        harness.turn(vec![press()]);
        assert_eq!(registry.dispatcher_count(), idle_dispatchers + 1);

        harness.turn(vec![release()]);
        assert_eq!(registry.dispatcher_count(), idle_dispatchers);

        // Events for the old chain go unclaimed
        let moved = Event::ConfigureNotify {
            window: FRAME,
            geometry: geometry(0, 0, 0),
            synthetic: false,
        };
        assert!(!harness.event_loop.dispatch(&moved).unwrap());
    }

    #[test]
    fn test_trackers_stay_independent_of_indicator() {
        let harness = Harness::new();
        drop(harness.indicator);

        assert!(
            harness
                .keys
                .borrow_mut()
                .dispatch_event(&press())
                .unwrap()
        );
        assert!(harness.keys.borrow().any_key_pressed());
        assert_eq!(
            harness.gateway.requests().last(),
            Some(&Request::DestroyWindow(harness.border_window))
        );
    }
}
