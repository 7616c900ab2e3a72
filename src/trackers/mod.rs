//! Window, key and geometry trackers
//!
//! Each tracker is an event dispatcher that keeps one piece of display server
//! state current and announces changes through [`Signal`](crate::signal::Signal)s.

pub mod active_window;
pub mod geometry;
pub mod key_state;

pub use active_window::ActiveWindowTracker;
pub use geometry::GeometryChain;
pub use key_state::KeyStateTracker;
