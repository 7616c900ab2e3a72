//! Reference-counted event masks
//!
//! Several independent subscribers may want events on the same window (the
//! active window tracker and a geometry chain both watch the root). The server
//! keeps a single mask per client and window, so each bit is counted here and
//! only cleared on the wire when its last holder lets go.

use std::collections::HashMap;

use tracing::warn;

use super::WindowHandle;

/// Number of bits defined for core event masks
const MASK_BITS: usize = 25;

/// Per-bit holder counts for one window
#[derive(Debug, Clone, Default)]
pub struct MultiMask {
    counts: [u32; MASK_BITS],
}

impl MultiMask {
    pub fn add(&mut self, mask: u32) {
        for (bit, count) in self.counts.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                *count += 1;
            }
        }
    }

    /// Returns false if `mask` named a bit nobody held
    pub fn remove(&mut self, mask: u32) -> bool {
        let mut balanced = true;
        for (bit, count) in self.counts.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                match count.checked_sub(1) {
                    Some(decremented) => *count = decremented,
                    None => balanced = false,
                }
            }
        }
        balanced
    }

    pub fn to_mask(&self) -> u32 {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .fold(0, |mask, (bit, _)| mask | (1 << bit))
    }
}

/// Event mask bookkeeping for every window this client has selected on
#[derive(Debug, Default)]
pub struct EventMaskRegistry {
    masks: HashMap<WindowHandle, MultiMask>,
}

impl EventMaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new wire mask if it differs from the old one
    pub fn select(&mut self, window: WindowHandle, mask: u32) -> Option<u32> {
        let entry = self.masks.entry(window).or_default();
        let old_mask = entry.to_mask();
        entry.add(mask);
        let new_mask = entry.to_mask();
        (new_mask != old_mask).then_some(new_mask)
    }

    /// Returns the new wire mask if it differs from the old one. A window
    /// whose mask reaches zero is forgotten.
    pub fn deselect(&mut self, window: WindowHandle, mask: u32) -> Option<u32> {
        let Some(entry) = self.masks.get_mut(&window) else {
            warn!("Deselecting events 0x{:x} on unregistered window 0x{:x}", mask, window);
            return None;
        };
        let old_mask = entry.to_mask();
        if !entry.remove(mask) {
            warn!("Unbalanced event deselect 0x{:x} on window 0x{:x}", mask, window);
        }
        let new_mask = entry.to_mask();
        if new_mask == 0 {
            self.masks.remove(&window);
        }
        (new_mask != old_mask).then_some(new_mask)
    }

    #[cfg(test)]
    pub fn mask(&self, window: WindowHandle) -> u32 {
        self.masks.get(&window).map_or(0, MultiMask::to_mask)
    }

    /// Every window that still has a non-empty mask
    pub fn windows(&self) -> impl Iterator<Item = WindowHandle> + '_ {
        self.masks.keys().copied()
    }
}
