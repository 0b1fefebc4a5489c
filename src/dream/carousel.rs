//! Image carousel state for dream entries.
//!
//! Each entity keeps its own index, and the list card and the detail modal
//! are tracked under separate keys.

use crate::dream::error::{QuotaReason, SdkError};
use crate::dream::subscription::PlanTier;
use std::collections::HashMap;
use tracing::debug;

/// Minimum horizontal travel, in device-independent pixels, for a swipe.
pub const SWIPE_THRESHOLD_PX: f64 = 50.0;

/// Compact the raw slots and move the primary image to the front.
///
/// `primary` is a raw slot index; it is ignored when the slot is empty.
pub fn ordered_images(slots: &[Option<String>], primary: Option<usize>) -> Vec<String> {
    let mut images: Vec<String> = slots.iter().flatten().cloned().collect();
    let Some(primary) = primary else {
        return images;
    };
    if slots.get(primary).and_then(Option::as_ref).is_none() {
        return images;
    }
    // Position of the primary slot within the compacted list.
    let pos = slots[..primary].iter().filter(|s| s.is_some()).count();
    let cover = images.remove(pos);
    images.insert(0, cover);
    images
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarouselScope {
    Card,
    Modal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CarouselKey {
    pub scope: CarouselScope,
    pub entity_id: String,
}

impl CarouselKey {
    pub fn card(entity_id: impl Into<String>) -> Self {
        Self {
            scope: CarouselScope::Card,
            entity_id: entity_id.into(),
        }
    }

    pub fn modal(entity_id: impl Into<String>) -> Self {
        Self {
            scope: CarouselScope::Modal,
            entity_id: entity_id.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CarouselState {
    indices: HashMap<CarouselKey, usize>,
    touches: HashMap<CarouselKey, f64>,
}

impl CarouselState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, key: &CarouselKey) -> usize {
        self.indices.get(key).copied().unwrap_or(0)
    }

    /// Advance one image; no-op on the last one. Returns whether it moved.
    pub fn next(&mut self, key: &CarouselKey, len: usize) -> bool {
        let current = self.index(key);
        if current + 1 >= len {
            return false;
        }
        self.indices.insert(key.clone(), current + 1);
        true
    }

    /// Go back one image; no-op on the first one.
    pub fn prev(&mut self, key: &CarouselKey) -> bool {
        let current = self.index(key);
        if current == 0 {
            return false;
        }
        self.indices.insert(key.clone(), current - 1);
        true
    }

    pub fn touch_start(&mut self, key: &CarouselKey, x: f64) {
        self.touches.insert(key.clone(), x);
    }

    /// Finish a gesture: a left swipe advances, a right swipe goes back.
    pub fn touch_end(&mut self, key: &CarouselKey, x: f64, len: usize) -> bool {
        let Some(start) = self.touches.remove(key) else {
            return false;
        };
        let travel = start - x;
        if travel > SWIPE_THRESHOLD_PX {
            self.next(key, len)
        } else if travel < -SWIPE_THRESHOLD_PX {
            self.prev(key)
        } else {
            false
        }
    }

    pub fn reset(&mut self, key: &CarouselKey) {
        self.indices.remove(key);
        self.touches.remove(key);
    }

    /// Reset every scope of one entity.
    pub fn reset_entity(&mut self, entity_id: &str) {
        self.indices.retain(|k, _| k.entity_id != entity_id);
        self.touches.retain(|k, _| k.entity_id != entity_id);
        debug!("[Carousel] reset {}", entity_id);
    }
}

/// Check that `tier` may make `slot` the cover image of an entry with `slots`.
pub fn check_primary_image(
    slots: &[Option<String>],
    slot: usize,
    tier: PlanTier,
) -> Result<(), SdkError> {
    if !tier.can_set_primary_image() {
        return Err(SdkError::Quota(QuotaReason::PlanInsufficient));
    }
    if slots.get(slot).and_then(Option::as_ref).is_none() {
        return Err(SdkError::validation("That image slot is empty"));
    }
    Ok(())
}
