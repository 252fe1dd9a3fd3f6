//! Hardware acceptance filters

use serde::{Deserialize, Serialize};

use crate::Frame;

/// Acceptance filter in `(id, mask, extended)` form.
///
/// A frame passes when its identifier type matches `extended` and
/// `frame_id & mask == id & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFilter {
    pub id: u32,
    pub mask: u32,
    #[serde(default)]
    pub extended: bool,
}

impl HardwareFilter {
    pub fn new(id: u32, mask: u32, extended: bool) -> Self {
        Self { id, mask, extended }
    }

    /// Filter that accepts exactly one standard identifier
    pub fn exact_standard(id: u16) -> Self {
        Self::new(u32::from(id), 0x7FF, false)
    }

    /// Filter that accepts exactly one extended identifier
    pub fn exact_extended(id: u32) -> Self {
        Self::new(id, 0x1FFF_FFFF, true)
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        frame.is_extended() == self.extended
            && (frame.id().raw() & self.mask) == (self.id & self.mask)
    }
}

/// Whether a frame passes a filter list; an empty list accepts everything
pub fn accepts(filters: &[HardwareFilter], frame: &Frame) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(frame))
}
