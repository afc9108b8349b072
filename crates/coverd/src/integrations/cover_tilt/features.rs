//! Cover capability flags.
//!
//! Covers advertise the commands they accept through the integer
//! `supported_features` attribute. Only the two position-related bits are
//! interpreted here; everything else is ignored.

use crate::engine::Attributes;

/// Attribute holding the capability bitmask.
pub const ATTR_SUPPORTED_FEATURES: &str = "supported_features";

/// Cover accepts an absolute position.
pub const SET_POSITION: u64 = 4;

/// Cover accepts an absolute tilt position.
pub const SET_TILT_POSITION: u64 = 128;

/// Named view of the capability bits this crate acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverCapabilities {
    pub set_position: bool,
    pub set_tilt_position: bool,
}

impl CoverCapabilities {
    pub fn from_bits(bits: u64) -> Self {
        Self {
            set_position: bits & SET_POSITION != 0,
            set_tilt_position: bits & SET_TILT_POSITION != 0,
        }
    }
}

/// Raw `supported_features` value of an entity.
///
/// Missing or non-integer values count as no capabilities at all.
pub fn supported_features(attributes: &Attributes) -> u64 {
    attributes
        .get(ATTR_SUPPORTED_FEATURES)
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}
