use std::collections::BTreeMap;

/// Default capability mask for demo covers: every cover feature.
pub const DEFAULT_SUPPORTED_FEATURES: u32 = 255;

/// Configuration for the demo platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Simulated covers keyed by entity id ("cover.*")
    pub covers: BTreeMap<String, DemoCover>,

    /// Simulated on/off helpers keyed by entity id ("input_boolean.*")
    pub input_booleans: BTreeMap<String, DemoInputBoolean>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.covers.is_empty() && self.input_booleans.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoCover {
    pub name: Option<String>,

    /// Advertised `supported_features` bitmask
    pub supported_features: u32,

    /// Initial position, 0 (closed) to 100 (open)
    pub position: u8,

    /// Initial tilt position, 0 to 100
    pub tilt_position: u8,
}

impl Default for DemoCover {
    fn default() -> Self {
        Self {
            name: None,
            supported_features: DEFAULT_SUPPORTED_FEATURES,
            position: 0,
            tilt_position: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemoInputBoolean {
    pub name: Option<String>,

    /// State at startup
    pub initial: bool,
}
