/// Configuration for the cover tilt integration
///
/// All three entity ids are required; there are no defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cover whose position and tilt are commanded
    pub target_cover_entity_id: String,

    /// On/off entity selecting the cover position
    pub height_control_entity_id: String,

    /// On/off entity selecting the tilt position
    pub tilt_control_entity_id: String,
}
