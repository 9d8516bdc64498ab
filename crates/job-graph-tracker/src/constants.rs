//! Tracker-wide constants
//!
//! Single source of truth for defaults and naming conventions.

/// Default values for tracker configuration
pub mod defaults {
    /// Events drained from one execution context per tick
    pub const MAX_EVENTS_PER_CONTEXT: usize = 20;
    /// Zero node tallies when a link is first initialised
    pub const ZERO_TALLIES_ON_LINK: bool = true;
    /// Cook the selected network after the hosting asset cooks
    pub const AUTO_COOK: bool = false;
}

/// Result descriptor conventions
pub mod results {
    /// Only descriptors whose tag starts with this prefix are artifacts
    pub const FILE_TAG_PREFIX: &str = "file";
}

/// Configuration file names
pub mod paths {
    /// Tracker configuration file, relative to the config directory
    pub const CONFIG_FILE: &str = "tracker.json";
}
