//! Sensor inclusion filter.

use crate::core::types::Platform;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Decides which sensors a run applies to.
///
/// A sensor is included when its platform is enabled and it carries every
/// required tag. Tag matching is case-sensitive; normalize tags before
/// configuring them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFilter {
    /// Include Windows sensors.
    pub windows: bool,

    /// Include Linux sensors.
    pub linux: bool,

    /// Include macOS sensors.
    pub macos: bool,

    /// Tags a sensor must all carry, if any.
    pub required_tags: Option<BTreeSet<String>>,
}

impl Default for SensorFilter {
    fn default() -> Self {
        Self {
            windows: true,
            linux: true,
            macos: true,
            required_tags: None,
        }
    }
}

impl SensorFilter {
    /// Creates a filter that includes every sensor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables Windows sensors.
    pub fn with_windows(mut self, enabled: bool) -> Self {
        self.windows = enabled;
        self
    }

    /// Enables or disables Linux sensors.
    pub fn with_linux(mut self, enabled: bool) -> Self {
        self.linux = enabled;
        self
    }

    /// Enables or disables macOS sensors.
    pub fn with_macos(mut self, enabled: bool) -> Self {
        self.macos = enabled;
        self
    }

    /// Requires sensors to carry all of the given tags.
    pub fn with_required_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.required_tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if at least one platform is excluded.
    ///
    /// When every platform is enabled there is no need to query a sensor's
    /// platform at all.
    pub fn restricts_platform(&self) -> bool {
        !(self.windows && self.linux && self.macos)
    }

    /// Returns `true` if sensors of this platform are included.
    pub fn allows_platform(&self, platform: Platform) -> bool {
        match platform {
            Platform::Windows => self.windows,
            Platform::Linux => self.linux,
            Platform::Macos => self.macos,
        }
    }

    /// Returns `true` if a tag requirement is configured.
    pub fn restricts_tags(&self) -> bool {
        self.required_tags.is_some()
    }

    /// Returns `true` if `tags` contains every required tag.
    pub fn allows_tags(&self, tags: &HashSet<String>) -> bool {
        match &self.required_tags {
            Some(required) => required.iter().all(|tag| tags.contains(tag)),
            None => true,
        }
    }
}
