//! Advertisement filtering.
//!
//! Decides whether a discovered peripheral matches the configured
//! target. Pure and side-effect free.

use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::config::ClientConfig;

/// Target specification applied to every discovery event.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    /// Required advertised name. `None` means never match — scanning
    /// without a target must not connect to an arbitrary device.
    name: Option<String>,
    /// Accepted service UUIDs. Empty means any.
    services: Vec<Uuid>,
}

impl TargetFilter {
    /// Create a filter from a target name and accepted services.
    pub fn new(name: Option<String>, services: Vec<Uuid>) -> Self {
        Self { name, services }
    }

    /// Build the filter a config implies.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.target_name.clone(), config.target_services.clone())
    }

    /// Whether a target name is configured at all.
    pub fn has_target(&self) -> bool {
        self.name.is_some()
    }

    /// Decide whether an advertisement matches the target.
    ///
    /// The advertised name must equal the configured name. When both
    /// the target service set and the advertised service set are
    /// non-empty they must intersect; advertisements that omit service
    /// UUIDs are not rejected on that basis, since the scan filter has
    /// already narrowed by service.
    pub fn matches(&self, adv: &Advertisement) -> bool {
        let Some(target_name) = &self.name else {
            return false;
        };

        if adv.local_name.as_deref() != Some(target_name.as_str()) {
            return false;
        }

        if !self.services.is_empty() && !adv.services.is_empty() {
            return adv.services.iter().any(|uuid| self.services.contains(uuid));
        }

        true
    }
}
