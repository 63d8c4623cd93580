//! Storage budget selection.
//!
//! A coarse user-agent heuristic picks one of three device classes, each with
//! a fixed byte budget. Going over budget triggers eviction, never a failure.

use serde::{Deserialize, Serialize};

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    /// Classify a user-agent string. Unknown or empty agents count as desktop.
    #[must_use]
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("ipad") || ua.contains("tablet") || ua.contains("kindle") || ua.contains("silk") {
            return Self::Tablet;
        }
        if ua.contains("android") {
            // Android phones advertise "Mobile"; tablets do not.
            return if ua.contains("mobile") { Self::Mobile } else { Self::Tablet };
        }
        if ua.contains("iphone") || ua.contains("ipod") || ua.contains("mobi") || ua.contains("windows phone") {
            return Self::Mobile;
        }
        Self::Desktop
    }

    /// Cache byte budget for this class.
    #[must_use]
    pub fn budget_bytes(self) -> usize {
        match self {
            Self::Mobile => 50 * MIB,
            Self::Tablet => 100 * MIB,
            Self::Desktop => 200 * MIB,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mobile => write!(f, "mobile"),
            Self::Tablet => write!(f, "tablet"),
            Self::Desktop => write!(f, "desktop"),
        }
    }
}

/// Resolve the effective budget: explicit override wins, else device class.
#[must_use]
pub fn resolve_budget(user_agent: Option<&str>, override_bytes: Option<usize>) -> (DeviceClass, usize) {
    let class = user_agent.map_or(DeviceClass::Desktop, DeviceClass::from_user_agent);
    (class, override_bytes.unwrap_or_else(|| class.budget_bytes()))
}
