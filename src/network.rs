//! Connectivity and network-quality signals.
//!
//! The host feeds online/offline transitions and quality descriptors into a
//! [`NetworkMonitor`]; engine components watch it. Poor networks widen the
//! freshness window and stretch sync cadence.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Effective connection class as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl std::fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slow2g => write!(f, "slow-2g"),
            Self::TwoG => write!(f, "2g"),
            Self::ThreeG => write!(f, "3g"),
            Self::FourG => write!(f, "4g"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub effective_type: EffectiveType,
    /// Round-trip estimate in milliseconds
    pub rtt_ms: u32,
    /// Power/data saving mode requested by the user
    pub save_data: bool,
}

impl Default for NetworkQuality {
    fn default() -> Self {
        Self {
            effective_type: EffectiveType::FourG,
            rtt_ms: 50,
            save_data: false,
        }
    }
}

impl NetworkQuality {
    /// How far the acceptable cache age stretches on this network.
    ///
    /// 1.0 on 4g, up to 3.0 on slow-2g; data saving multiplies by 1.5.
    #[must_use]
    pub fn freshness_multiplier(&self) -> f64 {
        let base = match self.effective_type {
            EffectiveType::FourG => 1.0,
            EffectiveType::ThreeG => 1.5,
            EffectiveType::TwoG => 2.5,
            EffectiveType::Slow2g => 3.0,
        };
        if self.save_data { base * 1.5 } else { base }
    }

    /// How far sync intervals stretch on this network.
    #[must_use]
    pub fn frequency_multiplier(&self) -> f64 {
        let base = match self.effective_type {
            EffectiveType::FourG => 1.0,
            EffectiveType::ThreeG => 1.5,
            EffectiveType::TwoG => 2.0,
            EffectiveType::Slow2g => 3.0,
        };
        if self.save_data { base * 2.0 } else { base }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub quality: NetworkQuality,
}

/// Shared connectivity state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(NetworkStatus {
            online,
            quality: NetworkQuality::default(),
        });
        Self { tx }
    }

    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    #[must_use]
    pub fn quality(&self) -> NetworkQuality {
        self.tx.borrow().quality
    }

    /// Record a connectivity transition. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            if status.online == online {
                false
            } else {
                status.online = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Record a new quality descriptor. Returns true if it changed.
    pub fn set_quality(&self, quality: NetworkQuality) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            if status.quality == quality {
                false
            } else {
                status.quality = quality;
                true
            }
        });
        if changed {
            info!(
                effective_type = %quality.effective_type,
                rtt_ms = quality.rtt_ms,
                save_data = quality.save_data,
                "Network quality changed"
            );
        }
        changed
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
