use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::layout;

/// Capture session configuration.
///
/// Defaults reproduce the shader pack's protocol exactly: 100 ms source
/// polling, heartbeat value 60, request code 3, and no bound on either wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    #[serde(alias = "mappingName")]
    pub mapping_name: String,
    #[serde(alias = "aliveValue")]
    pub alive_value: u32,
    #[serde(alias = "requestCode")]
    pub request_code: u16,
    #[serde(alias = "idleCode")]
    pub idle_code: u16,
    #[serde(alias = "sourcePollIntervalMs")]
    pub source_poll_interval_ms: u64,
    /// `None` waits for a source forever.
    #[serde(alias = "sourceTimeoutMs")]
    pub source_timeout_ms: Option<u64>,
    #[serde(alias = "framePollIntervalMs")]
    pub frame_poll_interval_ms: u64,
    /// `None` waits for the producer's acknowledgment forever.
    #[serde(alias = "frameTimeoutMs")]
    pub frame_timeout_ms: Option<u64>,
    /// Recreate the staging texture when a rotated shared texture has a
    /// different description. `false` keeps the first staging texture for
    /// the whole session.
    #[serde(alias = "restageOnChange")]
    pub restage_on_change: bool,
    /// Prefer the selectable source with this exact name, if any.
    #[serde(alias = "preferredName")]
    pub preferred_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mapping_name: layout::DEFAULT_MAPPING_NAME.to_owned(),
            alive_value: layout::ALIVE_VALUE,
            request_code: layout::NEEDS_DATA_REQUEST,
            idle_code: layout::NEEDS_DATA_IDLE,
            source_poll_interval_ms: 100,
            source_timeout_ms: None,
            frame_poll_interval_ms: 1,
            frame_timeout_ms: None,
            restage_on_change: true,
            preferred_name: None,
        }
    }
}

impl CaptureConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| CaptureError::ConfigurationInvalid {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.mapping_name.is_empty() {
            return Err(CaptureError::ConfigurationInvalid {
                reason: "mapping_name is empty".into(),
            });
        }
        if self.request_code == self.idle_code {
            return Err(CaptureError::ConfigurationInvalid {
                reason: format!("request_code and idle_code are both {}", self.request_code),
            });
        }
        if self.source_poll_interval_ms == 0 || self.frame_poll_interval_ms == 0 {
            return Err(CaptureError::ConfigurationInvalid {
                reason: "poll intervals must be at least 1 ms".into(),
            });
        }
        Ok(())
    }

    pub fn source_poll_interval(&self) -> Duration {
        Duration::from_millis(self.source_poll_interval_ms)
    }

    pub fn source_timeout(&self) -> Option<Duration> {
        self.source_timeout_ms.map(Duration::from_millis)
    }

    pub fn frame_poll_interval(&self) -> Duration {
        Duration::from_millis(self.frame_poll_interval_ms)
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }
}
