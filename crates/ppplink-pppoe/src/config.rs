//! Discovery configuration

use ppplink_proto::{Tag, TagType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PPPoE discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PppoeConfig {
    /// Requested service; empty means any service
    pub service_name: String,
    /// Extra tags sent in PADI and PADR, in order
    pub tags: Vec<Tag>,
    /// How long each attempt waits for PADO/PADS
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Attempts per discovery stage
    pub retry: u32,
}

/// Helper module for serializing Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for PppoeConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            tags: Vec::new(),
            timeout: Duration::from_secs(3),
            retry: 3,
        }
    }
}

impl PppoeConfig {
    pub fn builder() -> PppoeConfigBuilder {
        PppoeConfigBuilder::default()
    }

    /// Configured tags minus any Service-Name, which is always sent from
    /// `service_name`
    pub fn extra_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags
            .iter()
            .filter(|t| t.tag_type != TagType::SERVICE_NAME)
    }
}

/// Builder for PppoeConfig
#[derive(Default)]
pub struct PppoeConfigBuilder {
    config: PppoeConfig,
}

impl PppoeConfigBuilder {
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Add a tag. A Service-Name tag replaces the service name.
    pub fn tag(mut self, tag: Tag) -> Self {
        if tag.tag_type == TagType::SERVICE_NAME {
            self.config.service_name = tag.as_str().unwrap_or_default().to_string();
        } else {
            self.config.tags.push(tag);
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> Result<PppoeConfig, String> {
        if self.config.retry == 0 {
            return Err("retry must be at least 1".to_string());
        }
        if self.config.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        Ok(self.config)
    }
}
