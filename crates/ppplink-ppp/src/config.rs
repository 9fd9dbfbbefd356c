//! Multiplexer configuration

use ppplink_proto::MAX_PPP_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PPP multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PppConfig {
    /// Capacity of the send channel shared by all protocols
    pub send_queue_depth: usize,
    /// Capacity of each protocol's receive channel
    pub recv_queue_depth: usize,
    /// Largest frame the receive loop will read
    pub max_frame_size: usize,
    /// Read deadline used to revisit cancellation
    #[serde(with = "duration_millis")]
    pub read_poll_interval: Duration,
    #[serde(with = "duration_millis")]
    pub write_timeout: Duration,
    /// Upper bound on concurrently running dispatches for frames no receiver
    /// queued. Once reached the receive loop waits for one to finish.
    pub max_in_flight: usize,
    /// Frames queued per protocol waiting for room in its receive channel.
    /// Frames past this limit are dropped.
    pub max_pending: usize,
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

impl Default for PppConfig {
    fn default() -> Self {
        Self {
            send_queue_depth: 128,
            recv_queue_depth: 128,
            max_frame_size: MAX_PPP_FRAME_SIZE,
            read_poll_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            max_in_flight: 256,
            max_pending: 64,
        }
    }
}

impl PppConfig {
    pub fn builder() -> PppConfigBuilder {
        PppConfigBuilder::default()
    }
}

/// Builder for PppConfig
#[derive(Default)]
pub struct PppConfigBuilder {
    config: PppConfig,
}

impl PppConfigBuilder {
    pub fn send_queue_depth(mut self, depth: usize) -> Self {
        self.config.send_queue_depth = depth;
        self
    }

    pub fn recv_queue_depth(mut self, depth: usize) -> Self {
        self.config.recv_queue_depth = depth;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn read_poll_interval(mut self, interval: Duration) -> Self {
        self.config.read_poll_interval = interval;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.config.max_in_flight = limit;
        self
    }

    pub fn max_pending(mut self, limit: usize) -> Self {
        self.config.max_pending = limit;
        self
    }

    pub fn build(self) -> Result<PppConfig, String> {
        if self.config.send_queue_depth == 0 || self.config.recv_queue_depth == 0 {
            return Err("queue depths must be at least 1".to_string());
        }
        if self.config.max_frame_size < 2 {
            return Err("max_frame_size must fit a protocol number".to_string());
        }
        if self.config.read_poll_interval.is_zero() {
            return Err("read_poll_interval must be greater than zero".to_string());
        }
        if self.config.max_in_flight == 0 {
            return Err("max_in_flight must be at least 1".to_string());
        }
        if self.config.max_pending == 0 {
            return Err("max_pending must be at least 1".to_string());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PppConfig::default();
        assert_eq!(config.send_queue_depth, 128);
        assert_eq!(config.recv_queue_depth, 128);
        assert_eq!(config.max_frame_size, 1500);
        assert_eq!(config.read_poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_in_flight, 256);
        assert_eq!(config.max_pending, 64);
    }

    #[test]
    fn test_builder_validation() {
        assert!(PppConfig::builder().recv_queue_depth(0).build().is_err());
        assert!(PppConfig::builder().max_frame_size(1).build().is_err());
        assert!(PppConfig::builder().max_in_flight(0).build().is_err());
        assert!(PppConfig::builder().max_pending(0).build().is_err());

        let config = PppConfig::builder()
            .recv_queue_depth(4)
            .read_poll_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        assert_eq!(config.recv_queue_depth, 4);
        assert_eq!(config.read_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json() {
        let config: PppConfig = serde_json::from_str(r#"{"max_in_flight": 8}"#).unwrap();
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.send_queue_depth, 128);
    }
}
