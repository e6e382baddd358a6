use std::time::Duration;

/// Configuration for the broker link.
#[derive(Debug, Clone)]
pub struct BrokerLinkConfig {
    /// Primary broker WebSocket endpoint (host only, no scheme).
    pub endpoint: String,
    /// Optional fallback endpoint; connection attempts rotate between the
    /// two hosts.
    pub fallback_endpoint: Option<String>,
    /// Signing region for the broker endpoint.
    pub region: String,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Interval between heartbeat publishes once connected.
    pub heartbeat_interval: Duration,
    /// Base delay for exponential reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Capacity of the MQTT request channel.
    pub channel_capacity: usize,
}

impl Default for BrokerLinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            fallback_endpoint: None,
            region: "ap-southeast-1".to_string(),
            keep_alive: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(120),
            reconnect_base_delay: Duration::from_secs(5),
            channel_capacity: 100,
        }
    }
}

impl BrokerLinkConfig {
    /// Candidate broker hosts, primary first, deduplicated.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts = vec![self.endpoint.as_str()];
        if let Some(fallback) = self.fallback_endpoint.as_deref() {
            if fallback != self.endpoint && !fallback.is_empty() {
                hosts.push(fallback);
            }
        }
        hosts
    }
}
