use serde::Deserialize;

/// Top-level configuration for the hubbub broker process.
///
/// Aggregates the network settings for the session transport and admin
/// surface with the operational parameters of the broker kernel.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Bind locations and development switches for the server processes.
    pub server: ServerSettings,
    /// Operational parameters for the broker kernel.
    pub broker: BrokerSettings,
}

/// Network configuration for the server processes.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// The host address (e.g., "127.0.0.1" or "0.0.0.0") to bind to.
    pub host: String,
    /// The port the WebSocket session transport listens on.
    pub port: u16,
    /// The port the administrative HTTP surface listens on.
    pub admin_port: u16,
    /// Development flag: when set, 500 responses from the admin surface
    /// carry the underlying failure detail in the body.
    pub expose_errors: bool,
}

/// Operational parameters for the broker kernel.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Per-subscriber outbound queue capacity; governs when the
    /// backpressure policy triggers.
    pub max_queue_size: usize,
    /// Per-topic replay history capacity. A capacity of 0 disables replay.
    pub ring_buffer_size: usize,
    /// What to do with a subscriber whose outbound queue is full.
    pub backpressure_policy: BackpressurePolicy,
}

/// Policy applied when a subscriber's outbound queue is at capacity.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Discard the oldest queued frame and keep the subscriber connected.
    #[serde(rename = "DROP_OLDEST")]
    DropOldest,
    /// Send a final SLOW_CONSUMER error (best effort), close the transport
    /// with code 1008, and remove the subscriber.
    #[serde(rename = "DISCONNECT")]
    Disconnect,
}

/// Partial configuration loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

/// Partial server settings from external sources.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_port: Option<u16>,
    pub expose_errors: Option<bool>,
}

/// Partial broker settings from external sources.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_queue_size: Option<usize>,
    pub ring_buffer_size: Option<usize>,
    pub backpressure_policy: Option<BackpressurePolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                admin_port: 8081,
                expose_errors: false,
            },
            broker: BrokerSettings {
                max_queue_size: 1000,
                ring_buffer_size: 100,
                backpressure_policy: BackpressurePolicy::DropOldest,
            },
        }
    }
}
