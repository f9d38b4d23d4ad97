use std::time::Duration;

use super::types::{WebSocketBufferConfig, WebSocketError, WebSocketResult, WsTlsConfig};

/// Window during which inbound activity rearms the ping/read timers at most once.
pub const DEFAULT_ACTIVITY_DEBOUNCE: Duration = Duration::from_millis(50);

/// Delay observed before a perpetual socket retries after a failed connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Overlap window between a new connection and the one it replaces.
pub const DEFAULT_SWITCH_DURATION: Duration = Duration::from_secs(3);

/// Per-connection supervision settings.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    /// Send a protocol ping after this long without inbound activity.
    pub ping_after: Duration,
    /// Force-close after this long without inbound activity.
    pub read_timeout: Duration,
    /// Force-close if the handler chain is not fully advanced this long after opening.
    pub init_timeout: Duration,
    /// Upper bound on establishing the transport.
    pub connect_timeout: Duration,
    pub activity_debounce: Duration,
    pub buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_after: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            activity_debounce: DEFAULT_ACTIVITY_DEBOUNCE,
            buffers: WebSocketBufferConfig::default(),
            tls: WsTlsConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> WebSocketResult<()> {
        if self.ping_after.is_zero() {
            return Err(WebSocketError::InvalidConfig(
                "ping_after must be positive".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(WebSocketError::InvalidConfig(
                "read_timeout must be positive".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(WebSocketError::InvalidConfig(
                "connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rotation policy of a perpetual socket.
#[derive(Clone, Copy, Debug)]
pub struct PerpetualConfig {
    /// How long a connection may serve as primary before a successor is started.
    pub shift_duration: Duration,
    /// How long superseded connections survive after their successor opens.
    pub switch_duration: Duration,
    pub reconnect_delay: Duration,
}

impl PerpetualConfig {
    pub fn new(shift_duration: Duration) -> Self {
        Self {
            shift_duration,
            switch_duration: DEFAULT_SWITCH_DURATION,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_switch_duration(mut self, switch_duration: Duration) -> Self {
        self.switch_duration = switch_duration;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    pub fn validate(&self) -> WebSocketResult<()> {
        if self.shift_duration.is_zero() {
            return Err(WebSocketError::InvalidConfig(
                "shift_duration must be positive".to_string(),
            ));
        }
        if self.switch_duration >= self.shift_duration {
            return Err(WebSocketError::InvalidConfig(format!(
                "switch_duration ({:?}) must be shorter than shift_duration ({:?})",
                self.switch_duration, self.shift_duration
            )));
        }
        Ok(())
    }
}
