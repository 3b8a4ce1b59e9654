use std::time::Duration;

use secsprims_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Which side opens the TCP connection and sends Select.req.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Connects out and initiates the Select handshake.
    #[default]
    Active,
    /// Accepts and waits for Select.req.
    Passive,
}

/// Session timers and limits. Defaults follow the HSMS standard values.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device id stamped on outgoing primaries and expected on incoming ones.
    pub device_id: u16,
    pub mode: ConnectionMode,
    /// T3: reply timeout, measured from send.
    pub t3_reply: Duration,
    /// T5: pause between connect attempts.
    pub t5_connect_separation: Duration,
    /// T6: control transaction timeout.
    pub t6_control: Duration,
    /// T7: time a passive side waits for Select.req after accept.
    pub t7_not_selected: Duration,
    /// T8: maximum gap between bytes of one message.
    pub t8_network: Duration,
    /// Per-attempt TCP connect timeout.
    pub connect_timeout: Duration,
    /// Extra connect attempts after the first one fails.
    pub connect_retries: u32,
    /// Periodic Linktest while selected; `None` disables it.
    pub linktest_interval: Option<Duration>,
    /// Largest accepted message length (header + body), both directions.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            mode: ConnectionMode::Active,
            t3_reply: Duration::from_secs(45),
            t5_connect_separation: Duration::from_secs(10),
            t6_control: Duration::from_secs(5),
            t7_not_selected: Duration::from_secs(10),
            t8_network: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            connect_retries: 0,
            linktest_interval: None,
            max_message_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl SessionConfig {
    /// Defaults with passive mode.
    pub fn passive() -> Self {
        Self {
            mode: ConnectionMode::Passive,
            ..Self::default()
        }
    }

    /// Frame limits used while selecting: reads bounded by `select_timeout`.
    pub(crate) fn select_frame_config(&self, select_timeout: Duration) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_message_size,
            read_timeout: Some(select_timeout),
            write_timeout: Some(self.t8_network),
        }
    }

    /// Timeout for the select handshake in this config's mode.
    pub(crate) fn select_timeout(&self) -> Duration {
        match self.mode {
            ConnectionMode::Active => self.t6_control,
            ConnectionMode::Passive => self.t7_not_selected,
        }
    }
}
