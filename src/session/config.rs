//! Session configuration.
//!
//! Everything is fixed when the session opens. Options can be set through
//! [`SessionConfigBuilder`] or read from `HUDP_*` environment variables:
//!
//! - `HUDP_ROLE`: `sender` or `receiver`
//! - `HUDP_LOCAL_ADDR`: bind address (default `0.0.0.0:0`)
//! - `HUDP_REMOTE_ADDR`: peer address (sender only)
//! - `HUDP_RETRANSMIT_MS`: sender retransmission interval
//! - `HUDP_SKIP_TIMEOUT_MS`: receiver skip timeout
//! - `HUDP_WINDOW`: window capacity
//! - `HUDP_MAX_RETRANSMITS`: give up after this many retries (unset = never)
//! - `HUDP_LOG_LEVEL`: trace|debug|info|warn|error
//! - `HUDP_TRACKING_DIR`: directory for the JSONL tracking logs

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Level, warn};

use crate::core::{
    ConfigError, DEFAULT_DELIVERY_QUEUE_CAPACITY, DEFAULT_RECV_BUFFER_SIZE,
    DEFAULT_RETRANSMIT_INTERVAL, DEFAULT_SKIP_TIMEOUT, DEFAULT_WINDOW_CAPACITY,
    MAX_DATAGRAM_SIZE, MAX_WINDOW_CAPACITY,
};
use crate::reliable::{ReceiverConfig, SenderConfig};

/// Which half of the exchange a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends payloads to a fixed remote address.
    #[default]
    Sender,
    /// Receives payloads and acknowledges reliable ones.
    Receiver,
}

impl Role {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            _ => Err(ConfigError::InvalidValue {
                key: "role",
                value: s.to_string(),
            }),
        }
    }
}

/// What `send` does on the reliable channel when the window is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFullPolicy {
    /// Fail immediately with `HudpError::WindowFull`.
    #[default]
    Reject,
    /// Wait until an acknowledgment frees a slot.
    Wait,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sender or receiver.
    pub role: Role,

    /// Address to bind the socket to.
    pub local_addr: SocketAddr,

    /// Peer address (required for the sender role).
    pub remote_addr: Option<SocketAddr>,

    /// Sender retransmission interval.
    pub retransmit_interval: Duration,

    /// Receiver skip timeout.
    pub skip_timeout: Duration,

    /// Send and receive window capacity.
    pub window_capacity: u16,

    /// Retransmissions before a reliable packet is abandoned.
    pub max_retransmits: Option<u32>,

    /// Reliable `send` behaviour on a full window.
    pub window_full_policy: WindowFullPolicy,

    /// Payloads buffered for `receive` before the receive loop waits.
    pub delivery_queue_capacity: usize,

    /// Socket receive buffer size.
    pub recv_buffer_size: usize,

    /// Where tracking logs are flushed (disabled when `None`).
    pub tracking_dir: Option<PathBuf>,

    /// Install a fmt subscriber at this level when the session opens.
    pub log_level: Option<Level>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Sender,
            local_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            remote_addr: None,
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            skip_timeout: DEFAULT_SKIP_TIMEOUT,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_retransmits: None,
            window_full_policy: WindowFullPolicy::Reject,
            delivery_queue_capacity: DEFAULT_DELIVERY_QUEUE_CAPACITY,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            tracking_dir: None,
            log_level: None,
        }
    }
}

impl SessionConfig {
    /// Start a builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Read `HUDP_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `HUDP_*` variables through `lookup`; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("HUDP_ROLE") {
            config.role = value.parse()?;
        }
        if let Some(value) = lookup("HUDP_LOCAL_ADDR") {
            config.local_addr = parse("local_addr", &value)?;
        }
        if let Some(value) = lookup("HUDP_REMOTE_ADDR") {
            config.remote_addr = Some(parse("remote_addr", &value)?);
        }
        if let Some(value) = lookup("HUDP_RETRANSMIT_MS") {
            config.retransmit_interval =
                Duration::from_millis(parse("retransmit_interval", &value)?);
        }
        if let Some(value) = lookup("HUDP_SKIP_TIMEOUT_MS") {
            config.skip_timeout = Duration::from_millis(parse("skip_timeout", &value)?);
        }
        if let Some(value) = lookup("HUDP_WINDOW") {
            let window: u32 = parse("window_capacity", &value)?;
            config.window_capacity = u16::try_from(window)
                .ok()
                .filter(|w| (1..=MAX_WINDOW_CAPACITY).contains(w))
                .ok_or(ConfigError::InvalidWindow(window))?;
        }
        if let Some(value) = lookup("HUDP_MAX_RETRANSMITS") {
            config.max_retransmits = Some(parse("max_retransmits", &value)?);
        }
        if let Some(value) = lookup("HUDP_LOG_LEVEL") {
            config.log_level = Some(parse("log_level", &value)?);
        }
        if let Some(value) = lookup("HUDP_TRACKING_DIR") {
            config.tracking_dir = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// Check option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role == Role::Sender && self.remote_addr.is_none() {
            return Err(ConfigError::MissingRemote);
        }
        if !(1..=MAX_WINDOW_CAPACITY).contains(&self.window_capacity) {
            return Err(ConfigError::InvalidWindow(u32::from(self.window_capacity)));
        }
        if self.retransmit_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("retransmit_interval"));
        }
        if self.skip_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("skip_timeout"));
        }
        if self.delivery_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.recv_buffer_size < MAX_DATAGRAM_SIZE {
            return Err(ConfigError::RecvBufferTooSmall(self.recv_buffer_size));
        }

        if self.skip_timeout <= self.retransmit_interval * 2 {
            warn!(
                skip_timeout_ms = self.skip_timeout.as_millis() as u64,
                retransmit_ms = self.retransmit_interval.as_millis() as u64,
                "skip timeout does not cover a retransmission round trip; gaps may be skipped before a retry lands"
            );
        }

        Ok(())
    }

    /// Send-side window settings.
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            capacity: self.window_capacity,
            retransmit_interval: self.retransmit_interval,
            max_retransmits: self.max_retransmits,
        }
    }

    /// Receive-side window settings.
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            capacity: self.window_capacity,
            skip_timeout: self.skip_timeout,
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a sender that talks to `remote`.
    pub fn sender(mut self, remote: SocketAddr) -> Self {
        self.config.role = Role::Sender;
        self.config.remote_addr = Some(remote);
        self
    }

    /// Configure a receiver.
    pub fn receiver(mut self) -> Self {
        self.config.role = Role::Receiver;
        self
    }

    /// Set the role.
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the bind address.
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.config.local_addr = addr;
        self
    }

    /// Set the peer address.
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.config.remote_addr = Some(addr);
        self
    }

    /// Set the retransmission interval.
    pub fn retransmit_interval(mut self, interval: Duration) -> Self {
        self.config.retransmit_interval = interval;
        self
    }

    /// Set the skip timeout.
    pub fn skip_timeout(mut self, timeout: Duration) -> Self {
        self.config.skip_timeout = timeout;
        self
    }

    /// Set the window capacity.
    pub fn window_capacity(mut self, capacity: u16) -> Self {
        self.config.window_capacity = capacity;
        self
    }

    /// Abandon reliable packets after `max` retransmissions.
    pub fn max_retransmits(mut self, max: u32) -> Self {
        self.config.max_retransmits = Some(max);
        self
    }

    /// Set the full-window policy.
    pub fn window_full_policy(mut self, policy: WindowFullPolicy) -> Self {
        self.config.window_full_policy = policy;
        self
    }

    /// Set the delivery queue capacity.
    pub fn delivery_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.delivery_queue_capacity = capacity;
        self
    }

    /// Set the socket receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Flush tracking logs to `dir`.
    pub fn tracking_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tracking_dir = Some(dir.into());
        self
    }

    /// Install a fmt subscriber at `level` on open.
    pub fn log_level(mut self, level: Level) -> Self {
        self.config.log_level = Some(level);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.retransmit_interval, Duration::from_millis(200));
        assert_eq!(config.skip_timeout, Duration::from_millis(450));
        assert_eq!(config.window_capacity, 32);
        assert_eq!(config.max_retransmits, None);
        assert_eq!(config.window_full_policy, WindowFullPolicy::Reject);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_builder() {
        let remote: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let config = SessionConfig::builder()
            .sender(remote)
            .retransmit_interval(Duration::from_millis(50))
            .window_capacity(8)
            .max_retransmits(3)
            .window_full_policy(WindowFullPolicy::Wait)
            .build();

        assert_eq!(config.role, Role::Sender);
        assert_eq!(config.remote_addr, Some(remote));
        assert_eq!(config.sender_config().capacity, 8);
        assert_eq!(config.sender_config().max_retransmits, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        assert_eq!(
            SessionConfig::default().validate(),
            Err(ConfigError::MissingRemote)
        );

        let receiver = SessionConfig::builder().receiver();
        assert!(receiver.build().validate().is_ok());

        let config = SessionConfig::builder().receiver().window_capacity(0).build();
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindow(0)));

        let config = SessionConfig::builder()
            .receiver()
            .skip_timeout(Duration::ZERO)
            .build();
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("skip_timeout"))
        );

        let config = SessionConfig::builder()
            .receiver()
            .delivery_queue_capacity(0)
            .build();
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));

        let config = SessionConfig::builder().receiver().recv_buffer_size(64).build();
        assert_eq!(config.validate(), Err(ConfigError::RecvBufferTooSmall(64)));
    }

    #[test]
    fn test_short_skip_timeout_is_only_a_warning() {
        let config = SessionConfig::builder()
            .receiver()
            .retransmit_interval(Duration::from_millis(200))
            .skip_timeout(Duration::from_millis(300))
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("HUDP_ROLE", "Receiver"),
            ("HUDP_LOCAL_ADDR", "127.0.0.1:12345"),
            ("HUDP_RETRANSMIT_MS", "100"),
            ("HUDP_SKIP_TIMEOUT_MS", "300"),
            ("HUDP_WINDOW", "64"),
            ("HUDP_MAX_RETRANSMITS", "5"),
            ("HUDP_LOG_LEVEL", "debug"),
            ("HUDP_TRACKING_DIR", "/tmp/hudp"),
        ]))
        .unwrap();

        assert_eq!(config.role, Role::Receiver);
        assert_eq!(config.local_addr, "127.0.0.1:12345".parse().unwrap());
        assert_eq!(config.retransmit_interval, Duration::from_millis(100));
        assert_eq!(config.skip_timeout, Duration::from_millis(300));
        assert_eq!(config.window_capacity, 64);
        assert_eq!(config.max_retransmits, Some(5));
        assert_eq!(config.log_level, Some(Level::DEBUG));
        assert_eq!(config.tracking_dir, Some(PathBuf::from("/tmp/hudp")));
    }

    #[test]
    fn test_from_lookup_errors() {
        let err = SessionConfig::from_lookup(lookup(&[("HUDP_ROLE", "relay")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "role", .. }));

        let err = SessionConfig::from_lookup(lookup(&[("HUDP_WINDOW", "40000")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidWindow(40000));

        let err =
            SessionConfig::from_lookup(lookup(&[("HUDP_RETRANSMIT_MS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "retransmit_interval",
                ..
            }
        ));
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = SessionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.role, Role::Sender);
        assert_eq!(config.window_capacity, DEFAULT_WINDOW_CAPACITY);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("sender".parse::<Role>().unwrap(), Role::Sender);
        assert_eq!(" RECEIVER ".parse::<Role>().unwrap(), Role::Receiver);
        assert_eq!(Role::Receiver.to_string(), "receiver");
    }
}
