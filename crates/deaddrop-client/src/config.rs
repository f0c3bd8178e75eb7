//! Delivery service configuration loaded from environment variables.
//!
//! All settings have defaults, so services can start with zero configuration.

use std::time::Duration;

use deaddrop_shared::constants::{
    DEFAULT_BEAT_INTERVAL_SECS, DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_NOTIFY_CAPACITY,
    DEFAULT_RECV_INTERVAL_SECS, DEFAULT_SEND_INTERVAL_SECS,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause between offline send cycles.
    /// Env: `DEADDROP_SEND_INTERVAL_SECS`
    /// Default: 10 s
    pub send_interval: Duration,

    /// Pause between offline receive cycles.
    /// Env: `DEADDROP_RECV_INTERVAL_SECS`
    /// Default: 15 s
    pub recv_interval: Duration,

    /// Pause between heartbeat publications.
    /// Env: `DEADDROP_BEAT_INTERVAL_SECS`
    /// Default: 30 s
    pub beat_interval: Duration,

    /// Pause between heartbeat monitor cycles.
    /// Env: `DEADDROP_MONITOR_INTERVAL_SECS`
    /// Default: 30 s
    pub monitor_interval: Duration,

    /// Whether heartbeats are sealed to each contact's key.
    /// Env: `DEADDROP_ENCRYPTION` (true/false)
    /// Default: `true`
    pub encryption: bool,

    /// Buffer size of each notification channel.
    pub notify_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_secs(DEFAULT_SEND_INTERVAL_SECS),
            recv_interval: Duration::from_secs(DEFAULT_RECV_INTERVAL_SECS),
            beat_interval: Duration::from_secs(DEFAULT_BEAT_INTERVAL_SECS),
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            encryption: true,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(d) = secs_from_env("DEADDROP_SEND_INTERVAL_SECS") {
            config.send_interval = d;
        }
        if let Some(d) = secs_from_env("DEADDROP_RECV_INTERVAL_SECS") {
            config.recv_interval = d;
        }
        if let Some(d) = secs_from_env("DEADDROP_BEAT_INTERVAL_SECS") {
            config.beat_interval = d;
        }
        if let Some(d) = secs_from_env("DEADDROP_MONITOR_INTERVAL_SECS") {
            config.monitor_interval = d;
        }

        if let Ok(val) = std::env::var("DEADDROP_ENCRYPTION") {
            config.encryption = parse_flag(&val);
        }

        config
    }
}

fn secs_from_env(name: &str) -> Option<Duration> {
    let val = std::env::var(name).ok()?;
    match parse_secs(&val) {
        Some(d) => Some(d),
        None => {
            tracing::warn!(var = name, value = %val, "Invalid interval, using default");
            None
        }
    }
}

/// Parse a positive number of seconds.
fn parse_secs(val: &str) -> Option<Duration> {
    match val.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(Duration::from_secs(n)),
        _ => None,
    }
}

/// Parse a boolean switch: anything but `false` or `0` is on.
pub fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0"
}
