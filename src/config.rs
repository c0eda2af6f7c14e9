//! Pool configuration resolved through the `config` crate.
//!
//! All keys are read once at construction. Lookup follows namespacing
//! priority: `{name}.{key}`, then `{key}`, then the hard-coded default, so
//! several pools in one process can be configured independently.

use ::config::Config;

fn get_namespaced_value<T, F>(config: &Config, name: &str, key: &str, getter: F) -> Option<T>
where
    F: Fn(&Config, &str) -> Result<T, ::config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key).ok()
    } else {
        getter(config, &format!("{name}.{key}"))
            .or_else(|_| getter(config, key))
            .ok()
    }
}

fn get_bool(config: &Config, name: &str, key: &str) -> Option<bool> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

fn get_u64(config: &Config, name: &str, key: &str) -> Option<u64> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key))
}

fn get_u32(config: &Config, name: &str, key: &str) -> Option<u32> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u32>(key))
}

/// Resolved pool settings.
///
/// | Key | Default | Meaning |
/// |-----|---------|---------|
/// | `tcp_enable_nodelay` | `true` | Disable Nagle on every stream |
/// | `tcp_enable_keepalive` | `true` | Enable TCP keepalive probes |
/// | `tcp_keepalive_time_seconds` | `30` | Keepalive idle time |
/// | `tcp_backlog` | `128` | Listen backlog |
/// | `tcp_send_buffer_size` | `0` | Socket send buffer, `0` = OS default |
/// | `tcp_recv_buffer_size` | `0` | Socket recv buffer, `0` = OS default |
/// | `tcp_connect_timeout_seconds` | `10` | Connect deadline |
/// | `tcp_idle_timeout_seconds` | `30` | Idle deadline |
/// | `tcp_send_timeout_seconds` | `30` | Send-drain deadline |
/// | `udp_ttl` | `0` | Datagram TTL, `0` = OS default |
///
/// Buffer sizes are a preference; the OS may round them (Linux doubles the
/// requested value).
#[derive(Debug, Clone)]
pub struct Settings {
    pub tcp_enable_nodelay: bool,
    pub tcp_enable_keepalive: bool,
    pub tcp_keepalive_time_seconds: u64,
    pub tcp_backlog: u32,
    pub tcp_send_buffer_size: usize,
    pub tcp_recv_buffer_size: usize,
    pub tcp_connect_timeout_seconds: u64,
    pub tcp_idle_timeout_seconds: u64,
    pub tcp_send_timeout_seconds: u64,
    pub udp_ttl: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tcp_enable_nodelay: true,
            tcp_enable_keepalive: true,
            tcp_keepalive_time_seconds: 30,
            tcp_backlog: 128,
            tcp_send_buffer_size: 0,
            tcp_recv_buffer_size: 0,
            tcp_connect_timeout_seconds: 10,
            tcp_idle_timeout_seconds: 30,
            tcp_send_timeout_seconds: 30,
            udp_ttl: 0,
        }
    }
}

impl Settings {
    /// Resolves settings from a configuration, without namespacing.
    pub fn from_config(config: &Config) -> Self {
        Self::from_config_named(config, "")
    }

    /// Resolves settings from a configuration with `{name}.{key}` priority.
    pub fn from_config_named(config: &Config, name: &str) -> Self {
        let defaults = Self::default();
        Self {
            tcp_enable_nodelay: get_bool(config, name, "tcp_enable_nodelay")
                .unwrap_or(defaults.tcp_enable_nodelay),
            tcp_enable_keepalive: get_bool(config, name, "tcp_enable_keepalive")
                .unwrap_or(defaults.tcp_enable_keepalive),
            tcp_keepalive_time_seconds: get_u64(config, name, "tcp_keepalive_time_seconds")
                .unwrap_or(defaults.tcp_keepalive_time_seconds),
            tcp_backlog: get_u32(config, name, "tcp_backlog").unwrap_or(defaults.tcp_backlog),
            tcp_send_buffer_size: get_u64(config, name, "tcp_send_buffer_size")
                .map(|v| v as usize)
                .unwrap_or(defaults.tcp_send_buffer_size),
            tcp_recv_buffer_size: get_u64(config, name, "tcp_recv_buffer_size")
                .map(|v| v as usize)
                .unwrap_or(defaults.tcp_recv_buffer_size),
            tcp_connect_timeout_seconds: get_u64(config, name, "tcp_connect_timeout_seconds")
                .unwrap_or(defaults.tcp_connect_timeout_seconds),
            tcp_idle_timeout_seconds: get_u64(config, name, "tcp_idle_timeout_seconds")
                .unwrap_or(defaults.tcp_idle_timeout_seconds),
            tcp_send_timeout_seconds: get_u64(config, name, "tcp_send_timeout_seconds")
                .unwrap_or(defaults.tcp_send_timeout_seconds),
            udp_ttl: get_u32(config, name, "udp_ttl").unwrap_or(defaults.udp_ttl),
        }
    }
}
