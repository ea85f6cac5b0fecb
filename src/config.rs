//! Runtime configuration: compiled-in defaults, overridable by CLI flag
//! or environment variable.
//!
//! Layering matches the shape already used by this codebase's own
//! `Config` type (a `Default` impl for baked-in values, then an override
//! layer on top) — here the override layer is a `clap`-derived parser
//! with `env` fallbacks on every field, since this daemon has no
//! persisted config file of its own (the password file is the only
//! on-disk state, and it has its own lifecycle, per §4.5).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Every item in §6.6's configuration surface, settable by flag or by
/// environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "virtualpad-server")]
#[command(about = "Serves virtual game controllers to remote clients over the network")]
pub struct Config {
    /// TCP port the pad protocol listens on.
    #[arg(long, env = "HAWA_PAD_PORT", default_value_t = 2357)]
    pub pad_port: u16,

    /// TCP port the broadcast/notification server listens on.
    #[arg(long, env = "HAWA_BROADCAST_PORT", default_value_t = 2358)]
    pub broadcast_port: u16,

    /// Unix domain socket path the admin protocol listens on.
    #[arg(long, env = "HAWA_ADMIN_SOCKET", default_value = "/run/Hawa/admin.sock")]
    pub admin_socket_path: PathBuf,

    /// Group the admin socket is `chown`ed to.
    #[arg(long, env = "HAWA_ADMIN_GROUP", default_value = "hawa")]
    pub admin_group: String,

    /// Path to the persisted password file.
    #[arg(
        long,
        env = "HAWA_PASSWORD_FILE",
        default_value = "/etc/Hawa/virtualpad-server.conf"
    )]
    pub password_file: PathBuf,

    /// Number of controller slots.
    #[arg(long, env = "HAWA_SLOT_COUNT", default_value_t = 8)]
    pub slot_count: usize,

    /// Seconds a `RECENTLY_USED` slot retains its device before eviction.
    #[arg(long, env = "HAWA_SLOT_COOLDOWN_SECS", default_value_t = 5)]
    pub slot_cooldown_secs: u64,

    /// Seconds a pad connection may go without a PING before being timed out.
    #[arg(long, env = "HAWA_HEARTBEAT_INTERVAL_SECS", default_value_t = 5)]
    pub heartbeat_interval_secs: u64,

    /// Seconds between `SlotManager::heartbeat()` sweeps.
    #[arg(long, env = "HAWA_HEARTBEAT_SWEEP_INTERVAL_SECS", default_value_t = 1)]
    pub heartbeat_sweep_interval_secs: u64,
}

impl Config {
    pub fn slot_cooldown(&self) -> Duration {
        Duration::from_secs(self.slot_cooldown_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pad_port: 2357,
            broadcast_port: 2358,
            admin_socket_path: PathBuf::from("/run/Hawa/admin.sock"),
            admin_group: "hawa".to_string(),
            password_file: PathBuf::from("/etc/Hawa/virtualpad-server.conf"),
            slot_count: 8,
            slot_cooldown_secs: 5,
            heartbeat_interval_secs: 5,
            heartbeat_sweep_interval_secs: 1,
        }
    }
}
