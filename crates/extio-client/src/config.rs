//! Client configuration.
//!
//! A TOML file colocated with the shim. Every key is optional; defaults
//! match the server's defaults so a bare file (or none at all) talks to a
//! local server.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// File name looked up next to the shim binary and in the working
/// directory; `EXTIO_OVER_NET_CONFIG` overrides the search entirely.
pub const CLIENT_CONFIG_FILE: &str = "extio_over_net_client.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    pub server_port: u16,
    /// 0 = trace … 4 = error, 5 = off.
    pub log_level: u8,
    /// Delay before a reconnect attempt after a lost connection.
    pub reconnect_delay_ms: u64,
    /// Bound on individual handshake round trips.
    pub io_timeout_ms: u64,
    /// How long a facade call waits for the session to become ready.
    pub connect_wait_ms: u64,
    /// How long `Stop` waits for an orderly shutdown.
    pub stop_wait_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "localhost".into(),
            server_port: 2056,
            log_level: 4,
            reconnect_delay_ms: 8_000,
            io_timeout_ms: 10_000,
            connect_wait_ms: 30_000,
            stop_wait_ms: 20_000,
        }
    }
}

impl ClientConfig {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read a config file; any problem logs a warning and yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match Self::parse(&text) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), %e, "bad config file, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), %e, "config file not readable, using defaults");
                Self::default()
            }
        }
    }

    /// Locate and read the config: `EXTIO_OVER_NET_CONFIG` first, then next
    /// to the running binary, then the working directory.
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("EXTIO_OVER_NET_CONFIG") {
            return Self::load(Path::new(&path));
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join(CLIENT_CONFIG_FILE);
                if candidate.exists() {
                    return Self::load(&candidate);
                }
            }
        }
        let cwd = Path::new(CLIENT_CONFIG_FILE);
        if cwd.exists() {
            return Self::load(cwd);
        }
        Self::default()
    }
}
