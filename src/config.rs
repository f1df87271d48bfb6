//! Configuration for connecting to a PHD2 instance.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration: where PHD2 is and the settle parameters used
/// when no per-call override is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub phd2: Phd2Config,
    #[serde(default)]
    pub settling: SettleParams,
}

/// PHD2 connection settings. `instance` selects the PHD2 instance per
/// spec's `port = 4400 + (instance - 1)` addressing scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phd2Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_instance")]
    pub instance: u16,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
}

impl Phd2Config {
    /// The TCP port this instance listens on.
    pub fn port(&self) -> u16 {
        4400 + self.instance - 1
    }
}

impl Default for Phd2Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            instance: default_instance(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            command_timeout_seconds: default_command_timeout_seconds(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_instance() -> u16 {
    1
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_command_timeout_seconds() -> u64 {
    30
}

/// Default settle parameters for `Guide`/`Dither` when a caller doesn't
/// supply its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleParams {
    #[serde(default = "default_settle_pixels")]
    pub pixels: f64,
    #[serde(default = "default_settle_time")]
    pub time: f64,
    #[serde(default = "default_settle_timeout")]
    pub timeout: f64,
}

impl Default for SettleParams {
    fn default() -> Self {
        Self {
            pixels: default_settle_pixels(),
            time: default_settle_time(),
            timeout: default_settle_timeout(),
        }
    }
}

fn default_settle_pixels() -> f64 {
    0.5
}

fn default_settle_time() -> f64 {
    10.0
}

fn default_settle_timeout() -> f64 {
    60.0
}

/// Load configuration from a JSON file. This is a CLI concern; the
/// library's own entry point (`Session::connect`) takes a `Phd2Config`
/// value directly.
pub fn load_config(path: &Path) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_instance_maps_to_port_4400() {
        let cfg = Phd2Config::default();
        assert_eq!(cfg.port(), 4400);
    }

    #[test]
    fn instance_two_maps_to_port_4401() {
        let cfg = Phd2Config {
            instance: 2,
            ..Phd2Config::default()
        };
        assert_eq!(cfg.port(), 4401);
    }

    #[test]
    fn load_config_parses_json() {
        let dir = std::env::temp_dir();
        let path = dir.join("phd2_client_test_config.json");
        std::fs::write(
            &path,
            r#"{"phd2":{"host":"example.org","instance":3}}"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.phd2.host, "example.org");
        assert_eq!(config.phd2.port(), 4402);
        let _ = std::fs::remove_file(&path);
    }
}
