//! CLI flags and optional TOML config file, mirroring
//! `auralink-accessory`'s `config` module: a file is read first and
//! exported into the process environment, then `structopt` parses
//! flags (with `env` fallbacks), so an explicit flag wins over the
//! file and the file wins over doing nothing at all.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone)]
pub struct HostOpt {
    /// Address to bind the host's UDP socket to.
    #[structopt(long, env = "AURALINK_HOST_BIND", default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    /// Where to send `DISCOVER_REQUEST` broadcasts.
    #[structopt(
        long,
        env = "AURALINK_DISCOVERY_TARGET",
        default_value = "255.255.255.255:8888"
    )]
    pub discovery_target: SocketAddr,

    /// Connect to the first discovered accessory automatically, rather
    /// than waiting for an operator to drive pairing/connect.
    #[structopt(long, env = "AURALINK_AUTO_CONNECT")]
    pub auto_connect: bool,
}

impl Default for HostOpt {
    fn default() -> Self {
        HostOpt {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            discovery_target: SocketAddr::from(([255, 255, 255, 255], 8888)),
            auto_connect: false,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct FileConfig {
    bind: Option<SocketAddr>,
    discovery_target: Option<SocketAddr>,
    auto_connect: Option<bool>,
}

fn set_env_option<T: ToString>(name: &str, value: Option<T>) {
    if let Some(value) = value {
        std::env::set_var(name, value.to_string());
    }
}

pub fn load_into_env(config: &FileConfig) {
    set_env_option("AURALINK_HOST_BIND", config.bind);
    set_env_option("AURALINK_DISCOVERY_TARGET", config.discovery_target);
    set_env_option("AURALINK_AUTO_CONNECT", config.auto_connect);
}

fn load_file(path: &Path) -> Option<FileConfig> {
    log::debug!("looking for config in {}", path.display());
    let contents = std::fs::read_to_string(path).ok()?;

    match toml::from_str(&contents) {
        Ok(config) => {
            log::info!("reading config from {}", path.display());
            Some(config)
        }
        Err(e) => {
            log::error!("error reading config: {e}");
            std::process::exit(1);
        }
    }
}

pub fn read() -> Option<FileConfig> {
    if let Some(config) = load_file(Path::new("auralink-host.toml")) {
        return Some(config);
    }

    let dirs = xdg::BaseDirectories::new().ok()?;
    if let Some(path) = dirs.find_config_file("auralink-host.toml") {
        return load_file(&path);
    }

    None
}
