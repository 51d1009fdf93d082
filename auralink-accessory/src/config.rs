//! CLI flags and optional TOML config file, in `bark::config`'s style:
//! an optional file is read first and exported into the process
//! environment, then `structopt` parses flags (with `env` fallbacks),
//! so an explicit flag always wins over the file and the file always
//! wins over not setting anything at all.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use structopt::StructOpt;

use auralink_protocol::types::DEFAULT_ACCESSORY_PORT;

#[derive(StructOpt, Debug, Clone)]
pub struct AccessoryOpt {
    /// Address to bind the accessory's UDP socket to.
    #[structopt(long, env = "AURALINK_BIND", default_value = "0.0.0.0:8888")]
    pub bind: SocketAddr,
}

impl Default for AccessoryOpt {
    fn default() -> Self {
        AccessoryOpt {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_ACCESSORY_PORT)),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct FileConfig {
    bind: Option<SocketAddr>,
}

fn set_env_option<T: ToString>(name: &str, value: Option<T>) {
    if let Some(value) = value {
        std::env::set_var(name, value.to_string());
    }
}

pub fn load_into_env(config: &FileConfig) {
    set_env_option("AURALINK_BIND", config.bind);
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
    if let Some(config) = load_file(Path::new("auralink-accessory.toml")) {
        return Some(config);
    }

    let dirs = xdg::BaseDirectories::new().ok()?;
    if let Some(path) = dirs.find_config_file("auralink-accessory.toml") {
        return load_file(&path);
    }

    None
}
