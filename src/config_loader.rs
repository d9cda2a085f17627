//! Settings loader for stage_tuner.
//!
//! Single source of truth: stage_tuner.yaml, keyed by OS section and then by
//! hostname. Serial port and baud rate may be overridden from the
//! environment (a `.env` file is honored via dotenvy).

use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

use crate::schema::ProtocolVersion;
use crate::transport::{SerialOpener, DEFAULT_BAUD_RATE};

const OS_SECTIONS: [&str; 3] = ["RaspberryPi", "Ubuntu", "macOS"];

#[derive(Debug, Clone, PartialEq)]
pub struct TunerSettings {
    pub port: String,
    pub baud_rate: u32,
    pub protocol: ProtocolVersion,
    pub stage_file: PathBuf,
    pub globals_file: PathBuf,
    pub settle_ms: u64,
}

impl TunerSettings {
    pub fn serial_opener(&self) -> SerialOpener {
        let mut opener = SerialOpener::new(self.port.clone(), self.baud_rate);
        opener.settle = Duration::from_millis(self.settle_ms);
        opener
    }
}

/// Default settings file: stage_tuner.yaml next to Cargo.toml.
pub fn default_settings_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("stage_tuner.yaml")
}

fn find_host_block<'a>(yaml: &'a serde_yaml::Value, hostname: &str) -> Option<&'a serde_yaml::Mapping> {
    for os_key in OS_SECTIONS.iter() {
        if let Some(os_map) = yaml.get(*os_key).and_then(|v| v.as_mapping()) {
            for (k, v) in os_map.iter() {
                if k.as_str() == Some(hostname) {
                    return v.as_mapping();
                }
            }
        }
    }
    None
}

fn get<'a>(block: &'a serde_yaml::Mapping, key: &str) -> Option<&'a serde_yaml::Value> {
    block.get(&serde_yaml::Value::from(key)).filter(|v| !v.is_null())
}

/// Parse settings for `hostname`. Relative file paths resolve against `base_dir`.
/// Fails loudly if TUNER_PORT is missing or a value has the wrong type.
pub fn parse_tuner_settings(yaml: &serde_yaml::Value, hostname: &str, base_dir: &Path) -> Result<TunerSettings> {
    let host_block = find_host_block(yaml, hostname)
        .ok_or_else(|| anyhow!("No host entry for '{}' in stage_tuner.yaml", hostname))?;

    let port = get(host_block, "TUNER_PORT")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("TUNER_PORT missing for '{}' in stage_tuner.yaml", hostname))?
        .to_string();

    let baud_rate = match get(host_block, "TUNER_BAUD") {
        Some(v) => v
            .as_u64()
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(|| anyhow!("TUNER_BAUD for '{}' is not a valid baud rate", hostname))?,
        None => DEFAULT_BAUD_RATE,
    };

    let protocol = match get(host_block, "PROTOCOL") {
        Some(v) => v
            .as_str()
            .ok_or_else(|| anyhow!("PROTOCOL for '{}' must be a string", hostname))?
            .parse::<ProtocolVersion>()
            .map_err(|e| anyhow!("{} (host '{}')", e, hostname))?,
        None => ProtocolVersion::Extended,
    };

    let file_key = |key: &str, default: &str| -> Result<PathBuf> {
        match get(host_block, key) {
            Some(v) => v
                .as_str()
                .map(|name| base_dir.join(name))
                .ok_or_else(|| anyhow!("{} for '{}' must be a path string", key, hostname)),
            None => Ok(base_dir.join(default)),
        }
    };
    let stage_file = file_key("STAGE_FILE", "positions.txt")?;
    let globals_file = file_key("GLOBALS_FILE", "globals.txt")?;

    let settle_ms = match get(host_block, "SETTLE_MS") {
        Some(v) => v
            .as_u64()
            .ok_or_else(|| anyhow!("SETTLE_MS for '{}' must be a non-negative integer", hostname))?,
        None => 0,
    };

    Ok(TunerSettings {
        port,
        baud_rate,
        protocol,
        stage_file,
        globals_file,
        settle_ms,
    })
}

/// Load settings for `hostname` from `path`, then apply environment overrides.
pub fn load_tuner_settings(path: &Path, hostname: &str) -> Result<TunerSettings> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Missing required stage_tuner.yaml at {:?}: {}", path, e))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut settings = parse_tuner_settings(&yaml, hostname, base_dir)?;

    let _ = dotenv();
    if let Ok(port) = env::var("TUNER_PORT") {
        settings.port = port;
    }
    if let Ok(baud) = env::var("TUNER_BAUD") {
        settings.baud_rate = baud
            .trim()
            .parse()
            .with_context(|| format!("TUNER_BAUD '{}' is not a valid baud rate", baud))?;
    }

    log::info!(target: "config_loader", "TunerSettings: port={}, baud={}, protocol={}, stages={} (hostname={})",
               settings.port, settings.baud_rate, settings.protocol, settings.stage_file.display(), hostname);
    Ok(settings)
}
