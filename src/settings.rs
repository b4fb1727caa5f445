// src/settings.rs
//
// Persistent settings stored as JSON under the platform config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::buffer_store::DEFAULT_CAPACITY;
use crate::io::serial::{LineSettings, Parity};
use crate::io::slcan::SlcanConfig;

const APP_DIR_NAME: &str = "slcanlog";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    /// Serial port of the adapter (empty = ask on the command line)
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// CAN bitrate in bit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// CAN FD data-phase bitrate index (`Y<n>`)
    #[serde(default)]
    pub fd_bitrate_index: Option<u8>,
    #[serde(default)]
    pub silent_mode: bool,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Frames kept in the log before the oldest are evicted
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    #[serde(default)]
    pub replay_loop: bool,
    /// Where exported traces go
    #[serde(default = "default_dump_dir")]
    pub dump_dir: String,
    /// Where log files go
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_bitrate() -> u32 {
    500_000
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_log_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_replay_interval_ms() -> u64 {
    100
}

fn documents_dir() -> PathBuf {
    dirs::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slcanlog")
}
fn default_dump_dir() -> String {
    documents_dir().join("Traces").to_string_lossy().to_string()
}
fn default_log_dir() -> String {
    documents_dir().join("Logs").to_string_lossy().to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            bitrate: default_bitrate(),
            fd_bitrate_index: None,
            silent_mode: false,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            log_capacity: default_log_capacity(),
            replay_interval_ms: default_replay_interval_ms(),
            replay_loop: false,
            dump_dir: default_dump_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl AppSettings {
    /// Adapter configuration for these settings
    pub fn to_slcan_config(&self) -> SlcanConfig {
        SlcanConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            bitrate: self.bitrate,
            fd_bitrate_index: self.fd_bitrate_index,
            silent_mode: self.silent_mode,
            line: LineSettings {
                data_bits: self.data_bits,
                stop_bits: self.stop_bits,
                parity: self.parity,
            },
        }
    }
}

/// `<config dir>/slcanlog/settings.json`, creating the directory if needed
pub fn settings_path() -> Result<PathBuf, String> {
    let app_dir = dirs::config_dir()
        .ok_or_else(|| "Failed to get config dir".to_string())?
        .join(APP_DIR_NAME);

    std::fs::create_dir_all(&app_dir)
        .map_err(|e| format!("Failed to create app config dir: {}", e))?;

    Ok(app_dir.join(SETTINGS_FILE_NAME))
}

/// Load settings, writing defaults on first run
pub fn load_settings() -> Result<AppSettings, String> {
    load_settings_from(&settings_path()?)
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    save_settings_to(&settings_path()?, settings)
}

pub fn load_settings_from(path: &Path) -> Result<AppSettings, String> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
    } else {
        // First run: create default settings and directories
        let settings = AppSettings::default();
        tlog!("[settings] No settings at {:?}, writing defaults", path);
        save_settings_to(path, &settings)?;
        Ok(settings)
    }
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    // Ensure directories exist when saving
    initialize_directories(settings)?;

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

fn initialize_directories(settings: &AppSettings) -> Result<(), String> {
    std::fs::create_dir_all(&settings.dump_dir)
        .map_err(|e| format!("Failed to create dump directory: {}", e))?;
    std::fs::create_dir_all(&settings.log_dir)
        .map_err(|e| format!("Failed to create log directory: {}", e))?;
    Ok(())
}
