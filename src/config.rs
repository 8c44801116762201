// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Configuration loaded from environment variables.
///
/// Tenants live in a separate YAML file (`TENANTS_FILE`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty" (default: json)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Encrypted key store, created on first start.
    #[serde(default = "default_keystore_path")]
    pub keystore_path: PathBuf,

    /// Key store password. Required; redacted in `Debug`.
    #[serde(default)]
    pub keystore_password: Option<SecretString>,

    #[serde(default = "default_tenants_file")]
    pub tenants_file: PathBuf,

    /// External origin of the gateway, used for ACS URLs and relay states.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Timeout for IdP metadata fetches in seconds (default: 10)
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Resolve every tenant's IdP metadata before accepting traffic.
    #[serde(default)]
    pub prefetch_metadata: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from("keystore.sagks")
}

fn default_tenants_file() -> PathBuf {
    PathBuf::from("tenants.yaml")
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_metadata_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are uppercase with underscore separators.
    /// Example: `KEYSTORE_PATH`, `LOG_LEVEL`, etc.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}
