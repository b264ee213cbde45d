//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Device identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Identifier sent with every upload (default "pi-1")
    #[serde(default = "default_device_id")]
    pub id: String,
}

fn default_device_id() -> String {
    "pi-1".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

/// Capture and transcode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Duration of each buffered segment in seconds (default 2)
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u64,
    /// Output frame rate forced on the transcode (default 30)
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// Number of segments kept in the live playlist (default 6)
    #[serde(default = "default_live_window")]
    pub live_window: u32,
}

fn default_segment_seconds() -> u64 {
    2
}

fn default_framerate() -> u32 {
    30
}

fn default_live_window() -> u32 {
    6
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            segment_seconds: default_segment_seconds(),
            framerate: default_framerate(),
            live_window: default_live_window(),
        }
    }
}

/// Ring buffer retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Segments older than this are swept (default 120)
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    /// Interval between sweeps (default 5)
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_max_age_seconds() -> u64 {
    120
}

fn default_sweep_interval_seconds() -> u64 {
    5
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Event clip extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipConfig {
    /// Seconds of footage to include before the trigger (default 5)
    #[serde(default = "default_before_seconds")]
    pub before_seconds: u64,
    /// Seconds of footage to include after the trigger (default 5)
    #[serde(default = "default_after_seconds")]
    pub after_seconds: u64,
    /// Timestamp inside the clip used for the thumbnail (default 1)
    #[serde(default = "default_thumbnail_offset_seconds")]
    pub thumbnail_offset_seconds: u64,
}

fn default_before_seconds() -> u64 {
    5
}

fn default_after_seconds() -> u64 {
    5
}

fn default_thumbnail_offset_seconds() -> u64 {
    1
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            before_seconds: default_before_seconds(),
            after_seconds: default_after_seconds(),
            thumbnail_offset_seconds: default_thumbnail_offset_seconds(),
        }
    }
}

/// Cloud endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudConfig {
    /// Base URL of the cloud backend (default "http://localhost:3001")
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    /// Path of the event upload endpoint (default "/api/events/upload")
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,
    /// Path of the live segment relay endpoint (default "/api/stream/segment")
    #[serde(default = "default_segment_endpoint")]
    pub segment_endpoint: String,
    /// Per-request timeout in seconds (default 30)
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_cloud_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_upload_endpoint() -> String {
    "/api/events/upload".to_string()
}

fn default_segment_endpoint() -> String {
    "/api/stream/segment".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
            upload_endpoint: default_upload_endpoint(),
            segment_endpoint: default_segment_endpoint(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Upload worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Interval between worker ticks in seconds (default 10)
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Attempts before a task is marked failed (default 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on exponential backoff in seconds (default 300)
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,
    /// Remove local clip files after a confirmed upload (default true)
    #[serde(default = "default_delete_after_upload")]
    pub delete_after_upload: bool,
}

fn default_tick_seconds() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_cap_seconds() -> u64 {
    300
}

fn default_delete_after_upload() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            max_attempts: default_max_attempts(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
            delete_after_upload: default_delete_after_upload(),
        }
    }
}

/// UDP trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    /// UDP port the trigger listener binds (default 5005)
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Exact payload that fires an extraction (default "INTRUDER INTRUDER")
    #[serde(default = "default_phrase")]
    pub phrase: String,
    /// Seconds during which repeat triggers are dropped (default 10)
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

fn default_udp_port() -> u16 {
    5005
}

fn default_phrase() -> String {
    "INTRUDER INTRUDER".to_string()
}

fn default_cooldown_seconds() -> u64 {
    10
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            phrase: default_phrase(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

/// Live segment relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Forward live segments to the cloud (default false)
    #[serde(default)]
    pub enabled: bool,
    /// Interval between live directory polls in milliseconds (default 500)
    #[serde(default = "default_poll_millis")]
    pub poll_millis: u64,
}

fn default_poll_millis() -> u64 {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_millis: default_poll_millis(),
        }
    }
}

/// Control server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP control surface binds (default "0.0.0.0:4000")
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:4000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub clip: ClipConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and fills missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - DEVICE_ID -> device.id
    /// - CLOUD_BASE_URL -> cloud.base_url
    /// - CLOUD_UPLOAD_ENDPOINT -> cloud.upload_endpoint
    /// - CLOUD_SEGMENT_ENDPOINT -> cloud.segment_endpoint
    /// - UDP_PORT -> trigger.udp_port
    /// - TRIGGER_PHRASE -> trigger.phrase
    /// - UPLOAD_TICK_SECS -> upload.tick_seconds
    /// - MAX_ATTEMPTS -> upload.max_attempts
    /// - DELETE_AFTER_UPLOAD -> upload.delete_after_upload
    /// - RELAY_ENABLED -> relay.enabled
    /// - HTTP_BIND -> server.bind
    pub fn apply_env_overrides(&mut self) {
        // DEVICE_ID
        if let Ok(val) = env::var("DEVICE_ID") {
            if !val.is_empty() {
                self.device.id = val;
            }
        }

        // CLOUD_BASE_URL
        if let Ok(val) = env::var("CLOUD_BASE_URL") {
            if !val.is_empty() {
                self.cloud.base_url = val;
            }
        }

        // CLOUD_UPLOAD_ENDPOINT
        if let Ok(val) = env::var("CLOUD_UPLOAD_ENDPOINT") {
            if !val.is_empty() {
                self.cloud.upload_endpoint = val;
            }
        }

        // CLOUD_SEGMENT_ENDPOINT
        if let Ok(val) = env::var("CLOUD_SEGMENT_ENDPOINT") {
            if !val.is_empty() {
                self.cloud.segment_endpoint = val;
            }
        }

        // UDP_PORT
        if let Ok(val) = env::var("UDP_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.trigger.udp_port = port;
            }
        }

        // TRIGGER_PHRASE
        if let Ok(val) = env::var("TRIGGER_PHRASE") {
            if !val.is_empty() {
                self.trigger.phrase = val;
            }
        }

        // UPLOAD_TICK_SECS
        if let Ok(val) = env::var("UPLOAD_TICK_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.upload.tick_seconds = secs;
            }
        }

        // MAX_ATTEMPTS
        if let Ok(val) = env::var("MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.upload.max_attempts = attempts;
            }
        }

        // DELETE_AFTER_UPLOAD
        if let Ok(val) = env::var("DELETE_AFTER_UPLOAD") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.upload.delete_after_upload = true,
                "false" | "0" | "no" => self.upload.delete_after_upload = false,
                _ => {} // Invalid value, keep existing
            }
        }

        // RELAY_ENABLED
        if let Ok(val) = env::var("RELAY_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.relay.enabled = true,
                "false" | "0" | "no" => self.relay.enabled = false,
                _ => {}
            }
        }

        // HTTP_BIND
        if let Ok(val) = env::var("HTTP_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// Environment overrides are applied in both cases. A file that exists
    /// but fails to parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Serialize the configuration to a TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Persist the configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("DEVICE_ID");
        env::remove_var("CLOUD_BASE_URL");
        env::remove_var("CLOUD_UPLOAD_ENDPOINT");
        env::remove_var("CLOUD_SEGMENT_ENDPOINT");
        env::remove_var("UDP_PORT");
        env::remove_var("TRIGGER_PHRASE");
        env::remove_var("UPLOAD_TICK_SECS");
        env::remove_var("MAX_ATTEMPTS");
        env::remove_var("DELETE_AFTER_UPLOAD");
        env::remove_var("RELAY_ENABLED");
        env::remove_var("HTTP_BIND");
    }

    // For any valid TOML covering every section, loading SHALL preserve each
    // value exactly, and a set environment variable SHALL win over the file.

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            segment_seconds in 1u64..30,
            framerate in 1u32..120,
            max_age in 10u64..3600,
            before in 0u64..60,
            after in 0u64..60,
            udp_port in 1024u16..u16::MAX,
            max_attempts in 1u32..20,
            delete_after in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[capture]
segment_seconds = {}
framerate = {}

[buffer]
max_age_seconds = {}

[clip]
before_seconds = {}
after_seconds = {}

[trigger]
udp_port = {}

[upload]
max_attempts = {}
delete_after_upload = {}
"#,
                segment_seconds, framerate, max_age, before, after, udp_port, max_attempts,
                delete_after
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.capture.segment_seconds, segment_seconds);
            prop_assert_eq!(config.capture.framerate, framerate);
            prop_assert_eq!(config.buffer.max_age_seconds, max_age);
            prop_assert_eq!(config.clip.before_seconds, before);
            prop_assert_eq!(config.clip.after_seconds, after);
            prop_assert_eq!(config.trigger.udp_port, udp_port);
            prop_assert_eq!(config.upload.max_attempts, max_attempts);
            prop_assert_eq!(config.upload.delete_after_upload, delete_after);
            // Untouched sections fall back to defaults
            prop_assert_eq!(config.capture.live_window, 6);
            prop_assert_eq!(config.cloud.base_url, "http://localhost:3001");
        }

        #[test]
        fn prop_env_overrides_cloud_base_url(
            port in 1024u16..u16::MAX,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(
                "[cloud]\nbase_url = \"http://example.com\"\n",
            ).expect("Valid TOML");

            let override_url = format!("http://10.0.0.2:{}", port);
            env::set_var("CLOUD_BASE_URL", &override_url);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.cloud.base_url, override_url);
        }

        #[test]
        fn prop_env_overrides_udp_port(
            initial_port in 1024u16..u16::MAX,
            override_port in 1024u16..u16::MAX,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[trigger]\nudp_port = {}\n", initial_port);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("UDP_PORT", override_port.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.trigger.udp_port, override_port);
        }

        #[test]
        fn prop_env_overrides_upload_tick(
            initial_tick in 1u64..120,
            override_tick in 1u64..120,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[upload]\ntick_seconds = {}\n", initial_tick);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("UPLOAD_TICK_SECS", override_tick.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.upload.tick_seconds, override_tick);
        }

        #[test]
        fn prop_env_overrides_delete_after_upload(
            initial in proptest::bool::ANY,
            overridden in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[upload]\ndelete_after_upload = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("DELETE_AFTER_UPLOAD", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.upload.delete_after_upload, overridden);
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.device.id, "pi-1");
        assert_eq!(config.capture.segment_seconds, 2);
        assert_eq!(config.capture.framerate, 30);
        assert_eq!(config.capture.live_window, 6);
        assert_eq!(config.buffer.max_age_seconds, 120);
        assert_eq!(config.buffer.sweep_interval_seconds, 5);
        assert_eq!(config.clip.before_seconds, 5);
        assert_eq!(config.clip.after_seconds, 5);
        assert_eq!(config.cloud.base_url, "http://localhost:3001");
        assert_eq!(config.cloud.upload_endpoint, "/api/events/upload");
        assert_eq!(config.cloud.segment_endpoint, "/api/stream/segment");
        assert_eq!(config.cloud.request_timeout_seconds, 30);
        assert_eq!(config.upload.tick_seconds, 10);
        assert_eq!(config.upload.max_attempts, 5);
        assert!(config.upload.delete_after_upload);
        assert_eq!(config.trigger.udp_port, 5005);
        assert_eq!(config.trigger.phrase, "INTRUDER INTRUDER");
        assert_eq!(config.trigger.cooldown_seconds, 10);
        assert!(!config.relay.enabled);
        assert_eq!(config.relay.poll_millis, 500);
        assert_eq!(config.server.bind, "0.0.0.0:4000");
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[trigger]
udp_port = 6000
phrase = "ALERT"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.trigger.udp_port, 6000);
        assert_eq!(config.trigger.phrase, "ALERT");
        assert_eq!(config.trigger.cooldown_seconds, 10); // default
        assert_eq!(config.capture.segment_seconds, 2); // default
        assert_eq!(config.upload.max_attempts, 5); // default
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = Config::parse_toml("[capture\nsegment_seconds = 2");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("lookout.toml");

        let mut config = Config::default();
        config.device.id = "garage-cam".to_string();
        config.cloud.base_url = "http://192.168.1.20:3001".to_string();
        config.trigger.udp_port = 5600;
        config.upload.delete_after_upload = false;

        config.save(&path).expect("save should succeed");
        let loaded = Config::load_from_file(&path).expect("load should succeed");

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_when_file_missing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("does-not-exist.toml");

        let config = Config::load_or_default(&path).expect("defaults when missing");
        assert_eq!(config, Config::default());
    }
}
