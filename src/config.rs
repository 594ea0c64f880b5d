//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capability::RecognizerSettings;
use crate::error::VoiceError;
use crate::permission::PermissionState;
use crate::session::SessionConfig;

/// Which recognition capability to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerBackend {
    /// Lines typed on stdin
    Console,
    /// No recognition capability
    None,
}

impl FromStr for RecognizerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "none" => Ok(Self::None),
            other => Err(format!("unknown recognizer backend '{other}'")),
        }
    }
}

/// Which speech-output capability to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizerBackend {
    /// Utterances written to the log
    Log,
    /// No speech output capability
    None,
}

impl FromStr for SynthesizerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "none" => Ok(Self::None),
            other => Err(format!("unknown synthesizer backend '{other}'")),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub recognizer: RecognizerBackend,
    pub synthesizer: SynthesizerBackend,

    /// Consent reported by the platform; `None` when it cannot be queried
    pub permission: Option<PermissionState>,

    /// Recognizer language tag
    pub language: String,

    pub restart_backoff: Duration,
    pub settle_delay: Duration,
    pub max_start_failures: u32,

    /// Start listening as soon as the daemon is up
    pub autostart: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("zone-voice");

        let socket_path = lookup("ZONE_VOICE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let permission = match lookup("ZONE_VOICE_PERMISSION") {
            Some(raw) => Some(parse_value("ZONE_VOICE_PERMISSION", &raw)?),
            None => None,
        };

        Ok(Self {
            socket_path,
            data_dir,
            recognizer: parse_or(&lookup, "ZONE_VOICE_RECOGNIZER", RecognizerBackend::Console)?,
            synthesizer: parse_or(&lookup, "ZONE_VOICE_SYNTHESIZER", SynthesizerBackend::Log)?,
            permission,
            language: lookup("ZONE_VOICE_LANGUAGE").unwrap_or_else(|| "en-US".to_string()),
            restart_backoff: Duration::from_millis(parse_or(
                &lookup,
                "ZONE_VOICE_RESTART_BACKOFF_MS",
                100,
            )?),
            settle_delay: Duration::from_millis(parse_or(&lookup, "ZONE_VOICE_SETTLE_MS", 1000)?),
            max_start_failures: parse_or(&lookup, "ZONE_VOICE_MAX_START_FAILURES", 5)?,
            autostart: parse_or(&lookup, "ZONE_VOICE_AUTOSTART", true)?,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            restart_backoff: self.restart_backoff,
            settle_delay: self.settle_delay,
            max_start_failures: self.max_start_failures.max(1),
        }
    }

    pub fn recognizer_settings(&self) -> RecognizerSettings {
        RecognizerSettings {
            language: self.language.clone(),
            ..RecognizerSettings::default()
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| (key == "HOME").then(|| "/tmp/zone-voice-test".to_string()))
            .expect("default test config")
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, VoiceError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| VoiceError::Config {
        key,
        message: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, VoiceError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_load() {
        let config = Config::for_tests();
        assert!(config.socket_path.to_string_lossy().contains("zone-voice"));
        assert_eq!(config.recognizer, RecognizerBackend::Console);
        assert_eq!(config.synthesizer, SynthesizerBackend::Log);
        assert_eq!(config.permission, None);
        assert_eq!(config.restart_backoff, Duration::from_millis(100));
        assert_eq!(config.settle_delay, Duration::from_millis(1000));
        assert!(config.autostart);
    }

    #[test]
    fn test_overrides() {
        let config = load_with(&[
            ("HOME", "/home/crew"),
            ("ZONE_VOICE_SOCKET", "/run/zone.sock"),
            ("ZONE_VOICE_RECOGNIZER", "none"),
            ("ZONE_VOICE_PERMISSION", "denied"),
            ("ZONE_VOICE_RESTART_BACKOFF_MS", "250"),
            ("ZONE_VOICE_AUTOSTART", "false"),
            ("ZONE_VOICE_LANGUAGE", "en-GB"),
        ])
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/zone.sock"));
        assert_eq!(config.recognizer, RecognizerBackend::None);
        assert_eq!(config.permission, Some(PermissionState::Denied));
        assert_eq!(config.session_config().restart_backoff, Duration::from_millis(250));
        assert_eq!(config.recognizer_settings().language, "en-GB");
        assert!(!config.autostart);
    }

    #[test]
    fn test_missing_home() {
        assert!(load_with(&[]).is_err());
    }

    #[test]
    fn test_malformed_value_names_variable() {
        let err = load_with(&[("HOME", "/home/crew"), ("ZONE_VOICE_SETTLE_MS", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("ZONE_VOICE_SETTLE_MS"));
    }

    #[test]
    fn test_max_start_failures_at_least_one() {
        let config = load_with(&[("HOME", "/h"), ("ZONE_VOICE_MAX_START_FAILURES", "0")]).unwrap();
        assert_eq!(config.session_config().max_start_failures, 1);
    }
}
