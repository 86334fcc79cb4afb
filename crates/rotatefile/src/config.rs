// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rotating file configuration.
//!
//! Every field has a production default. [`RotateConfig::from_env`] overlays
//! the `LOG_*` environment variables on top of those defaults and
//! [`RotateConfig::load_or_default`] reads the same structure from TOML.

use crate::error::{Result, RotateError};
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

pub const ENV_LOG_FILENAME: &str = "LOG_FILENAME";
pub const ENV_LOG_DIR: &str = "LOG_DIR";
pub const ENV_LOG_PREFIX: &str = "LOG_PREFIX";
pub const ENV_LOG_MAX_SIZE: &str = "LOG_MAX_SIZE";
pub const ENV_LOG_MAX_DAYS: &str = "LOG_MAX_DAYS";
pub const ENV_LOG_MAX_BACKUPS: &str = "LOG_MAX_BACKUPS";
pub const ENV_LOG_TOTAL_SIZE_CAP: &str = "LOG_TOTAL_SIZE_CAP";
pub const ENV_LOG_MIN_DISK_FREE: &str = "LOG_MIN_DISK_FREE";
pub const ENV_LOG_UTCTIME: &str = "LOG_UTCTIME";
pub const ENV_LOG_COMPRESS: &str = "LOG_COMPRESS";
pub const ENV_LOG_COMPRESS_LEVEL: &str = "LOG_COMPRESS_LEVEL";
pub const ENV_LOG_PRINT_TERM: &str = "LOG_PRINT_TERM";
pub const ENV_LOG_TRY_LOCK: &str = "LOG_TRY_LOCK";
pub const ENV_LOG_ROTATE_SIGNALS: &str = "LOG_ROTATE_SIGNALS";

/// Used whenever `max_size` is `0`.
pub const DEFAULT_MAX_SIZE: u64 = 100 * MIB;
pub const DEFAULT_MAX_DAYS: u32 = 30;
pub const DEFAULT_MAX_BACKUPS: usize = 0;
pub const DEFAULT_TOTAL_SIZE_CAP: u64 = GIB;
pub const DEFAULT_MIN_DISK_FREE: u64 = 100 * MIB;
pub const DEFAULT_UTC_TIME: bool = false;
pub const DEFAULT_COMPRESS: bool = true;
pub const DEFAULT_COMPRESS_LEVEL: u32 = 6;
pub const DEFAULT_TRY_LOCK: bool = true;

/// OS signal that forces a rotation when delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotateSignal {
    #[serde(rename = "SIGHUP")]
    Hup,
    #[serde(rename = "SIGUSR1")]
    Usr1,
    #[serde(rename = "SIGUSR2")]
    Usr2,
}

impl FromStr for RotateSignal {
    type Err = RotateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIGHUP" | "HUP" => Ok(RotateSignal::Hup),
            "SIGUSR1" | "USR1" => Ok(RotateSignal::Usr1),
            "SIGUSR2" | "USR2" => Ok(RotateSignal::Usr2),
            _ => Err(RotateError::InvalidSignal(s.to_string())),
        }
    }
}

impl fmt::Display for RotateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotateSignal::Hup => "SIGHUP",
            RotateSignal::Usr1 => "SIGUSR1",
            RotateSignal::Usr2 => "SIGUSR2",
        };
        f.write_str(name)
    }
}

/// Complete configuration of a [`RotateFile`](crate::RotateFile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateConfig {
    /// The active log file. Backups live in the same directory.
    /// When unset a file name is derived by [`crate::logdir`].
    pub filename: Option<PathBuf>,

    /// Preferred directory used when `filename` is unset.
    pub log_dir: Option<PathBuf>,

    /// Prepended to the derived file name when `filename` is unset.
    pub prefix: String,

    /// Rotate before a write would push the active file past this many bytes.
    /// `0` means [`DEFAULT_MAX_SIZE`], not unlimited.
    pub max_size: u64,

    /// Delete backups whose encoded timestamp is older than this many days
    /// (a day is 24 hours). `0` keeps backups regardless of age.
    pub max_days: u32,

    /// Maximum number of backups to keep; a backup and its `.gz` count once.
    /// `0` keeps all of them.
    pub max_backups: usize,

    /// Ceiling on active file plus backups, in bytes. `0` disables the cap.
    /// The active file alone may exceed it.
    pub total_size_cap: u64,

    /// Minimum free space on the log directory's filesystem. `0` disables the check.
    pub min_disk_free: u64,

    /// Format backup timestamps in UTC instead of local time.
    pub utc_time: bool,

    /// Gzip backups after rotation.
    pub compress: bool,

    /// Gzip level, clamped to `1..=9`.
    pub compress_level: u32,

    /// Mirror every accepted write to stdout.
    pub print_term: bool,

    /// Take an advisory lock on the derived file name and fall back to a
    /// pid-qualified name when another process holds it.
    pub try_lock: bool,

    /// Signals that force a rotation, see [`crate::signal`].
    pub rotate_signals: Vec<RotateSignal>,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            filename: None,
            log_dir: None,
            prefix: String::new(),
            max_size: DEFAULT_MAX_SIZE,
            max_days: DEFAULT_MAX_DAYS,
            max_backups: DEFAULT_MAX_BACKUPS,
            total_size_cap: DEFAULT_TOTAL_SIZE_CAP,
            min_disk_free: DEFAULT_MIN_DISK_FREE,
            utc_time: DEFAULT_UTC_TIME,
            compress: DEFAULT_COMPRESS,
            compress_level: DEFAULT_COMPRESS_LEVEL,
            print_term: std::io::stdout().is_terminal(),
            try_lock: DEFAULT_TRY_LOCK,
            rotate_signals: vec![RotateSignal::Hup],
        }
    }
}

impl RotateConfig {
    /// Defaults overlaid with the `LOG_*` environment variables.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            filename: get_env_opt_str(ENV_LOG_FILENAME).map(PathBuf::from),
            log_dir: get_env_opt_str(ENV_LOG_DIR).map(PathBuf::from),
            prefix: get_env_opt_str(ENV_LOG_PREFIX).unwrap_or(d.prefix),
            max_size: get_env_size(ENV_LOG_MAX_SIZE, d.max_size),
            max_days: get_env_parse(ENV_LOG_MAX_DAYS, d.max_days),
            max_backups: get_env_parse(ENV_LOG_MAX_BACKUPS, d.max_backups),
            total_size_cap: get_env_size(ENV_LOG_TOTAL_SIZE_CAP, d.total_size_cap),
            min_disk_free: get_env_size(ENV_LOG_MIN_DISK_FREE, d.min_disk_free),
            utc_time: get_env_bool(ENV_LOG_UTCTIME, d.utc_time),
            compress: get_env_bool(ENV_LOG_COMPRESS, d.compress),
            compress_level: get_env_parse(ENV_LOG_COMPRESS_LEVEL, d.compress_level),
            print_term: get_env_bool(ENV_LOG_PRINT_TERM, d.print_term),
            try_lock: get_env_bool(ENV_LOG_TRY_LOCK, d.try_lock),
            rotate_signals: get_env_signals(ENV_LOG_ROTATE_SIGNALS, d.rotate_signals),
        }
    }

    /// Load configuration from a TOML file.
    /// If the file does not exist or fails to parse, returns the default configuration.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Unable to load config file {}, using default config: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load configuration from a TOML file, reporting why it could not be used.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Effective rotation threshold in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        if self.max_size == 0 { DEFAULT_MAX_SIZE } else { self.max_size }
    }

    pub fn gzip_level(&self) -> u32 {
        self.compress_level.clamp(1, 9)
    }
}

/// Parse a human readable size such as `"100MB"`, `"1 GiB"` or `"42 mib"`.
///
/// Decimal units (`kb`, `mb`, ...) are powers of 1000, binary units
/// (`kib`, `mib`, ...) powers of 1024. A bare number is a byte count and
/// thousands separators are accepted.
pub fn parse_size(s: &str) -> Result<u64> {
    let cleaned = s.trim().replace(',', "");
    cleaned
        .parse::<ByteSize>()
        .map(|b| b.as_u64())
        .map_err(|e| RotateError::InvalidSize(s.to_string(), e.to_string()))
}

fn get_env_opt_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn get_env_size(key: &str, default: u64) -> u64 {
    get_env_opt_str(key).and_then(|v| parse_size(&v).ok()).unwrap_or(default)
}

fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "yes" | "y" | "1" | "on" | "true" | "t" => Some(true),
            "no" | "n" | "0" | "off" | "false" | "f" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn get_env_signals(key: &str, default: Vec<RotateSignal>) -> Vec<RotateSignal> {
    match get_env_opt_str(key) {
        Some(v) => v.split(',').filter_map(|item| item.parse().ok()).collect(),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("42").unwrap(), 42);
        assert_eq!(parse_size("42 MB").unwrap(), 42_000_000);
        assert_eq!(parse_size("42 mib").unwrap(), 44_040_192);
        assert_eq!(parse_size("1GiB").unwrap(), GIB);
        assert_eq!(parse_size("1,000 kb").unwrap(), 1_000_000);
        assert!(parse_size("12 parsecs").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_rotate_signal_parse() {
        assert_eq!("sighup".parse::<RotateSignal>().unwrap(), RotateSignal::Hup);
        assert_eq!("SIGUSR1".parse::<RotateSignal>().unwrap(), RotateSignal::Usr1);
        assert_eq!("usr2".parse::<RotateSignal>().unwrap(), RotateSignal::Usr2);
        assert!("SIGKILL".parse::<RotateSignal>().is_err());
        assert_eq!(RotateSignal::Usr1.to_string(), "SIGUSR1");
    }

    #[test]
    fn test_max_size_zero_means_default() {
        let config = RotateConfig {
            max_size: 0,
            ..Default::default()
        };
        assert_eq!(config.max_size_bytes(), DEFAULT_MAX_SIZE);

        let config = RotateConfig {
            max_size: 10,
            compress_level: 42,
            ..Default::default()
        };
        assert_eq!(config.max_size_bytes(), 10);
        assert_eq!(config.gzip_level(), 9);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_defaults() {
        temp_env::with_vars(
            [
                (ENV_LOG_FILENAME, Some("/tmp/rotatefile-env/app.log")),
                (ENV_LOG_MAX_SIZE, Some("10 MiB")),
                (ENV_LOG_MAX_DAYS, Some("7")),
                (ENV_LOG_MAX_BACKUPS, Some("3")),
                (ENV_LOG_TOTAL_SIZE_CAP, Some("bogus")),
                (ENV_LOG_UTCTIME, Some("on")),
                (ENV_LOG_COMPRESS, Some("n")),
                (ENV_LOG_ROTATE_SIGNALS, Some("SIGUSR1,sigusr2,SIGKILL")),
            ],
            || {
                let config = RotateConfig::from_env();
                assert_eq!(config.filename, Some(PathBuf::from("/tmp/rotatefile-env/app.log")));
                assert_eq!(config.max_size, 10 * MIB);
                assert_eq!(config.max_days, 7);
                assert_eq!(config.max_backups, 3);
                assert_eq!(config.total_size_cap, DEFAULT_TOTAL_SIZE_CAP);
                assert!(config.utc_time);
                assert!(!config.compress);
                assert_eq!(config.rotate_signals, vec![RotateSignal::Usr1, RotateSignal::Usr2]);
            },
        );
    }

    #[test]
    #[serial]
    fn test_from_env_without_vars_matches_defaults() {
        temp_env::with_vars_unset(
            [
                ENV_LOG_FILENAME,
                ENV_LOG_DIR,
                ENV_LOG_PREFIX,
                ENV_LOG_MAX_SIZE,
                ENV_LOG_MAX_DAYS,
                ENV_LOG_MAX_BACKUPS,
                ENV_LOG_TOTAL_SIZE_CAP,
                ENV_LOG_MIN_DISK_FREE,
                ENV_LOG_UTCTIME,
                ENV_LOG_COMPRESS,
                ENV_LOG_COMPRESS_LEVEL,
                ENV_LOG_PRINT_TERM,
                ENV_LOG_TRY_LOCK,
                ENV_LOG_ROTATE_SIGNALS,
            ],
            || {
                assert_eq!(RotateConfig::from_env(), RotateConfig::default());
            },
        );
    }

    #[test]
    fn test_load_toml_with_partial_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
filename = "/var/log/app/app.log"
max_size = 1048576
max_backups = 5
compress = false
rotate_signals = ["SIGUSR2"]
"#
        )
        .unwrap();

        let config = RotateConfig::load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(config.filename, Some(PathBuf::from("/var/log/app/app.log")));
        assert_eq!(config.max_size, MIB);
        assert_eq!(config.max_backups, 5);
        assert!(!config.compress);
        assert_eq!(config.max_days, DEFAULT_MAX_DAYS);
        assert_eq!(config.rotate_signals, vec![RotateSignal::Usr2]);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = RotateConfig::load_or_default("/definitely/not/here.toml");
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
    }
}
