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

//! Writes random lines into a rotating log file until interrupted.
//!
//! Settings come from, in increasing priority: built-in defaults, the
//! `LOG_*` environment variables (or a TOML file given with `--config`),
//! and command-line flags.

use bytesize::ByteSize;
use clap::Parser;
use rand::Rng;
use rand::distr::Alphanumeric;
use rotatefile::{RotateConfig, RotateFile, parse_size};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Write random log lines into a rotating file")]
struct Opt {
    /// TOML file with a full configuration; replaces the LOG_* environment.
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Active log file. Derived from the log dir and program name when unset.
    #[arg(long)]
    filename: Option<PathBuf>,

    /// Preferred directory for the derived log file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Rotate before the file would exceed this size, e.g. "100KiB".
    #[arg(long, value_parser = parse_size_arg)]
    max_size: Option<u64>,

    /// Delete backups older than this many days (0 keeps all).
    #[arg(long)]
    max_days: Option<u32>,

    /// Keep at most this many backups (0 keeps all).
    #[arg(long)]
    max_backups: Option<usize>,

    /// Ceiling on the active file plus backups, e.g. "300KiB" (0 disables).
    #[arg(long, value_parser = parse_size_arg)]
    total_size_cap: Option<u64>,

    /// Evict backups while free disk space is below this, e.g. "100MiB".
    #[arg(long, value_parser = parse_size_arg)]
    min_disk_free: Option<u64>,

    /// Gzip rotated backups.
    #[arg(long)]
    compress: Option<bool>,

    /// Stamp backups in UTC instead of local time.
    #[arg(long)]
    utc: Option<bool>,

    /// Mirror written lines to stdout.
    #[arg(long)]
    print_term: Option<bool>,

    /// Length of each random line.
    #[arg(long, default_value_t = 1024)]
    line_len: usize,

    /// Pause between lines, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

impl Opt {
    fn to_config(&self) -> RotateConfig {
        let mut config = match &self.config {
            Some(path) => RotateConfig::load_or_default(path),
            None => RotateConfig::from_env(),
        };
        if let Some(v) = &self.filename {
            config.filename = Some(v.clone());
        }
        if let Some(v) = &self.log_dir {
            config.log_dir = Some(v.clone());
        }
        if let Some(v) = self.max_size {
            config.max_size = v;
        }
        if let Some(v) = self.max_days {
            config.max_days = v;
        }
        if let Some(v) = self.max_backups {
            config.max_backups = v;
        }
        if let Some(v) = self.total_size_cap {
            config.total_size_cap = v;
        }
        if let Some(v) = self.min_disk_free {
            config.min_disk_free = v;
        }
        if let Some(v) = self.compress {
            config.compress = v;
        }
        if let Some(v) = self.utc {
            config.utc_time = v;
        }
        if let Some(v) = self.print_term {
            config.print_term = v;
        }
        config
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn random_line(len: usize) -> String {
    rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opt = Opt::parse();
    let config = opt.to_config();
    let signals = config.rotate_signals.clone();

    let file = Arc::new(RotateFile::new(config)?);
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(&opt.log_level))
        .with_writer(file.clone())
        .with_ansi(false)
        .try_init()?;

    info!(
        "Writing to {:?}, rotating at {}",
        file.current_filename(),
        ByteSize(file.max_size())
    );

    #[cfg(unix)]
    let _signal_guard = rotatefile::spawn_rotate_on_signals(file.clone(), &signals)?;
    #[cfg(not(unix))]
    let _ = signals;

    let mut ticker = tokio::time::interval(Duration::from_millis(opt.interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C signal, stopping");
                break;
            }
            _ = ticker.tick() => {
                info!("I! {}", random_line(opt.line_len));
            }
        }
    }

    if let Err(e) = file.sync() {
        warn!("Final sync of {:?} failed: {}", file.current_filename(), e);
    }
    Ok(())
}
