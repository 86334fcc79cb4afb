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

//! # rotatefile
//!
//! A size-rotated log file with background retention.
//!
//! Writes go to a single active file. When a write would push it past
//! `max_size`, the file is renamed to `<stem>.<YYYYMMDDThhmmss.mmm><ext>` and a
//! new one is started. A background thread then enforces, on the backups:
//! a count cap, an age cap, gzip compression, a cap on total size and a
//! minimum of free disk space.
//!
//! ## Usage
//!
//! ```no_run
//! use rotatefile::{RotateConfig, RotateFile};
//!
//! let config = RotateConfig {
//!     filename: Some("/var/log/demo/server.log".into()),
//!     max_size: 10 * 1024 * 1024,
//!     max_backups: 7,
//!     ..RotateConfig::from_env()
//! };
//! let file = RotateFile::new(config)?;
//! file.write(b"hello\n")?;
//! # Ok::<(), rotatefile::RotateError>(())
//! ```
//!
//! As a `tracing` sink:
//!
//! ```no_run
//! use rotatefile::{RotateConfig, RotateFile};
//! use std::sync::Arc;
//!
//! let file = Arc::new(RotateFile::new(RotateConfig::from_env())?);
//! tracing_subscriber::fmt().with_writer(file).with_ansi(false).init();
//! # Ok::<(), rotatefile::RotateError>(())
//! ```
mod clock;
mod compress;
pub mod config;
mod disk;
mod error;
mod file;
pub mod logdir;
mod mill;
pub mod naming;
#[cfg(unix)]
mod signal;
mod worker;
mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::{compress_file, compressed_path};
pub use config::{RotateConfig, RotateSignal, parse_size};
pub use disk::{DiskSpace, DiskUsage, StatvfsDisk, get_usage};
pub use error::{Result, RotateError};
pub use file::{Probes, RotateFile};
pub use mill::{BackupInfo, Mill, MillReport, RetentionPolicy};
#[cfg(unix)]
pub use signal::{SignalGuard, spawn_rotate_on_signals};
pub use worker::MillWorker;
