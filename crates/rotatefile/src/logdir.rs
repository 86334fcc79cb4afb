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

//! Where the active log file lives when no file name is configured.
//!
//! The directory is the first writable one of:
//! 1. the configured `log_dir`
//! 2. `$HOME/log/<app>`
//! 3. `$PWD/log/<app>`
//! 4. `/var/log/apps/<app>`
//! 5. the system temp dir
//!
//! and the file name is `<prefix><app>_<cwd-base>.log`.

use crate::config::RotateConfig;
use crate::error::{Result, RotateError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive advisory lock on `<log file>.lock`, held for the lifetime of
/// the value.
#[derive(Debug)]
pub struct LogLock {
    path: PathBuf,
    // Closing the descriptor releases the lock.
    _file: File,
}

impl LogLock {
    /// Try once to take the lock at `path`; `None` if another holder has it
    /// or the lock file cannot be opened.
    pub fn try_acquire(path: &Path) -> Option<Self> {
        let file = match OpenOptions::new().create(true).truncate(false).write(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!("Unable to open lock file {:?}: {}", path, e);
                return None;
            }
        };
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Some(Self {
                path: path.to_path_buf(),
                _file: file,
            }),
            Err(e) => {
                debug!("Lock {:?} is held elsewhere: {}", path, e);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The resolved active file, plus its lock when one was taken.
#[derive(Debug)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub lock: Option<LogLock>,
}

/// Base name of the running executable.
pub fn app_name() -> String {
    std::env::args_os()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

/// `<app>_<cwd-base>.log`, or `<app>.log` when the working directory is unknown.
pub fn default_log_name(app: &str) -> String {
    let cwd_base = std::env::current_dir()
        .ok()
        .and_then(|wd| wd.file_name().map(|n| n.to_string_lossy().into_owned()));
    match cwd_base {
        Some(base) => format!("{app}_{base}.log"),
        None => format!("{app}.log"),
    }
}

/// Create `dir` if needed and check that a file can be written into it.
pub fn is_dir_writable(dir: &Path) -> bool {
    if !dir.exists() && fs::create_dir_all(dir).is_err() {
        return false;
    }
    match tempfile::NamedTempFile::new_in(dir) {
        Ok(mut probe) => probe.write_all(b"rotatefile_probe").is_ok(),
        Err(_) => false,
    }
}

/// First writable directory of the search order.
pub fn find_log_dir(log_dir: Option<&Path>, app: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = log_dir {
        candidates.push(expand_home(dir));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("log").join(app));
    }
    if let Ok(wd) = std::env::current_dir() {
        candidates.push(wd.join("log").join(app));
    }
    candidates.push(Path::new("/var/log/apps").join(app));
    candidates.push(std::env::temp_dir());

    candidates.into_iter().find(|dir| is_dir_writable(dir))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Replace the trailing `.log` of `name` with `.<pid>.log`.
fn pid_qualified(name: &str) -> String {
    let stem = name.strip_suffix(".log").unwrap_or(name);
    format!("{stem}.{}.log", std::process::id())
}

/// Decide the active file for `config`.
///
/// An explicit `filename` is used as is (after `~` expansion) and never
/// locked. Otherwise a name is derived and, with `try_lock`, guarded by a
/// lock file; when another process holds it the pid is embedded in the name.
///
/// # Errors
/// [`RotateError::NoLogDir`] when none of the candidate directories is writable.
pub fn resolve_filename(config: &RotateConfig) -> Result<ResolvedFile> {
    if let Some(filename) = &config.filename {
        return Ok(ResolvedFile {
            path: expand_home(filename),
            lock: None,
        });
    }

    let app = app_name();
    let dir = find_log_dir(config.log_dir.as_deref(), &app).ok_or(RotateError::NoLogDir)?;
    let mut name = default_log_name(&app);

    // The lock is keyed on the unprefixed name, so every prefix of one
    // program in one working directory shares it.
    let mut lock = None;
    if config.try_lock {
        lock = LogLock::try_acquire(&dir.join(format!("{name}.lock")));
        if lock.is_none() {
            name = pid_qualified(&name);
        }
    }

    let path = dir.join(format!("{}{}", config.prefix, name));
    info!("Log file resolved to {:?}", path);
    Ok(ResolvedFile { path, lock })
}
